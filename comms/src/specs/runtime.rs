use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Wire-level specification of the generative model to instantiate.
///
/// Every dimension is already resolved, the inference runtime never has to
/// interpret variant names on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub variant: String,
    pub depth: usize,
    pub hidden_size: usize,
    pub num_heads: usize,
    pub patch_size: usize,
    pub input_size: usize,
    pub in_channels: usize,
    pub num_classes: usize,
    pub class_dropout_prob: f32,
    pub z_dims: Vec<usize>,
    pub encoder_depth: usize,
    pub bn_momentum: f32,
    pub fused_attn: bool,
    pub qk_norm: bool,
    pub checkpoint: PathBuf,
    /// Tensor name prefix of the weights to load, e.g. `ema.`.
    pub prefix: String,
}

/// Where the autoencoder weights live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoencoderSource {
    /// Bundled with the generative model checkpoint under `prefix`.
    Bundled { checkpoint: PathBuf, prefix: String },
    /// A standalone autoencoder checkpoint.
    Standalone { checkpoint: PathBuf },
}

/// Wire-level specification of the autoencoder to instantiate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoencoderSpec {
    pub variant: String,
    pub downsample: usize,
    pub latent_channels: usize,
    pub source: AutoencoderSource,
}

/// Everything an inference runtime needs to serve one sampling worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSpec {
    pub device: usize,
    pub allow_tf32: bool,
    pub model: ModelSpec,
    pub autoencoder: AutoencoderSpec,
}
