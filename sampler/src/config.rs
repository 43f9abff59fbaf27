use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{Result, SamplerErr};

/// Name of the experiment configuration file inside an experiment directory.
pub const CONFIG_FILE: &str = "args.json";

/// The training configuration of an experiment, as written by the trainer.
///
/// Read once at startup and never modified. Keys the sampler doesn't need are
/// ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub resolution: usize,
    pub vae: String,
    pub model: String,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    #[serde(default = "default_enc_type")]
    pub enc_type: String,
    #[serde(default = "default_encoder_depth")]
    pub encoder_depth: usize,
    #[serde(default = "default_cfg_prob")]
    pub cfg_prob: f32,
    #[serde(default = "default_bn_momentum")]
    pub bn_momentum: f32,
    #[serde(default = "default_fused_attn")]
    pub fused_attn: bool,
    #[serde(default)]
    pub qk_norm: bool,
    #[serde(default)]
    pub vae_ckpt: Option<PathBuf>,
}

fn default_num_classes() -> usize {
    1000
}

fn default_enc_type() -> String {
    "None".to_string()
}

fn default_encoder_depth() -> usize {
    8
}

fn default_cfg_prob() -> f32 {
    0.1
}

fn default_bn_momentum() -> f32 {
    0.1
}

fn default_fused_attn() -> bool {
    true
}

impl RunConfig {
    /// Loads the configuration of the experiment at `exp_path`.
    ///
    /// # Errors
    /// Returns `SamplerErr::Io` if the file can't be read and
    /// `SamplerErr::Config` if it isn't a valid configuration.
    pub fn load(exp_path: &Path) -> Result<Self> {
        let path = exp_path.join(CONFIG_FILE);
        let bytes = fs::read(&path).map_err(|e| {
            io::Error::new(e.kind(), format!("reading config {}: {e}", path.display()))
        })?;

        serde_json::from_slice(&bytes).map_err(|source| SamplerErr::Config { path, source })
    }

    pub fn autoencoder(&self) -> Result<AutoencoderVariant> {
        AutoencoderVariant::parse(&self.vae)
    }

    pub fn architecture(&self) -> Result<SitVariant> {
        SitVariant::parse(&self.model)
    }

    /// Resolves the projector dimensions of the alignment encoders.
    ///
    /// The encoders themselves are never loaded, their embedding width follows
    /// from the backbone size in their name.
    pub fn z_dims(&self) -> Result<Vec<usize>> {
        if self.enc_type == "None" {
            return Ok(vec![0]);
        }

        self.enc_type
            .split(',')
            .map(str::trim)
            .map(encoder_dim)
            .collect()
    }
}

fn encoder_dim(name: &str) -> Result<usize> {
    let size = name
        .rsplit_once("vit-")
        .map(|(_, size)| size)
        .ok_or_else(|| SamplerErr::UnsupportedEncoder(name.to_string()))?;

    match size {
        "s" => Ok(384),
        "b" => Ok(768),
        "l" => Ok(1024),
        "g" => Ok(1536),
        _ => Err(SamplerErr::UnsupportedEncoder(name.to_string())),
    }
}

/// The supported autoencoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoencoderVariant {
    /// 8x downsampling, 4 latent channels.
    F8D4,
    /// 16x downsampling, 32 latent channels.
    F16D32,
}

impl AutoencoderVariant {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "f8d4" => Ok(Self::F8D4),
            "f16d32" => Ok(Self::F16D32),
            other => Err(SamplerErr::UnsupportedAutoencoder(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::F8D4 => "f8d4",
            Self::F16D32 => "f16d32",
        }
    }

    pub fn downsample(&self) -> usize {
        match self {
            Self::F8D4 => 8,
            Self::F16D32 => 16,
        }
    }

    pub fn latent_channels(&self) -> usize {
        match self {
            Self::F8D4 => 4,
            Self::F16D32 => 32,
        }
    }

    /// The side of the square latent for images of side `resolution`.
    pub fn latent_size(&self, resolution: usize) -> usize {
        resolution / self.downsample()
    }
}

/// A SiT architecture, resolved from names like `SiT-XL/2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SitVariant {
    pub depth: usize,
    pub hidden_size: usize,
    pub num_heads: usize,
    pub patch_size: usize,
}

impl SitVariant {
    pub fn parse(name: &str) -> Result<Self> {
        let unsupported = || SamplerErr::UnsupportedModel(name.to_string());

        let (size, patch) = name
            .strip_prefix("SiT-")
            .and_then(|rest| rest.split_once('/'))
            .ok_or_else(unsupported)?;

        let (depth, hidden_size, num_heads) = match size {
            "S" => (12, 384, 6),
            "B" => (12, 768, 12),
            "L" => (24, 1024, 16),
            "XL" => (28, 1152, 16),
            _ => return Err(unsupported()),
        };

        let patch_size = match patch {
            "1" => 1,
            "2" => 2,
            "4" => 4,
            "8" => 8,
            _ => return Err(unsupported()),
        };

        Ok(Self {
            depth,
            hidden_size,
            num_heads,
            patch_size,
        })
    }
}
