use std::path::{Path, PathBuf};

use comms::specs::runtime::{AutoencoderSource, AutoencoderSpec, ModelSpec, RuntimeSpec};
use log::{debug, info};
use ndarray::{Array1, Array4};

use crate::{
    Result, SamplerErr,
    checkpoint::{self, Checkpoint},
    config::RunConfig,
    options::Experiment,
};

pub const CHECKPOINT_DIR: &str = "checkpoints";
pub const CHECKPOINT_EXT: &str = "safetensors";
pub const EMA_PREFIX: &str = "ema.";
pub const VAE_PREFIX: &str = "vae.";
const BN_RUNNING_VAR: &str = "ema.bn.running_var";
const BN_RUNNING_MEAN: &str = "ema.bn.running_mean";
pub const STATS_SCALE: &str = "latents_scale";
pub const STATS_BIAS: &str = "latents_bias";

/// Per channel statistics that map the model's normalized latents back into
/// the autoencoder's latent space.
#[derive(Debug, Clone, PartialEq)]
pub struct LatentStats {
    pub scale: Array1<f32>,
    pub bias: Array1<f32>,
}

impl LatentStats {
    /// Derives the statistics from batch-norm running buffers.
    pub fn from_running(var: Array1<f32>, mean: Array1<f32>) -> Self {
        Self {
            scale: var.mapv(|v| 1.0 / v.sqrt()),
            bias: mean,
        }
    }

    pub fn channels(&self) -> usize {
        self.scale.len()
    }

    /// Computes `z / scale + bias` for every channel of `z`.
    ///
    /// # Errors
    /// Returns `SamplerErr::ShapeMismatch` if `z` doesn't have one channel per
    /// statistic.
    pub fn denormalize(&self, z: &Array4<f32>) -> Result<Array4<f32>> {
        let (n, c, h, w) = z.dim();
        if c != self.channels() {
            return Err(SamplerErr::ShapeMismatch {
                what: "latents",
                got: vec![n, c, h, w],
                expected: vec![n, self.channels(), h, w],
            });
        }

        let mut out = z.clone();
        for mut sample in out.outer_iter_mut() {
            for (ch, mut plane) in sample.outer_iter_mut().enumerate() {
                let (scale, bias) = (self.scale[ch], self.bias[ch]);
                plane.mapv_inplace(|v| v / scale + bias);
            }
        }

        Ok(out)
    }
}

/// A fully resolved model selection, ready to be handed to a runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembly {
    pub model: ModelSpec,
    pub autoencoder: AutoencoderSpec,
    pub stats: LatentStats,
    pub latent_size: usize,
    pub in_channels: usize,
    pub num_classes: usize,
}

impl Assembly {
    /// The specification the inference runtime for `device` gets.
    pub fn runtime_spec(&self, device: usize, allow_tf32: bool) -> RuntimeSpec {
        RuntimeSpec {
            device,
            allow_tf32,
            model: self.model.clone(),
            autoencoder: self.autoencoder.clone(),
        }
    }
}

/// Where the checkpoint of `experiment` lives.
pub fn checkpoint_path(experiment: &Experiment) -> PathBuf {
    experiment
        .path
        .join(CHECKPOINT_DIR)
        .join(format!("{}.{CHECKPOINT_EXT}", experiment.step))
}

/// Where the latent statistics of a standalone autoencoder live.
///
/// `vae/sdvae.safetensors` becomes `vae/sdvae-latents-stats.safetensors`.
pub fn stats_path(vae_ckpt: &Path) -> PathBuf {
    let stem = vae_ckpt.file_stem().unwrap_or_default().to_string_lossy();
    let name = match vae_ckpt.extension() {
        Some(ext) => format!("{stem}-latents-stats.{}", ext.to_string_lossy()),
        None => format!("{stem}-latents-stats"),
    };

    vae_ckpt.with_file_name(name)
}

/// Resolves the model, the autoencoder and the latent statistics of an
/// experiment.
///
/// Only the checkpoint header and the statistic tensors are read, the weights
/// themselves are left for the runtime.
///
/// # Errors
/// Fails on unsupported variants, a missing or malformed checkpoint, or
/// statistics that don't match the latent channels.
pub fn assemble(config: &RunConfig, experiment: &Experiment) -> Result<Assembly> {
    let vae = config.autoencoder()?;
    let arch = config.architecture()?;
    let z_dims = config.z_dims()?;

    if config.num_classes == 0 || config.num_classes >= u32::MAX as usize {
        return Err(SamplerErr::UnsupportedModel(format!(
            "{} with {} classes",
            config.model, config.num_classes
        )));
    }

    let latent_size = vae.latent_size(config.resolution);
    let in_channels = vae.latent_channels();

    let path = checkpoint_path(experiment);
    let mut ckpt = Checkpoint::open(&path)?;

    if !ckpt.has_prefix(EMA_PREFIX) {
        return Err(SamplerErr::Checkpoint {
            path,
            detail: "no EMA weights".to_string(),
        });
    }

    let (stats, source) = if ckpt.has_prefix(VAE_PREFIX) {
        debug!(checkpoint:% = path.display(); "using the bundled autoencoder");
        let (_, var) = ckpt.read_f32(BN_RUNNING_VAR)?;
        let (_, mean) = ckpt.read_f32(BN_RUNNING_MEAN)?;

        let stats = LatentStats::from_running(Array1::from(var), Array1::from(mean));
        let source = AutoencoderSource::Bundled {
            checkpoint: path.clone(),
            prefix: VAE_PREFIX.to_string(),
        };

        (stats, source)
    } else {
        let vae_ckpt = config
            .vae_ckpt
            .clone()
            .ok_or_else(|| SamplerErr::Checkpoint {
                path: path.clone(),
                detail: "no bundled autoencoder and no vae_ckpt configured".to_string(),
            })?;

        let stats_file = stats_path(&vae_ckpt);
        debug!(stats:% = stats_file.display(); "using a standalone autoencoder");

        let mut tensors = checkpoint::read_small(&stats_file, &[STATS_SCALE, STATS_BIAS])?;
        let bias = tensors.pop().unwrap_or_default();
        let scale = tensors.pop().unwrap_or_default();

        let stats = LatentStats {
            scale: Array1::from(scale),
            bias: Array1::from(bias),
        };

        (stats, AutoencoderSource::Standalone { checkpoint: vae_ckpt })
    };

    for (what, len) in [("latent scale", stats.scale.len()), ("latent bias", stats.bias.len())] {
        if len != in_channels {
            return Err(SamplerErr::ShapeMismatch {
                what,
                got: vec![len],
                expected: vec![in_channels],
            });
        }
    }

    let model = ModelSpec {
        variant: config.model.clone(),
        depth: arch.depth,
        hidden_size: arch.hidden_size,
        num_heads: arch.num_heads,
        patch_size: arch.patch_size,
        input_size: latent_size,
        in_channels,
        num_classes: config.num_classes,
        class_dropout_prob: config.cfg_prob,
        z_dims,
        encoder_depth: config.encoder_depth,
        bn_momentum: config.bn_momentum,
        fused_attn: config.fused_attn,
        qk_norm: config.qk_norm,
        checkpoint: path,
        prefix: EMA_PREFIX.to_string(),
    };

    let autoencoder = AutoencoderSpec {
        variant: vae.name().to_string(),
        downsample: vae.downsample(),
        latent_channels: in_channels,
        source,
    };

    info!(model:% = model.variant, vae = autoencoder.variant.as_str(), latent_size = latent_size; "assembled model");

    Ok(Assembly {
        model,
        autoencoder,
        stats,
        latent_size,
        in_channels,
        num_classes: config.num_classes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, array};

    #[test]
    fn denormalize_scales_then_shifts_each_channel() {
        let stats = LatentStats {
            scale: array![2.0, 0.5],
            bias: array![1.0, -1.0],
        };

        let z = Array::from_shape_vec((1, 2, 1, 2), vec![4.0, 2.0, 1.0, 3.0]).unwrap();
        let out = stats.denormalize(&z).unwrap();

        assert_eq!(out.into_raw_vec_and_offset().0, vec![3.0, 2.0, 1.0, 5.0]);
    }

    #[test]
    fn denormalize_rejects_wrong_channel_count() {
        let stats = LatentStats {
            scale: array![1.0],
            bias: array![0.0],
        };

        let z = Array4::zeros((1, 4, 2, 2));
        assert!(matches!(
            stats.denormalize(&z),
            Err(SamplerErr::ShapeMismatch { what: "latents", .. })
        ));
    }

    #[test]
    fn running_variance_becomes_inverse_std() {
        let stats = LatentStats::from_running(array![4.0, 0.25], array![0.1, 0.2]);
        assert_eq!(stats.scale, array![0.5, 2.0]);
        assert_eq!(stats.bias, array![0.1, 0.2]);
    }

    #[test]
    fn stats_file_sits_next_to_the_autoencoder() {
        assert_eq!(
            stats_path(Path::new("vae/sdvae.safetensors")),
            PathBuf::from("vae/sdvae-latents-stats.safetensors")
        );
        assert_eq!(
            stats_path(Path::new("sdvae")),
            PathBuf::from("sdvae-latents-stats")
        );
    }

    #[test]
    fn checkpoint_path_uses_the_padded_step() {
        let exp = Experiment {
            path: PathBuf::from("exps/run"),
            step: "0004000".to_string(),
            defaulted: false,
        };

        assert_eq!(
            checkpoint_path(&exp),
            PathBuf::from("exps/run/checkpoints/0004000.safetensors")
        );
    }
}
