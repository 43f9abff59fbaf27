use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf};

use clap::Parser;
use sampler::{Mode, PathType, SampleOptions, options::DEFAULT_BATCH_SIZE};

/// First port of the per device inference runtimes, device `i` listens at `base + i`.
pub const INFERENCE_PORT_BASE: u16 = 7600;

/// Samples a trained SiT experiment on every launched rank and packs the
/// result for FID evaluation.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    #[arg(long, default_value_t = 0)]
    pub global_seed: i64,

    /// Allow TF32 matmuls in the inference runtime.
    #[arg(long = "tf32", overrides_with = "no_tf32")]
    tf32: bool,

    #[arg(long = "no-tf32", overrides_with = "tf32")]
    no_tf32: bool,

    #[arg(long, default_value = "samples")]
    pub sample_dir: PathBuf,

    /// The experiment directory, holding `args.json` and `checkpoints/`.
    #[arg(long)]
    pub exp_path: Option<PathBuf>,

    /// The train step of the checkpoint to sample from.
    #[arg(long)]
    pub train_steps: Option<String>,

    /// Samples per rank and iteration.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub pproc_batch_size: NonZeroUsize,

    #[arg(long, default_value_t = 50_000)]
    pub num_fid_samples: usize,

    /// `ode` or `sde`.
    #[arg(long, default_value_t = Mode::Ode)]
    pub mode: Mode,

    #[arg(long, default_value_t = 1.5)]
    pub cfg_scale: f64,

    /// `linear` or `cosine`.
    #[arg(long, default_value_t = PathType::Linear)]
    pub path_type: PathType,

    #[arg(long, default_value_t = 50)]
    pub num_steps: usize,

    /// Use Heun's method, ODE only.
    #[arg(long = "heun", overrides_with = "no_heun")]
    heun: bool,

    #[arg(long = "no-heun", overrides_with = "heun")]
    no_heun: bool,

    #[arg(long, default_value_t = 0.0)]
    pub guidance_low: f64,

    #[arg(long, default_value_t = 1.0)]
    pub guidance_high: f64,

    /// The inference runtime to use, `127.0.0.1:7600 + device` by default.
    #[arg(long)]
    pub inference_addr: Option<SocketAddr>,
}

impl Args {
    pub fn options(&self) -> SampleOptions {
        SampleOptions {
            global_seed: self.global_seed,
            allow_tf32: self.tf32 || !self.no_tf32,
            sample_dir: self.sample_dir.clone(),
            exp_path: self.exp_path.clone(),
            train_steps: self.train_steps.clone(),
            batch_size: self.pproc_batch_size,
            num_fid_samples: self.num_fid_samples,
            mode: self.mode,
            cfg_scale: self.cfg_scale,
            path_type: self.path_type,
            num_steps: self.num_steps,
            heun: self.heun && !self.no_heun,
            guidance_low: self.guidance_low,
            guidance_high: self.guidance_high,
        }
    }

    /// Where the inference runtime of `device` listens.
    pub fn inference_addr(&self, device: usize) -> SocketAddr {
        self.inference_addr.unwrap_or_else(|| {
            let port = INFERENCE_PORT_BASE.saturating_add(device as u16);
            SocketAddr::from(([127, 0, 0, 1], port))
        })
    }
}
