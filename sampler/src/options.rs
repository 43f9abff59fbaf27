use std::{fmt, num::NonZeroUsize, path::PathBuf, str::FromStr};

use crate::{Result, SamplerErr};

/// Experiment used when either the experiment path or the train step is missing.
pub const DEFAULT_EXP_PATH: &str = "pretrained/sit-xl-dinov2-b-enc8-repae-sdvae-0.5-1.5-400k";
pub const DEFAULT_TRAIN_STEPS: &str = "400000";

const STEP_WIDTH: usize = 7;
pub const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(256).unwrap();

/// Integration strategy for the reverse process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Deterministic probability flow.
    Ode,
    /// Stochastic Euler–Maruyama.
    Sde,
}

impl FromStr for Mode {
    type Err = SamplerErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ode" => Ok(Self::Ode),
            "sde" => Ok(Self::Sde),
            other => Err(SamplerErr::InvalidOption(format!(
                "unsupported sampling mode {other:?}, expected ode or sde"
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Ode => "ode",
            Mode::Sde => "sde",
        })
    }
}

/// Interpolation between data and noise the model was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathType {
    Linear,
    Cosine,
}

impl FromStr for PathType {
    type Err = SamplerErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Self::Linear),
            "cosine" => Ok(Self::Cosine),
            other => Err(SamplerErr::InvalidOption(format!(
                "unsupported path type {other:?}, expected linear or cosine"
            ))),
        }
    }
}

impl fmt::Display for PathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PathType::Linear => "linear",
            PathType::Cosine => "cosine",
        })
    }
}

/// Everything a sampling run is parameterized with.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOptions {
    pub global_seed: i64,
    pub allow_tf32: bool,
    pub sample_dir: PathBuf,
    pub exp_path: Option<PathBuf>,
    pub train_steps: Option<String>,
    /// Samples drawn per worker and iteration.
    pub batch_size: NonZeroUsize,
    pub num_fid_samples: usize,
    pub mode: Mode,
    pub cfg_scale: f64,
    pub path_type: PathType,
    pub num_steps: usize,
    pub heun: bool,
    pub guidance_low: f64,
    pub guidance_high: f64,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            global_seed: 0,
            allow_tf32: true,
            sample_dir: PathBuf::from("samples"),
            exp_path: None,
            train_steps: None,
            batch_size: DEFAULT_BATCH_SIZE,
            num_fid_samples: 50_000,
            mode: Mode::Ode,
            cfg_scale: 1.5,
            path_type: PathType::Linear,
            num_steps: 50,
            heun: false,
            guidance_low: 0.0,
            guidance_high: 1.0,
        }
    }
}

/// The experiment a run samples from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Experiment {
    pub path: PathBuf,
    /// The train step, zero padded.
    pub step: String,
    /// Whether the default experiment replaced an incomplete selection.
    pub defaulted: bool,
}

impl Experiment {
    /// The experiment's directory name.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl SampleOptions {
    /// Rejects option combinations that can't be sampled.
    ///
    /// Runs before anything expensive happens: joining the group, loading
    /// checkpoints or drawing noise.
    pub fn validate(&self) -> Result<()> {
        if !(self.cfg_scale >= 1.0) {
            return Err(SamplerErr::InvalidOption(format!(
                "cfg_scale should be >= 1.0, got {}",
                self.cfg_scale
            )));
        }

        if self.heun && self.mode != Mode::Ode {
            return Err(SamplerErr::InvalidOption(
                "Heun's method is only available for ODE sampling".to_string(),
            ));
        }

        if self.num_steps == 0 {
            return Err(SamplerErr::InvalidOption(
                "at least one solver step is required".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolves the experiment to sample from.
    ///
    /// Both the path and the train step are needed, if either is missing the
    /// default pretrained experiment is used instead.
    pub fn experiment(&self) -> Experiment {
        let (path, step, defaulted) = match (&self.exp_path, &self.train_steps) {
            (Some(path), Some(step)) => (path.clone(), step.as_str(), false),
            _ => (PathBuf::from(DEFAULT_EXP_PATH), DEFAULT_TRAIN_STEPS, true),
        };

        Experiment {
            path,
            step: zfill(step, STEP_WIDTH),
            defaulted,
        }
    }
}

/// Left pads `s` with zeros up to `width`, keeping a leading sign in front.
fn zfill(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if len >= width {
        return s.to_string();
    }

    let zeros = "0".repeat(width - len);
    match s.strip_prefix(['+', '-']) {
        Some(rest) => format!("{}{zeros}{rest}", &s[..1]),
        None => format!("{zeros}{s}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        SampleOptions::default().validate().unwrap();
    }

    #[test]
    fn guidance_scale_below_one_is_rejected() {
        let opts = SampleOptions {
            cfg_scale: 0.5,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(SamplerErr::InvalidOption(_))));

        let opts = SampleOptions {
            cfg_scale: f64::NAN,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn heun_requires_ode() {
        let opts = SampleOptions {
            mode: Mode::Sde,
            heun: true,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(SamplerErr::InvalidOption(_))));

        let opts = SampleOptions {
            mode: Mode::Ode,
            heun: true,
            ..Default::default()
        };
        opts.validate().unwrap();
    }

    #[test]
    fn modes_and_paths_parse() {
        assert_eq!("ode".parse::<Mode>().unwrap(), Mode::Ode);
        assert_eq!("sde".parse::<Mode>().unwrap(), Mode::Sde);
        assert!("ddim".parse::<Mode>().is_err());
        assert_eq!("cosine".parse::<PathType>().unwrap(), PathType::Cosine);
        assert!("vp".parse::<PathType>().is_err());
    }

    #[test]
    fn incomplete_experiment_falls_back_to_default() {
        let opts = SampleOptions {
            exp_path: Some(PathBuf::from("exps/mine")),
            ..Default::default()
        };
        let exp = opts.experiment();
        assert!(exp.defaulted);
        assert_eq!(exp.path, PathBuf::from(DEFAULT_EXP_PATH));
        assert_eq!(exp.step, "0400000");

        let opts = SampleOptions {
            exp_path: Some(PathBuf::from("exps/mine")),
            train_steps: Some("25000".to_string()),
            ..Default::default()
        };
        let exp = opts.experiment();
        assert!(!exp.defaulted);
        assert_eq!(exp.name(), "mine");
        assert_eq!(exp.step, "0025000");
    }

    #[test]
    fn zfill_keeps_sign_and_long_values() {
        assert_eq!(zfill("42", 5), "00042");
        assert_eq!(zfill("-42", 5), "-0042");
        assert_eq!(zfill("12345678", 7), "12345678");
    }
}
