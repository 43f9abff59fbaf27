use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use crate::options::{Experiment, SampleOptions};

pub const ARCHIVE_EXT: &str = ".npz";
pub const SAMPLE_EXT: &str = "png";

/// Where a run's samples and archive go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleLayout {
    dir: PathBuf,
}

impl SampleLayout {
    /// The layout for sampling `experiment` with `opts`.
    ///
    /// The directory is `<sample_dir>/<exp>_<step>_cfg<cfg>-<low>-<high>`, runs with
    /// different guidance never share a folder.
    pub fn new(opts: &SampleOptions, experiment: &Experiment) -> Self {
        let folder = format!(
            "{}_{}_cfg{}-{}-{}",
            experiment.name(),
            experiment.step,
            py_float(opts.cfg_scale),
            py_float(opts.guidance_low),
            py_float(opts.guidance_high),
        );

        Self {
            dir: opts.sample_dir.join(folder),
        }
    }

    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The archive, a sibling of the sample directory.
    pub fn archive_path(&self) -> PathBuf {
        let mut path = OsString::from(self.dir.as_os_str());
        path.push(ARCHIVE_EXT);
        PathBuf::from(path)
    }

    /// The image file of the sample with global index `index`.
    pub fn sample_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{index:06}.{SAMPLE_EXT}"))
    }
}

/// Renders a float the way the training tools name their folders.
///
/// Integral values keep a trailing `.0`, and exponents below -4 or from 16 up
/// switch to scientific notation with a signed exponent of at least two digits.
pub fn py_float(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let sci = format!("{v:e}");
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or_default();

    if (-4..16).contains(&exp) {
        if v.fract() == 0.0 {
            format!("{v:.1}")
        } else {
            format!("{v}")
        }
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    }
}
