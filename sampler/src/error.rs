use std::{error::Error, fmt, io, path::PathBuf};

use process_group::GroupErr;

/// The sampler module's result type.
pub type Result<T> = std::result::Result<T, SamplerErr>;

/// Sampling pipeline failures. Every one of them aborts the run.
#[derive(Debug)]
pub enum SamplerErr {
    Io(io::Error),
    Group(GroupErr),
    Config {
        path: PathBuf,
        source: serde_json::Error,
    },
    InvalidOption(String),
    UnsupportedAutoencoder(String),
    UnsupportedModel(String),
    UnsupportedEncoder(String),
    Checkpoint {
        path: PathBuf,
        detail: String,
    },
    PlanOverflow {
        requested: usize,
        global_batch_size: usize,
    },
    NotDivisible {
        what: &'static str,
        value: usize,
        divisor: usize,
    },
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    Runtime(String),
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },
    MissingSample {
        index: usize,
        path: PathBuf,
    },
    MalformedSample {
        index: usize,
        detail: String,
    },
    EmptyArchive,
    Image(image::ImageError),
    Archive(zip::result::ZipError),
}

impl fmt::Display for SamplerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerErr::Io(e) => write!(f, "io error: {e}"),
            SamplerErr::Group(e) => write!(f, "process group error: {e}"),
            SamplerErr::Config { path, source } => {
                write!(f, "invalid config {}: {source}", path.display())
            }
            SamplerErr::InvalidOption(detail) => write!(f, "invalid option: {detail}"),
            SamplerErr::UnsupportedAutoencoder(name) => {
                write!(f, "unsupported autoencoder variant {name:?}")
            }
            SamplerErr::UnsupportedModel(name) => write!(f, "unsupported model variant {name:?}"),
            SamplerErr::UnsupportedEncoder(name) => write!(f, "unsupported encoder {name:?}"),
            SamplerErr::Checkpoint { path, detail } => {
                write!(f, "checkpoint {}: {detail}", path.display())
            }
            SamplerErr::PlanOverflow {
                requested,
                global_batch_size,
            } => write!(
                f,
                "{requested} samples in global batches of {global_batch_size} overflow"
            ),
            SamplerErr::NotDivisible {
                what,
                value,
                divisor,
            } => write!(f, "{what} ({value}) must be divisible by {divisor}"),
            SamplerErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(f, "shape mismatch for {what}: got {got:?}, expected {expected:?}"),
            SamplerErr::Runtime(detail) => write!(f, "inference runtime failed: {detail}"),
            SamplerErr::UnexpectedMessage { expected, got } => {
                write!(f, "unexpected message from runtime: expected {expected}, got {got}")
            }
            SamplerErr::MissingSample { index, path } => {
                write!(f, "sample {index} is missing at {}", path.display())
            }
            SamplerErr::MalformedSample { index, detail } => {
                write!(f, "sample {index} is malformed: {detail}")
            }
            SamplerErr::EmptyArchive => write!(f, "refusing to build an archive without samples"),
            SamplerErr::Image(e) => write!(f, "image error: {e}"),
            SamplerErr::Archive(e) => write!(f, "archive error: {e}"),
        }
    }
}

impl Error for SamplerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SamplerErr::Io(e) => Some(e),
            SamplerErr::Group(e) => Some(e),
            SamplerErr::Config { source, .. } => Some(source),
            SamplerErr::Image(e) => Some(e),
            SamplerErr::Archive(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SamplerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<GroupErr> for SamplerErr {
    fn from(value: GroupErr) -> Self {
        Self::Group(value)
    }
}

impl From<image::ImageError> for SamplerErr {
    fn from(value: image::ImageError) -> Self {
        Self::Image(value)
    }
}

impl From<zip::result::ZipError> for SamplerErr {
    fn from(value: zip::result::ZipError) -> Self {
        Self::Archive(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<SamplerErr> for io::Error {
    fn from(value: SamplerErr) -> Self {
        match value {
            SamplerErr::Io(e) => e,
            SamplerErr::Group(e) => e.into(),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
