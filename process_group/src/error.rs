use std::{error::Error, fmt, io};

/// The process group module's result type.
pub type Result<T> = std::result::Result<T, GroupErr>;

/// Process group failures, all of them fatal for the run.
#[derive(Debug)]
pub enum GroupErr {
    Io(io::Error),
    NoDevice,
    InvalidEnv {
        var: &'static str,
        value: String,
    },
    InvalidRank {
        rank: usize,
        world_size: usize,
    },
    Handshake(String),
    UnexpectedMessage {
        rank: usize,
        expected: &'static str,
        got: String,
    },
    Remote(String),
}

impl fmt::Display for GroupErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupErr::Io(e) => write!(f, "io error: {e}"),
            GroupErr::NoDevice => write!(
                f,
                "sampling requires at least one accelerator device, none is visible"
            ),
            GroupErr::InvalidEnv { var, value } => {
                write!(f, "invalid value {value:?} for environment variable {var}")
            }
            GroupErr::InvalidRank { rank, world_size } => {
                write!(f, "rank {rank} is out of range for a world of size {world_size}")
            }
            GroupErr::Handshake(detail) => write!(f, "group handshake failed: {detail}"),
            GroupErr::UnexpectedMessage {
                rank,
                expected,
                got,
            } => write!(
                f,
                "unexpected message from rank {rank}: expected {expected}, got {got}"
            ),
            GroupErr::Remote(detail) => write!(f, "another rank failed: {detail}"),
        }
    }
}

impl Error for GroupErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GroupErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for GroupErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<GroupErr> for io::Error {
    fn from(value: GroupErr) -> Self {
        match value {
            GroupErr::Io(e) => e,
            GroupErr::NoDevice => io::Error::new(io::ErrorKind::NotFound, value),
            other => io::Error::other(other),
        }
    }
}
