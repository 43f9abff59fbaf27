//! Selective reads out of safetensors checkpoints.
//!
//! Model checkpoints are large and the sampler only ever needs a handful of
//! small tensors out of them, so only the header is parsed and tensors are read
//! one by one at their offsets.

use std::{
    fs::{self, File},
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use safetensors::{Dtype, SafeTensors, tensor::Metadata};

use crate::{Result, SamplerErr};

const HEADER_LEN_SIZE: usize = size_of::<u64>();
const MAX_HEADER_SIZE: u64 = 100 * 1024 * 1024;

/// An opened checkpoint with its tensor index.
pub struct Checkpoint {
    path: PathBuf,
    file: File,
    data_start: u64,
    metadata: Metadata,
}

impl Checkpoint {
    /// Opens `path` and reads its header.
    ///
    /// # Errors
    /// Returns `SamplerErr::Checkpoint` if the file is missing or its header is
    /// not a valid safetensors header.
    pub fn open(path: &Path) -> Result<Self> {
        let fail = |detail: String| SamplerErr::Checkpoint {
            path: path.to_path_buf(),
            detail,
        };

        let mut file = File::open(path).map_err(|e| fail(e.to_string()))?;

        let mut len_buf = [0; HEADER_LEN_SIZE];
        file.read_exact(&mut len_buf)
            .map_err(|e| fail(format!("can't read header length: {e}")))?;

        let header_len = u64::from_le_bytes(len_buf);
        if header_len > MAX_HEADER_SIZE {
            return Err(fail(format!("header of {header_len} bytes is too large")));
        }

        let mut header = vec![0; header_len as usize];
        file.read_exact(&mut header)
            .map_err(|e| fail(format!("truncated header: {e}")))?;

        let metadata: Metadata =
            serde_json::from_slice(&header).map_err(|e| fail(format!("invalid header: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            data_start: HEADER_LEN_SIZE as u64 + header_len,
            metadata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether any tensor name starts with `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.metadata
            .tensors()
            .keys()
            .any(|name| name.starts_with(prefix))
    }

    /// Reads the tensor `name` converted to `f32`.
    ///
    /// # Returns
    /// The tensor's shape and its elements in row-major order.
    pub fn read_f32(&mut self, name: &str) -> Result<(Vec<usize>, Vec<f32>)> {
        let tensors = self.metadata.tensors();
        let info = tensors.get(name).ok_or_else(|| SamplerErr::Checkpoint {
            path: self.path.clone(),
            detail: format!("missing tensor {name}"),
        })?;

        let (begin, end) = info.data_offsets;
        let dtype = info.dtype;
        let shape = info.shape.clone();

        let mut bytes = vec![0; end.saturating_sub(begin)];
        self.file
            .seek(SeekFrom::Start(self.data_start + begin as u64))
            .and_then(|_| self.file.read_exact(&mut bytes))
            .map_err(|e| SamplerErr::Checkpoint {
                path: self.path.clone(),
                detail: format!("can't read tensor {name}: {e}"),
            })?;

        let values = to_f32(dtype, &bytes).ok_or_else(|| SamplerErr::Checkpoint {
            path: self.path.clone(),
            detail: format!("tensor {name} has unsupported dtype {dtype:?}"),
        })?;

        Ok((shape, values))
    }
}

/// Reads every requested tensor of a small safetensors file at once.
///
/// # Returns
/// The tensors' elements converted to `f32`, in the order of `names`.
pub fn read_small(path: &Path, names: &[&str]) -> Result<Vec<Vec<f32>>> {
    let fail = |detail: String| SamplerErr::Checkpoint {
        path: path.to_path_buf(),
        detail,
    };

    let bytes = fs::read(path).map_err(|e| fail(e.to_string()))?;
    let tensors = SafeTensors::deserialize(&bytes).map_err(|e| fail(format!("{e:?}")))?;

    names
        .iter()
        .map(|name| {
            let view = tensors
                .tensor(name)
                .map_err(|e| fail(format!("missing tensor {name}: {e:?}")))?;

            to_f32(view.dtype(), view.data())
                .ok_or_else(|| fail(format!("tensor {name} has unsupported dtype {:?}", view.dtype())))
        })
        .collect()
}

/// Converts little endian tensor bytes into `f32`s.
///
/// # Returns
/// `None` for dtypes that are not floating point.
fn to_f32(dtype: Dtype, bytes: &[u8]) -> Option<Vec<f32>> {
    let values = match dtype {
        Dtype::F32 => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Dtype::F64 => bytes
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
            .collect(),
        Dtype::F16 => bytes
            .chunks_exact(2)
            .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        Dtype::BF16 => bytes
            .chunks_exact(2)
            .map(|b| half::bf16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        _ => return None,
    };

    Some(values)
}
