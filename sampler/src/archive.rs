//! Packs a finished sample folder into a single `.npz` archive holding one
//! `uint8` array shaped `(N, H, W, 3)`, the format FID tooling reads.

use std::{
    ffi::OsString,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use image::DynamicImage;
use log::info;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::{Result, SamplerErr, layout::SampleLayout};

/// Name of the array inside the archive.
pub const ARRAY_ENTRY: &str = "arr_0.npy";
const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const NPY_VERSION: [u8; 2] = [1, 0];
const NPY_ALIGN: usize = 64;

/// A written archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub path: PathBuf,
    pub shape: [usize; 4],
}

/// Builds the archive of the first `requested` samples of `layout`.
///
/// Images are streamed one at a time into the archive, which is written next to
/// its final path and only renamed into place once complete.
///
/// # Errors
/// Fails with `SamplerErr::EmptyArchive` if nothing was requested, with
/// `SamplerErr::MissingSample` or `SamplerErr::MalformedSample` if a sample is
/// absent, not 8-bit RGB or not shaped like the first one.
pub fn build_npz(layout: &SampleLayout, requested: usize) -> Result<Archive> {
    if requested == 0 {
        return Err(SamplerErr::EmptyArchive);
    }

    let first = load_sample(layout, 0)?;
    let (width, height) = first.dimensions();
    let shape = [requested, height as usize, width as usize, 3];

    let path = layout.archive_path();
    let tmp = tmp_path(&path);

    let written = write_npz(&tmp, shape, first, |index| {
        let image = load_sample(layout, index)?;
        if image.dimensions() != (width, height) {
            return Err(SamplerErr::MalformedSample {
                index,
                detail: format!(
                    "shape {:?} differs from the first sample's {:?}",
                    image.dimensions(),
                    (width, height)
                ),
            });
        }

        Ok(image)
    });

    if let Err(e) = written.and_then(|_| fs::rename(&tmp, &path).map_err(SamplerErr::from)) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    info!(
        path:% = path.display(),
        shape:? = shape;
        "saved archive"
    );

    Ok(Archive { path, shape })
}

fn write_npz<F>(path: &Path, shape: [usize; 4], first: image::RgbImage, mut next: F) -> Result<()>
where
    F: FnMut(usize) -> Result<image::RgbImage>,
{
    let file = BufWriter::new(File::create(path)?);
    let mut zip = ZipWriter::new(file);

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .large_file(true);
    zip.start_file(ARRAY_ENTRY, options)?;

    zip.write_all(&npy_header(shape))?;
    zip.write_all(first.as_raw())?;
    for index in 1..shape[0] {
        zip.write_all(next(index)?.as_raw())?;
    }

    let mut file = zip.finish()?;
    file.flush()?;

    Ok(())
}

fn load_sample(layout: &SampleLayout, index: usize) -> Result<image::RgbImage> {
    let path = layout.sample_path(index);
    if !path.is_file() {
        return Err(SamplerErr::MissingSample { index, path });
    }

    match image::open(&path)? {
        DynamicImage::ImageRgb8(image) => Ok(image),
        other => Err(SamplerErr::MalformedSample {
            index,
            detail: format!("expected 8-bit RGB, got {:?}", other.color()),
        }),
    }
}

/// The `.npy` v1.0 header of a C ordered `uint8` array.
///
/// Padded with spaces so the data starts on a 64 byte boundary.
pub fn npy_header(shape: [usize; 4]) -> Vec<u8> {
    let [n, h, w, c] = shape;
    let mut dict =
        format!("{{'descr': '|u1', 'fortran_order': False, 'shape': ({n}, {h}, {w}, {c}), }}");

    let prefix_len = NPY_MAGIC.len() + NPY_VERSION.len() + size_of::<u16>();
    let unpadded = prefix_len + dict.len() + 1;
    let padding = unpadded.next_multiple_of(NPY_ALIGN) - unpadded;
    dict.extend(std::iter::repeat_n(' ', padding));
    dict.push('\n');

    let mut header = Vec::with_capacity(prefix_len + dict.len());
    header.extend_from_slice(NPY_MAGIC);
    header.extend_from_slice(&NPY_VERSION);
    header.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    header.extend_from_slice(dict.as_bytes());
    header
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
