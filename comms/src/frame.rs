//! Frame level constants and the element types of receive buffers.
//!
//! A frame is a big endian `u64` length followed by that many bytes, the first
//! four of them being the message kind.

use std::io;

pub(crate) type LenType = u64;
pub(crate) const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// The largest frame either end accepts.
///
/// A batch of 256 decoded 512x512 images in `f32` is about 800 MiB, anything
/// above this bound is a corrupted length header.
pub const MAX_FRAME_LEN: usize = 1 << 31;

/// Element type of a receive buffer.
///
/// Buffers of these are at least 4 byte aligned, so `f32` payloads right
/// after the 4 byte kind header can be viewed in place.
pub trait Word: bytemuck::Pod {}

impl Word for u32 {}
impl Word for f32 {}
impl Word for u64 {}
impl Word for f64 {}

pub(crate) fn check_len(len: usize) -> io::Result<()> {
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} bytes limit"),
        ));
    }

    Ok(())
}
