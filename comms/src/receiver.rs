use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    Deserialize,
    frame::{self, LEN_TYPE_SIZE, LenType, Word},
};

/// The receiving end of a link.
pub struct FrameReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Waits for the next frame and decodes it.
    ///
    /// # Arguments
    /// * `buf` - Where the frame is read into, the returned `T` may borrow
    ///   from it. It is resized to fit the frame and can be reused.
    ///
    /// # Errors
    /// Fails on read errors, closed links, frames larger than `MAX_FRAME_LEN`
    /// and frames `T` can't be decoded from.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Word,
    {
        let mut len_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut len_buf).await?;

        let len = usize::try_from(LenType::from_be_bytes(len_buf))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        frame::check_len(len)?;

        buf.clear();
        buf.resize(len.div_ceil(size_of::<B>()), bytemuck::Zeroable::zeroed());

        let bytes = &mut bytemuck::cast_slice_mut::<B, u8>(buf)[..len];
        self.rx.read_exact(bytes).await?;

        T::deserialize(bytes)
    }
}
