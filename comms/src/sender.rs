use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    Serialize,
    frame::{self, LEN_TYPE_SIZE, LenType},
};

/// The sending end of a link.
pub struct FrameSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Frames `msg` and writes it out.
    ///
    /// The owned part of the message is framed in a reused buffer, a borrowed
    /// tail such as a latent batch goes straight to the writer.
    ///
    /// # Errors
    /// Fails on write errors and on messages larger than `MAX_FRAME_LEN`.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        self.buf.clear();
        self.buf.extend_from_slice(&[0; LEN_TYPE_SIZE]);

        let tail = msg.serialize(&mut self.buf);
        let len = self.buf.len() - LEN_TYPE_SIZE + tail.map_or(0, <[u8]>::len);
        frame::check_len(len)?;

        self.buf[..LEN_TYPE_SIZE].copy_from_slice(&(len as LenType).to_be_bytes());
        self.tx.write_all(&self.buf).await?;

        if let Some(tail) = tail {
            self.tx.write_all(tail).await?;
        }

        self.tx.flush().await
    }
}
