//! Length prefixed framing and the messages exchanged between sampling ranks
//! and between a rank and its inference runtime.

mod deserialize;
mod frame;
pub mod msg;
mod receiver;
mod sender;
mod serialize;
pub mod specs;

use tokio::io::{AsyncRead, AsyncWrite};

pub use deserialize::Deserialize;
pub use frame::{MAX_FRAME_LEN, Word};
pub use receiver::FrameReceiver;
pub use sender::FrameSender;
pub use serialize::Serialize;

/// Wraps the two halves of a stream into a framed link.
///
/// # Arguments
/// * `rx` - The reading half.
/// * `tx` - The writing half.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}
