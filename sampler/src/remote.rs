//! A `Runtime` served by an inference process over the `comms` protocol.
//!
//! The node sends the runtime specification once, then every forward pass and
//! every decode is a request made of a control command followed by the latents.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use comms::{
    FrameReceiver, FrameSender,
    msg::{Command, Msg, Payload},
    specs::runtime::RuntimeSpec,
};
use log::{debug, info};
use ndarray::Array4;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
    time,
};

use crate::{
    Result, SamplerErr,
    model::{Decoder, Loaded, Runtime, VelocityModel},
};

const PIXEL_CHANNELS: usize = 3;
const DIAL_ATTEMPTS: u32 = 150;
const DIAL_BACKOFF: Duration = Duration::from_millis(200);

struct Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rx: FrameReceiver<R>,
    tx: FrameSender<W>,
    buf: Vec<u32>,
}

impl<R, W> Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Sends `command` followed by `latents` and waits for the answer.
    ///
    /// # Returns
    /// The answer's elements shaped as `shape`.
    async fn request(
        &mut self,
        command: Command,
        latents: &Array4<f32>,
        expected: &'static str,
        shape: [usize; 4],
    ) -> Result<Array4<f32>> {
        let latents = latents.as_standard_layout();
        let data = latents
            .as_slice()
            .ok_or_else(|| SamplerErr::Runtime("latents are not contiguous".to_string()))?;

        self.tx.send(&Msg::Control(command)).await?;
        self.tx.send(&Msg::Data(Payload::Latents(data))).await?;

        let Self { rx, buf, .. } = self;
        let msg: Msg = rx.recv_into(buf).await?;
        let kind = msg.kind();

        match msg {
            Msg::Data(Payload::Velocity(values) | Payload::Pixels(values)) if kind == expected => {
                Array4::from_shape_vec(shape, values.to_vec()).map_err(|_| {
                    SamplerErr::ShapeMismatch {
                        what: expected,
                        got: vec![values.len()],
                        expected: shape.to_vec(),
                    }
                })
            }
            Msg::Err(detail) => Err(SamplerErr::Runtime(detail.into_owned())),
            _ => Err(SamplerErr::UnexpectedMessage {
                expected,
                got: kind,
            }),
        }
    }
}

/// Runs the model and the autoencoder in a separate inference process.
pub struct RemoteRuntime<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    link: Link<R, W>,
}

impl<R, W> RemoteRuntime<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a runtime over an established connection to an inference process.
    pub fn new(rx: R, tx: W) -> Self {
        let (rx, tx) = comms::channel(rx, tx);
        Self {
            link: Link {
                rx,
                tx,
                buf: Vec::new(),
            },
        }
    }
}

impl<R, W> Runtime for RemoteRuntime<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    type Model = RemoteModel<R, W>;
    type Decoder = RemoteDecoder<R, W>;

    async fn load(mut self, spec: RuntimeSpec) -> Result<Loaded<Self::Model, Self::Decoder>> {
        let downsample = spec.autoencoder.downsample;
        debug!(device = spec.device; "loading model in the inference runtime");

        self.link.tx.send(&Msg::Control(Command::LoadModel(spec))).await?;

        let Link { rx, buf, .. } = &mut self.link;
        let msg: Msg = rx.recv_into(buf).await?;

        let (model_params, projector_params) = match msg {
            Msg::Control(Command::Loaded {
                model_params,
                projector_params,
            }) => (model_params, projector_params),
            Msg::Err(detail) => return Err(SamplerErr::Runtime(detail.into_owned())),
            other => {
                return Err(SamplerErr::UnexpectedMessage {
                    expected: "loaded",
                    got: other.kind(),
                });
            }
        };

        let link = Arc::new(Mutex::new(self.link));
        Ok(Loaded {
            model: RemoteModel { link: link.clone() },
            decoder: RemoteDecoder { link, downsample },
            model_params,
            projector_params,
        })
    }
}

/// A `RemoteRuntime` reached over TCP, dialed only once the weights are needed.
///
/// Runs that end early, such as one whose archive already exists, never
/// touch the inference process.
pub struct TcpRuntime {
    addr: SocketAddr,
    attempts: u32,
    backoff: Duration,
}

impl TcpRuntime {
    /// Creates a runtime for the inference process listening at `addr`.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            attempts: DIAL_ATTEMPTS,
            backoff: DIAL_BACKOFF,
        }
    }

    /// Overrides how many times and how often the inference process is dialed.
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    /// Connects to the inference process, waiting for it to come up.
    async fn dial(&self) -> io::Result<TcpStream> {
        let addr = self.addr;
        let mut attempt = 0;
        loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) if attempt + 1 < self.attempts => {
                    debug!(attempt = attempt; "inference runtime at {addr} not reachable yet: {e}");
                    attempt += 1;
                    time::sleep(self.backoff).await;
                }
                Err(e) => {
                    return Err(io::Error::new(
                        e.kind(),
                        format!("inference runtime at {addr} unreachable: {e}"),
                    ));
                }
            }
        }
    }
}

impl Runtime for TcpRuntime {
    type Model = RemoteModel<OwnedReadHalf, OwnedWriteHalf>;
    type Decoder = RemoteDecoder<OwnedReadHalf, OwnedWriteHalf>;

    async fn load(self, spec: RuntimeSpec) -> Result<Loaded<Self::Model, Self::Decoder>> {
        let (rx, tx) = self.dial().await?.into_split();
        info!(device = spec.device; "connected to the inference runtime at {}", self.addr);

        RemoteRuntime::new(rx, tx).load(spec).await
    }
}

/// The velocity model half of a loaded `RemoteRuntime`.
pub struct RemoteModel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    link: Arc<Mutex<Link<R, W>>>,
}

impl<R, W> VelocityModel for RemoteModel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn forward(&mut self, x: &Array4<f32>, t: f32, labels: &[u32]) -> Result<Array4<f32>> {
        let (n, c, h, w) = x.dim();
        let shape = [n, c, h, w];
        let command = Command::Forward {
            t,
            labels: labels.to_vec(),
            shape,
        };

        let mut link = self.link.lock().await;
        link.request(command, x, "data/velocity", shape).await
    }
}

/// The decoder half of a loaded `RemoteRuntime`.
pub struct RemoteDecoder<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    link: Arc<Mutex<Link<R, W>>>,
    downsample: usize,
}

impl<R, W> Decoder for RemoteDecoder<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn decode(&mut self, latents: &Array4<f32>) -> Result<Array4<f32>> {
        let (n, c, h, w) = latents.dim();
        let pixels = [n, PIXEL_CHANNELS, h * self.downsample, w * self.downsample];

        let mut link = self.link.lock().await;
        link.request(Command::Decode { shape: [n, c, h, w] }, latents, "data/pixels", pixels)
            .await
    }
}
