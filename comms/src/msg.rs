use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize, specs::runtime::RuntimeSpec};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_H: Header = 0;
const CONTROL_H: Header = 1;
const LATENTS_H: Header = 2;
const VELOCITY_H: Header = 3;
const PIXELS_H: Header = 4;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    Latents(&'a [f32]),
    Velocity(&'a [f32]),
    Pixels(&'a [f32]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    // Process group membership and collectives.
    Join { rank: usize, world_size: usize },
    Barrier { seq: u64 },
    Release { seq: u64 },
    Flag { value: bool },
    Disconnect,

    // Inference runtime.
    LoadModel(RuntimeSpec),
    Loaded { model_params: u64, projector_params: u64 },
    Forward { t: f32, labels: Vec<u32>, shape: [usize; 4] },
    Decode { shape: [usize; 4] },
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name of the message kind, used for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(_) => "control",
            Msg::Err(_) => "err",
            Msg::Data(Payload::Latents(_)) => "data/latents",
            Msg::Data(Payload::Velocity(_)) => "data/velocity",
            Msg::Data(Payload::Pixels(_)) => "data/pixels",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_H.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_H.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, &cmd).unwrap();
                None
            }
            Msg::Data(payload) => {
                let (kind, nums) = match payload {
                    Payload::Latents(nums) => (LATENTS_H, nums),
                    Payload::Velocity(nums) => (VELOCITY_H, nums),
                    Payload::Pixels(nums) => (PIXELS_H, nums),
                };

                buf.extend_from_slice(&kind.to_be_bytes());
                Some(bytemuck::cast_slice(nums))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        let buf: &'a [u8] = buf;
        let Some((kind_buf, rest)) = buf.split_first_chunk::<HEADER_SIZE>() else {
            return Self::buf_is_too_small(buf.len());
        };

        let kind = Header::from_be_bytes(*kind_buf);

        match kind {
            ERR_H => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_H => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            LATENTS_H | VELOCITY_H | PIXELS_H => {
                let nums: &'a [f32] = bytemuck::try_cast_slice(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, format!("{err:?}")))?;

                let payload = match kind {
                    LATENTS_H => Payload::Latents(nums),
                    VELOCITY_H => Payload::Velocity(nums),
                    _ => Payload::Pixels(nums),
                };

                Ok(Self::Data(payload))
            }
            other => Self::invalid_kind(other),
        }
    }
}
