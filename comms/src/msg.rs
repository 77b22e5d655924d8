use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize, specs::group::JoinSpec};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_H: Header = 0;
const CONTROL_H: Header = 1;
const GRAD_H: Header = 2;
const PARAMS_H: Header = 3;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// A local contribution travelling towards the root of the group.
    Gradient(&'a [f32]),
    /// A reduced or broadcast buffer travelling away from the root of the group.
    Params(&'a [f32]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Join(JoinSpec),
    Welcome,
    Barrier,
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// Returns a stable, human readable name for the kind of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Join(_)) => "control/join",
            Msg::Control(Command::Welcome) => "control/welcome",
            Msg::Control(Command::Barrier) => "control/barrier",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Gradient(_)) => "data/gradient",
            Msg::Data(Payload::Params(_)) => "data/params",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(kind: Header) -> io::Result<T> {
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
                    Payload::Gradient(grad) => (GRAD_H, *grad),
                    Payload::Params(params) => (PARAMS_H, *params),
                };

                buf.extend_from_slice(&kind.to_be_bytes());
                Some(bytemuck::cast_slice(nums))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at_mut(HEADER_SIZE);

        // SAFETY: We splitted the buffer to be of size `HEADER_SIZE` just above.
        let kind = Header::from_be_bytes(kind_buf.try_into().unwrap());

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
            GRAD_H | PARAMS_H => {
                let nums: &'a [f32] = bytemuck::try_cast_slice_mut::<u8, f32>(rest).map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("malformed numeric payload: {e}"),
                    )
                })?;

                let payload = match kind {
                    GRAD_H => Payload::Gradient(nums),
                    _ => Payload::Params(nums),
                };

                Ok(Self::Data(payload))
            }
            other => Self::invalid_kind_byte(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lays `msg` out the way a receiver sees it: header and payload in one aligned buffer.
    fn frame(msg: &Msg<'_>) -> (Vec<u32>, usize) {
        let mut bytes = Vec::new();
        let tail = msg.serialize(&mut bytes).map(<[u8]>::to_vec);
        bytes.extend(tail.unwrap_or_default());

        let mut words = vec![0u32; bytes.len().div_ceil(4)];
        bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..bytes.len()].copy_from_slice(&bytes);
        (words, bytes.len())
    }

    #[test]
    fn join_command_survives_the_wire() {
        let spec = JoinSpec {
            rank: 2,
            world_size: 4,
        };
        let (mut words, len) = frame(&Msg::Control(Command::Join(spec)));
        let bytes = &mut bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..len];

        match Msg::deserialize(bytes).unwrap() {
            Msg::Control(Command::Join(got)) => assert_eq!(got, spec),
            other => panic!("unexpected msg: {other:?}"),
        }
    }

    #[test]
    fn params_payload_keeps_its_values() {
        let params = [0.25_f32, -1.5, 3.0];
        let (mut words, len) = frame(&Msg::Data(Payload::Params(&params)));
        let bytes = &mut bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..len];

        match Msg::deserialize(bytes).unwrap() {
            Msg::Data(Payload::Params(got)) => assert_eq!(got, &params),
            other => panic!("unexpected msg: {other:?}"),
        }
    }

    #[test]
    fn gradient_payload_is_not_copied_into_the_header() {
        let grad = [1.0_f32, -2.0, 0.5];
        let msg = Msg::Data(Payload::Gradient(&grad));

        let mut head = Vec::new();
        let tail = msg.serialize(&mut head).unwrap();

        assert_eq!(head.len(), HEADER_SIZE);
        assert_eq!(tail.len(), grad.len() * size_of::<f32>());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut bytes = 9u32.to_be_bytes();
        let err = Msg::deserialize(&mut bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_numeric_payload_is_rejected() {
        let mut words = [0u32; 2];
        let bytes = bytemuck::cast_slice_mut::<u32, u8>(&mut words);
        bytes[..HEADER_SIZE].copy_from_slice(&GRAD_H.to_be_bytes());

        let err = Msg::deserialize(&mut bytes[..HEADER_SIZE + 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
