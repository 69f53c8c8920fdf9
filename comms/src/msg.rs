use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR: Header = 0;
const CONTROL: Header = 1;
const DATA: Header = 2;

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// A peer asks the host to be admitted into the group.
    Join { rank: usize, world_size: usize },
    /// The host admits every peer once the whole group has joined.
    Welcome { world_size: usize },
    /// A rank reached the `seq`-th barrier.
    Barrier { seq: u64 },
    /// Every rank reached the `seq`-th barrier.
    Release { seq: u64 },
    Disconnect,
}

/// The application layer message for the collective group.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(&'a [f32]),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// Short name of the message kind, used in error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Join { .. }) => "control/join",
            Msg::Control(Command::Welcome { .. }) => "control/welcome",
            Msg::Control(Command::Barrier { .. }) => "control/barrier",
            Msg::Control(Command::Release { .. }) => "control/release",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(_) => "data",
            Msg::Err(_) => "err",
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
                buf.extend_from_slice(&ERR.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL.to_be_bytes());

                // `Command` derives its impl and holds no maps, writing into a vec can't fail.
                if let Err(e) = serde_json::to_writer(&mut *buf, cmd) {
                    unreachable!("failed to serialize command {cmd:?}: {e}");
                }

                None
            }
            Msg::Data(nums) => {
                buf.extend_from_slice(&DATA.to_be_bytes());
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
        let mut kind = [0; HEADER_SIZE];
        kind.copy_from_slice(kind_buf);

        match Header::from_be_bytes(kind) {
            ERR => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            DATA => {
                let nums = bytemuck::try_cast_slice(rest)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{e:?}")))?;

                Ok(Self::Data(nums))
            }
            other => Self::invalid_kind(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &Msg<'_>) -> Vec<u32> {
        let mut head = Vec::new();
        let tail = msg.serialize(&mut head).unwrap_or_default();
        head.extend_from_slice(tail);

        // Receivers read frames into 4 byte aligned buffers.
        let mut words = vec![0u32; head.len().div_ceil(4)];
        bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..head.len()].copy_from_slice(&head);
        words.truncate(head.len() / 4);
        words
    }

    #[test]
    fn control_commands_travel_as_json() {
        let msg = Msg::Control(Command::Barrier { seq: 7 });
        let mut buf = Vec::new();
        assert!(msg.serialize(&mut buf).is_none());
        assert_eq!(&buf[HEADER_SIZE..], br#"{"barrier":{"seq":7}}"#);

        let msg = Msg::deserialize(&mut buf).unwrap();
        assert!(matches!(msg, Msg::Control(Command::Barrier { seq: 7 })));
    }

    #[test]
    fn data_payload_is_borrowed_zero_copy() {
        let values = [1.5f32, -2.0, 3.25];
        let msg = Msg::Data(&values);

        let mut words = roundtrip(&msg);
        let bytes = bytemuck::cast_slice_mut(&mut words);

        match Msg::deserialize(bytes).unwrap() {
            Msg::Data(got) => assert_eq!(got, values),
            other => panic!("unexpected msg: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut buf = 9u32.to_be_bytes().to_vec();
        assert!(Msg::deserialize(&mut buf).is_err());
    }

    #[test]
    fn short_frame_is_rejected() {
        let mut buf = vec![0u8; 2];
        assert!(Msg::deserialize(&mut buf).is_err());
    }
}
