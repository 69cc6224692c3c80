use std::{fmt, io};

use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR: Header = 0;
const CONTROL: Header = 1;
const DELTA: Header = 2;
const BLOCKS: Header = 3;

/// Metadata sent along with a delta for a single parameter block.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
pub struct DeltaMeta {
    /// The parameter block identifier.
    pub id: String,
    /// The version of the block the delta was computed against.
    pub base_version: u64,
    /// Per worker push sequence number, used to drop replayed retries.
    pub seq: u64,
}

/// Metadata for one block inside a `Payload::Blocks` message.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
pub struct BlockMeta {
    pub id: String,
    pub version: u64,
    pub len: usize,
}

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug)]
pub enum Payload<'a> {
    /// A worker's update for a single block.
    Delta { meta: DeltaMeta, delta: &'a [f32] },
    /// The answer to a pull, the values of every block laid out back to back.
    Blocks { meta: Vec<BlockMeta>, values: &'a [f32] },
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// `incarnation` is random per worker process, a new one resets the push ledger.
    Connect { task_index: usize, incarnation: u64 },
    Pull { ids: Vec<String> },
    Pushed { version: u64, stop: bool },
    Stop,
    Disconnect,
}

/// The errors a parameter server reports back to a worker.
#[derive(Debug, Clone, PartialEq, Eq, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErr {
    UnknownParameter {
        id: String,
    },
    SizeMismatch {
        id: String,
        expected: usize,
        got: usize,
    },
    StepLimitReached {
        limit: u64,
    },
    Protocol {
        detail: String,
    },
}

impl fmt::Display for RemoteErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownParameter { id } => write!(f, "unknown parameter {id:?}"),
            Self::SizeMismatch { id, expected, got } => {
                write!(f, "size mismatch for {id:?}: expected {expected}, got {got}")
            }
            Self::StepLimitReached { limit } => write!(f, "step limit {limit} reached"),
            Self::Protocol { detail } => write!(f, "protocol error: {detail}"),
        }
    }
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(RemoteErr),
}

impl Msg<'_> {
    /// Returns a short name of the message kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(_) => "control",
            Msg::Data(Payload::Delta { .. }) => "data/delta",
            Msg::Data(Payload::Blocks { .. }) => "data/blocks",
            Msg::Err(_) => "err",
        }
    }

    fn invalid_data<T>(detail: impl Into<String>) -> io::Result<T> {
        Err(io::Error::new(io::ErrorKind::InvalidData, detail.into()))
    }
}

/// Writes `meta` prefixed by its length, padded with whitespace so the data after it
/// keeps a 4 byte alignment.
fn write_meta<T: SerdeSerialize>(buf: &mut Vec<u8>, meta: &T) -> io::Result<()> {
    let len_at = buf.len();
    buf.extend_from_slice(&[0; HEADER_SIZE]);

    let meta_start = buf.len();
    serde_json::to_writer(&mut *buf, meta)?;
    while buf.len() % size_of::<f32>() != 0 {
        buf.push(b' ');
    }

    let meta_len = (buf.len() - meta_start) as Header;
    buf[len_at..meta_start].copy_from_slice(&meta_len.to_be_bytes());
    Ok(())
}

/// Splits a data body into its JSON metadata and the trailing values.
fn read_meta<'a, T: SerdeDeserialize<'a>>(buf: &'a [u8]) -> io::Result<(T, &'a [f32])> {
    if buf.len() < HEADER_SIZE {
        return Msg::invalid_data("data message is missing its metadata length");
    }

    let (len_buf, rest) = buf.split_at(HEADER_SIZE);
    let mut len_bytes = [0; HEADER_SIZE];
    len_bytes.copy_from_slice(len_buf);
    let meta_len = Header::from_be_bytes(len_bytes) as usize;

    if rest.len() < meta_len {
        return Msg::invalid_data(format!(
            "metadata length {meta_len} exceeds the remaining {} bytes",
            rest.len()
        ));
    }

    let (meta_buf, data) = rest.split_at(meta_len);
    let meta = serde_json::from_slice(meta_buf)?;
    let values = bytemuck::try_cast_slice(data)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("bad f32 data: {e}")))?;

    Ok((meta, values))
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR.to_be_bytes());
                serde_json::to_writer(buf, e)?;
                Ok(None)
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL.to_be_bytes());
                serde_json::to_writer(buf, cmd)?;
                Ok(None)
            }
            Msg::Data(Payload::Delta { meta, delta }) => {
                buf.extend_from_slice(&DELTA.to_be_bytes());
                write_meta(buf, meta)?;
                Ok(Some(bytemuck::cast_slice(delta)))
            }
            Msg::Data(Payload::Blocks { meta, values }) => {
                buf.extend_from_slice(&BLOCKS.to_be_bytes());
                write_meta(buf, meta)?;
                Ok(Some(bytemuck::cast_slice(values)))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::invalid_data(format!(
                "the given buffer is too small {}, must at least be {HEADER_SIZE} bytes",
                buf.len()
            ));
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);
        let mut kind_bytes = [0; HEADER_SIZE];
        kind_bytes.copy_from_slice(kind_buf);

        match Header::from_be_bytes(kind_bytes) {
            ERR => Ok(Self::Err(serde_json::from_slice(rest)?)),
            CONTROL => Ok(Self::Control(serde_json::from_slice(rest)?)),
            DELTA => {
                let (meta, delta) = read_meta(rest)?;
                Ok(Self::Data(Payload::Delta { meta, delta }))
            }
            BLOCKS => {
                let (meta, values): (Vec<BlockMeta>, _) = read_meta(rest)?;

                let expected: usize = meta.iter().map(|b| b.len).sum();
                if expected != values.len() {
                    return Self::invalid_data(format!(
                        "blocks metadata describes {expected} values, got {}",
                        values.len()
                    ));
                }

                Ok(Self::Data(Payload::Blocks { meta, values }))
            }
            kind => Self::invalid_data(format!("received an invalid kind header {kind}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aligned(bytes: &[u8]) -> Vec<u32> {
        let mut words = vec![0u32; bytes.len().div_ceil(4)];
        bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..bytes.len()].copy_from_slice(bytes);
        words
    }

    fn encode(msg: &Msg) -> Vec<u8> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf).unwrap();
        buf.extend_from_slice(tail.unwrap_or_default());
        buf
    }

    #[test]
    fn test_delta_keeps_values_aligned() {
        let meta = DeltaMeta {
            id: "w".into(),
            base_version: 7,
            seq: 1,
        };
        let delta = [1.5, -2.0, 3.25];
        let bytes = encode(&Msg::Data(Payload::Delta { meta, delta: &delta }));
        let words = aligned(&bytes);
        let body = &bytemuck::cast_slice::<u32, u8>(&words)[..bytes.len()];

        let Msg::Data(Payload::Delta { meta, delta: got }) = Msg::deserialize(body).unwrap() else {
            panic!("expected a delta");
        };
        assert_eq!(meta.id, "w");
        assert_eq!(meta.base_version, 7);
        assert_eq!(got, &delta);
    }

    #[test]
    fn test_blocks_length_mismatch_is_rejected() {
        let meta = vec![BlockMeta {
            id: "w".into(),
            version: 0,
            len: 3,
        }];
        let values = [1.0, 2.0];
        let bytes = encode(&Msg::Data(Payload::Blocks { meta, values: &values }));
        let words = aligned(&bytes);
        let body = &bytemuck::cast_slice::<u32, u8>(&words)[..bytes.len()];

        let err = Msg::deserialize(body).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let bytes = 42u32.to_be_bytes();
        assert!(Msg::deserialize(&bytes).is_err());
    }
}
