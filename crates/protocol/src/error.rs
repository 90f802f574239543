use crate::codec::CodecError;
use crate::packet::PacketKind;
use crate::state::{ConnectionState, Direction};

/// Per-connection protocol failures. None of these are fatal to the server;
/// the affected connection is closed and the reason logged.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("unknown packet {id:#04x} ({direction:?}, {state})")]
    UnknownPacket {
        direction: Direction,
        state: ConnectionState,
        id: i32,
    },

    #[error("packet {id:#04x} ({direction:?}, {state}) has no decoder")]
    NotDecodable {
        direction: Direction,
        state: ConnectionState,
        id: i32,
    },

    #[error("{kind:?} is not registered")]
    Unregistered { kind: PacketKind },

    #[error("{remaining} trailing bytes after packet {id:#04x} in {state}")]
    TrailingBytes {
        state: ConnectionState,
        id: i32,
        remaining: usize,
    },

    #[error("{kind:?} belongs to {expected}, connection is in {actual}")]
    WrongState {
        kind: PacketKind,
        expected: ConnectionState,
        actual: ConnectionState,
    },

    #[error("{kind:?} is {direction:?} and cannot be sent here")]
    WrongDirection {
        kind: PacketKind,
        direction: Direction,
    },

    #[error("invalid {field} value {value}")]
    InvalidValue { field: &'static str, value: i32 },

    #[error("frame length {len} outside 0..={max}")]
    BadFrameLength { len: i32, max: usize },

    #[error("bulk chunk data wrote {written} bytes, expected {expected}")]
    BulkSizeMismatch { expected: usize, written: usize },

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
