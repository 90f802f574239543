//! Wire protocol: primitive codec, packet registry, framing, per-connection
//! state and the bulk chunk encoding.
//!
//! # Invariants
//! - Packet ids are unique per `(direction, state)` and resolved by exact match.
//! - A [`PacketRegistry`] is built once and shared read-only.
//! - Bulk chunk data is exactly [`bulk::column_size`] bytes per column.

pub mod bulk;
pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod packet;
pub mod packets;
pub mod registry;
pub mod state;

pub use bulk::{ColumnMeta, MapChunkBulk};
pub use codec::CodecError;
pub use connection::Connection;
pub use error::ProtocolError;
pub use frame::{MAX_FRAME_LEN, split_frame, write_frame};
pub use packet::{ClientBound, Decode, Encode, Packet, PacketKind, Payload, ServerBound};
pub use registry::{PacketEntry, PacketRegistry, RegistryError};
pub use state::{ConnectionState, Direction};
