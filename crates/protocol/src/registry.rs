//! Packet id table.
//!
//! Built once at startup from an explicit table and shared read-only
//! (`Arc<PacketRegistry>`) by every connection afterwards.

use std::collections::HashMap;

use bytes::{Buf, Bytes};

use crate::error::ProtocolError;
use crate::packet::{Decode, Packet, PacketKind, Payload, ServerBound};
use crate::packets::{
    ChatMessage, Handshake, KeepAlive, LoginStart, StatusPing, StatusRequest,
};
use crate::state::{ConnectionState, Direction};

/// Builds a payload from a frame body.
pub type Decoder = fn(&mut Bytes) -> Result<Payload, ProtocolError>;

/// One registration: where a payload kind lives in the id namespace.
#[derive(Debug, Clone, Copy)]
pub struct PacketEntry {
    pub kind: PacketKind,
    pub direction: Direction,
    pub state: ConnectionState,
    pub id: i32,
    /// Present for packets this side can receive.
    pub decoder: Option<Decoder>,
}

impl PacketEntry {
    pub const fn new(
        kind: PacketKind,
        direction: Direction,
        state: ConnectionState,
        id: i32,
    ) -> Self {
        Self {
            kind,
            direction,
            state,
            id,
            decoder: None,
        }
    }

    pub fn with_decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = Some(decoder);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("id {id:#04x} already registered for ({direction:?}, {state}) as {existing:?}")]
    DuplicateId {
        direction: Direction,
        state: ConnectionState,
        id: i32,
        existing: PacketKind,
    },
    #[error("{0:?} is already registered")]
    DuplicateKind(PacketKind),
}

type Key = (Direction, ConnectionState, i32);

#[derive(Debug, Default)]
pub struct PacketRegistry {
    by_key: HashMap<Key, PacketEntry>,
    by_kind: HashMap<PacketKind, Key>,
}

fn decode_server<T, F>(buf: &mut Bytes, wrap: F) -> Result<Payload, ProtocolError>
where
    T: Decode,
    F: FnOnce(T) -> ServerBound,
{
    Ok(Payload::Server(wrap(T::decode(buf)?)))
}

/// Protocol 47 registrations.
fn standard_table() -> Vec<PacketEntry> {
    use ConnectionState as S;
    use Direction::{ClientBound as C, ServerBound as SB};
    use PacketKind as K;

    vec![
        PacketEntry::new(K::Handshake, SB, S::HANDSHAKE, 0x00)
            .with_decoder(|b| decode_server::<Handshake, _>(b, ServerBound::Handshake)),
        PacketEntry::new(K::StatusRequest, SB, S::STATUS, 0x00)
            .with_decoder(|b| decode_server::<StatusRequest, _>(b, ServerBound::StatusRequest)),
        PacketEntry::new(K::StatusPing, SB, S::STATUS, 0x01)
            .with_decoder(|b| decode_server::<StatusPing, _>(b, ServerBound::StatusPing)),
        PacketEntry::new(K::StatusResponse, C, S::STATUS, 0x00),
        PacketEntry::new(K::StatusPong, C, S::STATUS, 0x01),
        PacketEntry::new(K::LoginStart, SB, S::LOGIN, 0x00)
            .with_decoder(|b| decode_server::<LoginStart, _>(b, ServerBound::LoginStart)),
        PacketEntry::new(K::LoginDisconnect, C, S::LOGIN, 0x00),
        PacketEntry::new(K::ServerKeepAlive, SB, S::PLAY, 0x00)
            .with_decoder(|b| decode_server::<KeepAlive, _>(b, ServerBound::KeepAlive)),
        PacketEntry::new(K::ChatMessage, SB, S::PLAY, 0x01)
            .with_decoder(|b| decode_server::<ChatMessage, _>(b, ServerBound::ChatMessage)),
        PacketEntry::new(K::ClientKeepAlive, C, S::PLAY, 0x00),
        PacketEntry::new(K::Chat, C, S::PLAY, 0x02),
        PacketEntry::new(K::PlayerPosLook, C, S::PLAY, 0x08),
        PacketEntry::new(K::EntityHeadLook, C, S::PLAY, 0x19),
        PacketEntry::new(K::UnloadChunk, C, S::PLAY, 0x21),
        PacketEntry::new(K::MapChunkBulk, C, S::PLAY, 0x26),
        PacketEntry::new(K::Disconnect, C, S::PLAY, 0x40),
        PacketEntry::new(K::CombatEvent, C, S::PLAY, 0x42),
    ]
}

impl PacketRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding every packet this server speaks.
    pub fn standard() -> Result<Self, RegistryError> {
        let mut registry = Self::empty();
        for entry in standard_table() {
            registry.register(entry)?;
        }
        tracing::debug!(packets = registry.len(), "packet registry built");
        Ok(registry)
    }

    /// Add an entry. Ids are unique per `(direction, state)` and each kind
    /// registers once.
    pub fn register(&mut self, entry: PacketEntry) -> Result<(), RegistryError> {
        let key = (entry.direction, entry.state, entry.id);
        if let Some(existing) = self.by_key.get(&key) {
            return Err(RegistryError::DuplicateId {
                direction: entry.direction,
                state: entry.state,
                id: entry.id,
                existing: existing.kind,
            });
        }
        if self.by_kind.contains_key(&entry.kind) {
            return Err(RegistryError::DuplicateKind(entry.kind));
        }
        self.by_kind.insert(entry.kind, key);
        self.by_key.insert(key, entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Exact-match lookup.
    pub fn resolve(
        &self,
        direction: Direction,
        state: ConnectionState,
        id: i32,
    ) -> Result<&PacketEntry, ProtocolError> {
        self.by_key
            .get(&(direction, state, id))
            .ok_or(ProtocolError::UnknownPacket {
                direction,
                state,
                id,
            })
    }

    pub fn entry_for(&self, kind: PacketKind) -> Option<&PacketEntry> {
        self.by_kind.get(&kind).and_then(|key| self.by_key.get(key))
    }

    /// Bind a payload to its registered id and state.
    pub fn packet(&self, payload: impl Into<Payload>) -> Result<Packet, ProtocolError> {
        let payload = payload.into();
        let kind = payload.kind();
        let entry = self
            .entry_for(kind)
            .ok_or(ProtocolError::Unregistered { kind })?;
        if entry.direction != payload.direction() {
            return Err(ProtocolError::WrongDirection {
                kind,
                direction: payload.direction(),
            });
        }
        Ok(Packet::new(entry.id, entry.direction, entry.state, payload))
    }

    /// Decode a body whose id has already been read. The whole body must be
    /// consumed.
    pub fn decode(
        &self,
        direction: Direction,
        state: ConnectionState,
        id: i32,
        mut body: Bytes,
    ) -> Result<Packet, ProtocolError> {
        let entry = self.resolve(direction, state, id)?;
        let decoder = entry.decoder.ok_or(ProtocolError::NotDecodable {
            direction,
            state,
            id,
        })?;
        let payload = decoder(&mut body)?;
        if body.has_remaining() {
            return Err(ProtocolError::TrailingBytes {
                state,
                id,
                remaining: body.remaining(),
            });
        }
        Ok(Packet::new(id, direction, state, payload))
    }
}
