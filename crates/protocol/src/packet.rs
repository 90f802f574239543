//! The packet model: encode/decode traits, the payload tagged union and the
//! registered packet record.

use bytes::{Bytes, BytesMut};

use crate::bulk::MapChunkBulk;
use crate::error::ProtocolError;
use crate::packets::{
    Chat, ChatMessage, CombatEvent, Disconnect, EntityHeadLook, Handshake, KeepAlive,
    LoginDisconnect, LoginStart, PlayerPosLook, StatusPing, StatusPong, StatusRequest,
    StatusResponse, UnloadChunk,
};
use crate::state::{ConnectionState, Direction};

/// Write payload fields in their wire order. No length or id prefix.
pub trait Encode {
    fn encode(&self, buf: &mut BytesMut);
}

/// Read payload fields from a frame body positioned after the packet id.
pub trait Decode: Sized {
    fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError>;
}

/// Registry key for a payload shape, independent of its numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Handshake,
    StatusRequest,
    StatusPing,
    StatusResponse,
    StatusPong,
    LoginStart,
    LoginDisconnect,
    ServerKeepAlive,
    ChatMessage,
    ClientKeepAlive,
    Chat,
    PlayerPosLook,
    EntityHeadLook,
    UnloadChunk,
    MapChunkBulk,
    Disconnect,
    CombatEvent,
}

/// Payloads the server sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientBound {
    StatusResponse(StatusResponse),
    StatusPong(StatusPong),
    LoginDisconnect(LoginDisconnect),
    KeepAlive(KeepAlive),
    Chat(Chat),
    PlayerPosLook(PlayerPosLook),
    EntityHeadLook(EntityHeadLook),
    UnloadChunk(UnloadChunk),
    MapChunkBulk(MapChunkBulk),
    Disconnect(Disconnect),
    CombatEvent(CombatEvent),
}

/// Payloads the server receives.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerBound {
    Handshake(Handshake),
    StatusRequest(StatusRequest),
    StatusPing(StatusPing),
    LoginStart(LoginStart),
    KeepAlive(KeepAlive),
    ChatMessage(ChatMessage),
}

/// A payload tagged with its direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Client(ClientBound),
    Server(ServerBound),
}

impl Payload {
    /// Client-bound keep-alive.
    pub fn keep_alive(id: i32) -> Self {
        Payload::Client(ClientBound::KeepAlive(KeepAlive { id }))
    }

    pub fn direction(&self) -> Direction {
        match self {
            Payload::Client(_) => Direction::ClientBound,
            Payload::Server(_) => Direction::ServerBound,
        }
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Payload::Client(p) => match p {
                ClientBound::StatusResponse(_) => PacketKind::StatusResponse,
                ClientBound::StatusPong(_) => PacketKind::StatusPong,
                ClientBound::LoginDisconnect(_) => PacketKind::LoginDisconnect,
                ClientBound::KeepAlive(_) => PacketKind::ClientKeepAlive,
                ClientBound::Chat(_) => PacketKind::Chat,
                ClientBound::PlayerPosLook(_) => PacketKind::PlayerPosLook,
                ClientBound::EntityHeadLook(_) => PacketKind::EntityHeadLook,
                ClientBound::UnloadChunk(_) => PacketKind::UnloadChunk,
                ClientBound::MapChunkBulk(_) => PacketKind::MapChunkBulk,
                ClientBound::Disconnect(_) => PacketKind::Disconnect,
                ClientBound::CombatEvent(_) => PacketKind::CombatEvent,
            },
            Payload::Server(p) => match p {
                ServerBound::Handshake(_) => PacketKind::Handshake,
                ServerBound::StatusRequest(_) => PacketKind::StatusRequest,
                ServerBound::StatusPing(_) => PacketKind::StatusPing,
                ServerBound::LoginStart(_) => PacketKind::LoginStart,
                ServerBound::KeepAlive(_) => PacketKind::ServerKeepAlive,
                ServerBound::ChatMessage(_) => PacketKind::ChatMessage,
            },
        }
    }
}

impl Encode for Payload {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Payload::Client(p) => match p {
                ClientBound::StatusResponse(p) => p.encode(buf),
                ClientBound::StatusPong(p) => p.encode(buf),
                ClientBound::LoginDisconnect(p) => p.encode(buf),
                ClientBound::KeepAlive(p) => p.encode(buf),
                ClientBound::Chat(p) => p.encode(buf),
                ClientBound::PlayerPosLook(p) => p.encode(buf),
                ClientBound::EntityHeadLook(p) => p.encode(buf),
                ClientBound::UnloadChunk(p) => p.encode(buf),
                ClientBound::MapChunkBulk(p) => p.encode(buf),
                ClientBound::Disconnect(p) => p.encode(buf),
                ClientBound::CombatEvent(p) => p.encode(buf),
            },
            Payload::Server(p) => match p {
                ServerBound::Handshake(p) => p.encode(buf),
                ServerBound::StatusRequest(p) => p.encode(buf),
                ServerBound::StatusPing(p) => p.encode(buf),
                ServerBound::LoginStart(p) => p.encode(buf),
                ServerBound::KeepAlive(p) => p.encode(buf),
                ServerBound::ChatMessage(p) => p.encode(buf),
            },
        }
    }
}

macro_rules! payload_from {
    ($side:ident => $outer:ident: $($ty:ident),* $(,)?) => {
        $(
            impl From<$ty> for $side {
                fn from(p: $ty) -> Self {
                    $side::$ty(p)
                }
            }

            impl From<$ty> for Payload {
                fn from(p: $ty) -> Self {
                    Payload::$outer($side::$ty(p))
                }
            }
        )*
    };
}

// KeepAlive exists in both directions and is wrapped explicitly.
payload_from!(ClientBound => Client:
    StatusResponse, StatusPong, LoginDisconnect, Chat, PlayerPosLook,
    EntityHeadLook, UnloadChunk, MapChunkBulk, Disconnect, CombatEvent,
);
payload_from!(ServerBound => Server:
    Handshake, StatusRequest, StatusPing, LoginStart, ChatMessage,
);

impl From<ClientBound> for Payload {
    fn from(p: ClientBound) -> Self {
        Payload::Client(p)
    }
}

impl From<ServerBound> for Payload {
    fn from(p: ServerBound) -> Self {
        Payload::Server(p)
    }
}

/// A payload bound to its registered id, direction and state.
///
/// Only [`crate::PacketRegistry`] constructs these, so the triple always
/// agrees with the registration table.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    id: i32,
    direction: Direction,
    state: ConnectionState,
    payload: Payload,
}

impl Packet {
    pub(crate) fn new(
        id: i32,
        direction: Direction,
        state: ConnectionState,
        payload: Payload,
    ) -> Self {
        Self {
            id,
            direction,
            state,
            payload,
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn kind(&self) -> PacketKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

impl Encode for Packet {
    fn encode(&self, buf: &mut BytesMut) {
        self.payload.encode(buf);
    }
}
