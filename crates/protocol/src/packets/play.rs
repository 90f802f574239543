use bytes::{BufMut, Bytes, BytesMut};
use lodestone_common::{ChunkPos, Position};
use lodestone_kernel::EntityData;

use crate::codec::{angle_to_byte, read_string, read_varint, write_string, write_varint};
use crate::error::ProtocolError;
use crate::packet::{Decode, Encode};
use crate::packets::text_component;

const MAX_CHAT_MESSAGE: usize = 100;

/// Keep-alive ping. Same shape in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    pub id: i32,
}

impl Encode for KeepAlive {
    fn encode(&self, buf: &mut BytesMut) {
        write_varint(buf, self.id);
    }
}

impl Decode for KeepAlive {
    fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: read_varint(buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChatPosition {
    Chat = 0,
    System = 1,
    ActionBar = 2,
}

/// Remove legacy `§x` formatting codes.
pub fn strip_colors(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '§' {
            chars.next();
        } else {
            out.push(c);
        }
    }
    out
}

/// Chat line sent to a client. `json` is a chat component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub json: String,
    pub position: ChatPosition,
}

impl Chat {
    /// Build a plain-text chat line for a recipient. Color codes are stripped
    /// when the recipient has chat colors disabled.
    pub fn new(message: &str, position: ChatPosition, colors: bool) -> Self {
        let json = if colors {
            text_component(message)
        } else {
            text_component(&strip_colors(message))
        };
        Self { json, position }
    }
}

impl Encode for Chat {
    fn encode(&self, buf: &mut BytesMut) {
        write_string(buf, &self.json);
        buf.put_u8(self.position as u8);
    }
}

/// Chat line typed by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub message: String,
}

impl Encode for ChatMessage {
    fn encode(&self, buf: &mut BytesMut) {
        write_string(buf, &self.message);
    }
}

impl Decode for ChatMessage {
    fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            message: read_string(buf, MAX_CHAT_MESSAGE)?,
        })
    }
}

/// Teleport the client. With `flags == 0` every field is absolute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerPosLook {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
    pub flags: u8,
}

impl PlayerPosLook {
    pub fn from_position(position: &Position) -> Self {
        Self {
            x: position.pos.x,
            y: position.pos.y,
            z: position.pos.z,
            yaw: position.yaw,
            pitch: position.pitch,
            flags: 0,
        }
    }
}

impl Encode for PlayerPosLook {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_f64(self.x);
        buf.put_f64(self.y);
        buf.put_f64(self.z);
        buf.put_f32(self.yaw);
        buf.put_f32(self.pitch);
        buf.put_u8(self.flags);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityHeadLook {
    pub entity_id: i32,
    /// Degrees; quantized to an angle byte on the wire.
    pub head_yaw: f32,
}

impl EntityHeadLook {
    pub fn for_entity(entity: &EntityData) -> Self {
        Self {
            entity_id: entity.id.network,
            head_yaw: entity.head_yaw,
        }
    }
}

impl Encode for EntityHeadLook {
    fn encode(&self, buf: &mut BytesMut) {
        write_varint(buf, self.entity_id);
        buf.put_u8(angle_to_byte(self.head_yaw));
    }
}

/// Tell the client to drop a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnloadChunk {
    pub x: i32,
    pub z: i32,
}

impl From<ChunkPos> for UnloadChunk {
    fn from(pos: ChunkPos) -> Self {
        Self { x: pos.x, z: pos.z }
    }
}

impl Encode for UnloadChunk {
    // An empty ground-up column with no sections.
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.x);
        buf.put_i32(self.z);
        buf.put_u8(1);
        buf.put_u16(0);
        write_varint(buf, 0);
    }
}

/// Disconnect during play. `reason` is a JSON chat component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub reason: String,
}

impl Disconnect {
    pub fn text(reason: &str) -> Self {
        Self {
            reason: text_component(reason),
        }
    }
}

impl Encode for Disconnect {
    fn encode(&self, buf: &mut BytesMut) {
        write_string(buf, &self.reason);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombatEvent {
    EnterCombat,
    EndCombat {
        duration: i32,
        entity_id: i32,
    },
    EntityDead {
        player_id: i32,
        entity_id: i32,
        message: String,
    },
}

impl Encode for CombatEvent {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            CombatEvent::EnterCombat => write_varint(buf, 0),
            CombatEvent::EndCombat {
                duration,
                entity_id,
            } => {
                write_varint(buf, 1);
                write_varint(buf, *duration);
                buf.put_i32(*entity_id);
            }
            CombatEvent::EntityDead {
                player_id,
                entity_id,
                message,
            } => {
                write_varint(buf, 2);
                write_varint(buf, *player_id);
                buf.put_i32(*entity_id);
                write_string(buf, message);
            }
        }
    }
}
