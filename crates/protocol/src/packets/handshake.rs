use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{read_string, read_u16, read_varint, write_string, write_varint};
use crate::error::ProtocolError;
use crate::packet::{Decode, Encode};
use crate::state::ConnectionState;

/// Protocol version spoken by this server.
pub const PROTOCOL_VERSION: i32 = 47;

const MAX_ADDRESS: usize = 255;

/// First packet on every connection; selects the next state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: i32,
}

impl Handshake {
    pub fn requested_state(&self) -> Option<ConnectionState> {
        ConnectionState::from_handshake(self.next_state)
    }
}

impl Encode for Handshake {
    fn encode(&self, buf: &mut BytesMut) {
        write_varint(buf, self.protocol_version);
        write_string(buf, &self.server_address);
        buf.put_u16(self.server_port);
        write_varint(buf, self.next_state);
    }
}

impl Decode for Handshake {
    fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            protocol_version: read_varint(buf)?,
            server_address: read_string(buf, MAX_ADDRESS)?,
            server_port: read_u16(buf)?,
            next_state: read_varint(buf)?,
        })
    }
}
