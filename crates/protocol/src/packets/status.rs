use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{read_i64, read_string, write_string};
use crate::error::ProtocolError;
use crate::packet::{Decode, Encode};

const MAX_STATUS_JSON: usize = 32_767;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRequest;

impl Encode for StatusRequest {
    fn encode(&self, _buf: &mut BytesMut) {}
}

impl Decode for StatusRequest {
    fn decode(_buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPing {
    pub payload: i64,
}

impl Encode for StatusPing {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i64(self.payload);
    }
}

impl Decode for StatusPing {
    fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            payload: read_i64(buf)?,
        })
    }
}

/// Server list entry, serialized as JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub json: String,
}

impl StatusResponse {
    pub fn new(version: &str, protocol: i32, online: usize, max: usize, motd: &str) -> Self {
        let json = serde_json::json!({
            "version": { "name": version, "protocol": protocol },
            "players": { "max": max, "online": online, "sample": [] },
            "description": { "text": motd },
        });
        Self {
            json: json.to_string(),
        }
    }
}

impl Encode for StatusResponse {
    fn encode(&self, buf: &mut BytesMut) {
        write_string(buf, &self.json);
    }
}

impl Decode for StatusResponse {
    fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            json: read_string(buf, MAX_STATUS_JSON)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPong {
    pub payload: i64,
}

impl StatusPong {
    pub fn echo(ping: &StatusPing) -> Self {
        Self {
            payload: ping.payload,
        }
    }
}

impl Encode for StatusPong {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i64(self.payload);
    }
}
