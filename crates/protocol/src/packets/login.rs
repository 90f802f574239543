use bytes::{Bytes, BytesMut};

use crate::codec::{read_string, write_string};
use crate::error::ProtocolError;
use crate::packet::{Decode, Encode};
use crate::packets::text_component;

const MAX_NAME: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStart {
    pub name: String,
}

impl Encode for LoginStart {
    fn encode(&self, buf: &mut BytesMut) {
        write_string(buf, &self.name);
    }
}

impl Decode for LoginStart {
    fn decode(buf: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: read_string(buf, MAX_NAME)?,
        })
    }
}

/// Disconnect during login. `reason` is a JSON chat component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginDisconnect {
    pub reason: String,
}

impl LoginDisconnect {
    pub fn text(reason: &str) -> Self {
        Self {
            reason: text_component(reason),
        }
    }
}

impl Encode for LoginDisconnect {
    fn encode(&self, buf: &mut BytesMut) {
        write_string(buf, &self.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_longer_than_sixteen_are_rejected() {
        let mut buf = BytesMut::new();
        LoginStart {
            name: "a_very_long_player_name".into(),
        }
        .encode(&mut buf);
        assert!(LoginStart::decode(&mut buf.freeze()).is_err());

        let mut buf = BytesMut::new();
        LoginStart {
            name: "Notch".into(),
        }
        .encode(&mut buf);
        assert_eq!(LoginStart::decode(&mut buf.freeze()).unwrap().name, "Notch");
    }
}
