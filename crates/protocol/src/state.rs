use std::fmt;

/// Which way a packet travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    /// Server to client.
    ClientBound,
    /// Client to server.
    ServerBound,
}

/// Protocol phase that scopes packet ids.
///
/// An open set: the four vanilla phases are provided as constants, and any
/// other value may be used to register packets for additional phases. The
/// default is `HANDSHAKE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionState(pub u8);

impl ConnectionState {
    pub const HANDSHAKE: Self = Self(0);
    pub const STATUS: Self = Self(1);
    pub const LOGIN: Self = Self(2);
    pub const PLAY: Self = Self(3);

    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::HANDSHAKE => Some("handshake"),
            Self::STATUS => Some("status"),
            Self::LOGIN => Some("login"),
            Self::PLAY => Some("play"),
            _ => None,
        }
    }

    /// State requested by a handshake's `next_state` field.
    pub fn from_handshake(next_state: i32) -> Option<Self> {
        match next_state {
            1 => Some(Self::STATUS),
            2 => Some(Self::LOGIN),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "state#{}", self.0),
        }
    }
}
