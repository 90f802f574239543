use std::io::Write;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::frame::{frame_id, write_frame};
use crate::packet::{Packet, Payload, ServerBound};
use crate::packets::{Disconnect, LoginDisconnect};
use crate::registry::PacketRegistry;
use crate::state::{ConnectionState, Direction};

/// One client's protocol state and transport.
///
/// The first protocol error closes the connection: the reason is recorded, a
/// disconnect is attempted where the state allows one, and every later call
/// returns [`ProtocolError::Closed`]. Nothing escapes to other connections.
pub struct Connection<W> {
    state: ConnectionState,
    registry: Arc<PacketRegistry>,
    transport: W,
    closed: Option<String>,
}

impl<W: Write> Connection<W> {
    pub fn new(registry: Arc<PacketRegistry>, transport: W) -> Self {
        Self {
            state: ConnectionState::HANDSHAKE,
            registry,
            transport,
            closed: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to another phase, e.g. LOGIN to PLAY once login completes.
    pub fn set_state(&mut self, state: ConnectionState) {
        tracing::debug!(from = %self.state, to = %state, "connection state change");
        self.state = state;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub fn close_reason(&self) -> Option<&str> {
        self.closed.as_deref()
    }

    pub fn transport(&self) -> &W {
        &self.transport
    }

    pub fn into_transport(self) -> W {
        self.transport
    }

    /// Frame and write a client-bound payload registered for the current state.
    pub fn send(&mut self, payload: impl Into<Payload>) -> Result<(), ProtocolError> {
        self.ensure_open()?;
        let packet = self.registry.packet(payload)?;
        if packet.direction() != Direction::ClientBound {
            return Err(ProtocolError::WrongDirection {
                kind: packet.kind(),
                direction: packet.direction(),
            });
        }
        if packet.state() != self.state {
            return Err(ProtocolError::WrongState {
                kind: packet.kind(),
                expected: packet.state(),
                actual: self.state,
            });
        }
        if let Err(err) = self.write(&packet) {
            return Err(self.fail(err.into()));
        }
        Ok(())
    }

    /// Decode one frame body from the peer. A handshake moves the connection
    /// to the state it requests.
    pub fn receive(&mut self, frame: Bytes) -> Result<Packet, ProtocolError> {
        self.ensure_open()?;
        match self.decode(frame) {
            Ok(packet) => Ok(packet),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Close with a reason shown to the client where the state allows it.
    pub fn disconnect(&mut self, reason: &str) {
        if self.closed.is_some() {
            return;
        }
        self.notify_peer(reason);
        self.closed = Some(reason.to_owned());
    }

    fn decode(&mut self, mut frame: Bytes) -> Result<Packet, ProtocolError> {
        let id = frame_id(&mut frame)?;
        let packet = self
            .registry
            .decode(Direction::ServerBound, self.state, id, frame)?;
        if let Payload::Server(ServerBound::Handshake(hs)) = packet.payload() {
            let next = hs
                .requested_state()
                .ok_or(ProtocolError::InvalidValue {
                    field: "next_state",
                    value: hs.next_state,
                })?;
            self.set_state(next);
        }
        Ok(packet)
    }

    fn write(&mut self, packet: &Packet) -> std::io::Result<()> {
        let mut out = BytesMut::new();
        write_frame(packet, &mut out);
        self.transport.write_all(&out)?;
        self.transport.flush()
    }

    fn ensure_open(&self) -> Result<(), ProtocolError> {
        match &self.closed {
            Some(reason) => Err(ProtocolError::Closed(reason.clone())),
            None => Ok(()),
        }
    }

    fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        let reason = err.to_string();
        tracing::warn!(state = %self.state, %reason, "closing connection");
        if !matches!(err, ProtocolError::Io(_)) {
            self.notify_peer(&reason);
        }
        self.closed = Some(reason);
        err
    }

    // Best effort; the connection is going away either way.
    fn notify_peer(&mut self, reason: &str) {
        let payload: Payload = match self.state {
            ConnectionState::LOGIN => LoginDisconnect::text(reason).into(),
            ConnectionState::PLAY => Disconnect::text(reason).into(),
            _ => return,
        };
        let sent = self
            .registry
            .packet(payload)
            .map_err(|e| e.to_string())
            .and_then(|p| self.write(&p).map_err(|e| e.to_string()));
        if let Err(error) = sent {
            tracing::debug!(%error, "disconnect notice not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::write_varint;
    use crate::frame::split_frame;
    use crate::packet::Encode;
    use crate::packets::{Chat, ChatPosition, Handshake, KeepAlive, StatusRequest};

    fn connection() -> Connection<Vec<u8>> {
        Connection::new(Arc::new(PacketRegistry::standard().unwrap()), Vec::new())
    }

    fn body(id: i32, payload: &impl Encode) -> Bytes {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, id);
        payload.encode(&mut buf);
        buf.freeze()
    }

    fn handshake(next_state: i32) -> Bytes {
        body(
            0x00,
            &Handshake {
                protocol_version: 47,
                server_address: "localhost".into(),
                server_port: 25565,
                next_state,
            },
        )
    }

    #[test]
    fn handshake_selects_next_state() {
        let mut conn = connection();
        conn.receive(handshake(1)).unwrap();
        assert_eq!(conn.state(), ConnectionState::STATUS);
        let p = conn.receive(body(0x00, &StatusRequest)).unwrap();
        assert_eq!(p.payload(), &Payload::from(StatusRequest));

        let mut conn = connection();
        conn.receive(handshake(2)).unwrap();
        assert_eq!(conn.state(), ConnectionState::LOGIN);
    }

    #[test]
    fn invalid_next_state_closes() {
        let mut conn = connection();
        assert!(conn.receive(handshake(5)).is_err());
        assert!(conn.is_closed());
        assert!(matches!(
            conn.receive(handshake(1)),
            Err(ProtocolError::Closed(_))
        ));
    }

    #[test]
    fn send_checks_state() {
        let mut conn = connection();
        let chat = Chat::new("hi", ChatPosition::Chat, true);
        assert!(matches!(
            conn.send(chat.clone()),
            Err(ProtocolError::WrongState { .. })
        ));
        assert!(!conn.is_closed());

        conn.set_state(ConnectionState::PLAY);
        conn.send(chat).unwrap();
        let mut written = BytesMut::from(&conn.transport()[..]);
        let frame = split_frame(&mut written).unwrap().unwrap();
        assert_eq!(frame[0], 0x02);
    }

    #[test]
    fn server_bound_payloads_cannot_be_sent() {
        let mut conn = connection();
        assert!(matches!(
            conn.send(StatusRequest),
            Err(ProtocolError::WrongDirection { .. })
        ));
    }

    #[test]
    fn unknown_packet_in_play_disconnects_client() {
        let mut conn = connection();
        conn.set_state(ConnectionState::PLAY);
        let err = conn.receive(body(0x6e, &KeepAlive { id: 1 })).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownPacket { id: 0x6e, .. }));
        assert!(conn.is_closed());

        // A Disconnect frame went out before closing.
        let mut written = BytesMut::from(&conn.transport()[..]);
        let frame = split_frame(&mut written).unwrap().unwrap();
        assert_eq!(frame[0], 0x40);
        assert!(matches!(
            conn.send(Payload::keep_alive(1)),
            Err(ProtocolError::Closed(_))
        ));
    }

    #[test]
    fn explicit_disconnect_in_login() {
        let mut conn = connection();
        conn.receive(handshake(2)).unwrap();
        conn.disconnect("server full");
        assert_eq!(conn.close_reason(), Some("server full"));
        let mut written = BytesMut::from(&conn.into_transport()[..]);
        let frame = split_frame(&mut written).unwrap().unwrap();
        assert_eq!(frame[0], 0x00);
    }
}
