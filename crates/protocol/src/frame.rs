//! Transport framing: `VarInt(len) ‖ VarInt(id) ‖ payload`.

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::{CodecError, read_varint, varint_len, write_varint};
use crate::error::ProtocolError;
use crate::packet::{Encode, Packet};

/// Largest frame body accepted from a peer.
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

/// Append one framed packet to `out`.
pub fn write_frame(packet: &Packet, out: &mut BytesMut) {
    let mut body = BytesMut::new();
    write_varint(&mut body, packet.id());
    packet.encode(&mut body);
    out.reserve(varint_len(body.len() as i32) + body.len());
    write_varint(out, body.len() as i32);
    out.extend_from_slice(&body);
}

/// Split one frame body (id + payload) off the front of `buf`.
///
/// Returns `Ok(None)` until the whole frame has been buffered; `buf` is left
/// untouched in that case.
pub fn split_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
    let mut peek = &buf[..];
    let len = match read_varint(&mut peek) {
        Ok(len) => len,
        Err(CodecError::UnexpectedEof { .. }) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if len < 0 || len as usize > MAX_FRAME_LEN {
        return Err(ProtocolError::BadFrameLength {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let header = buf.len() - peek.len();
    if peek.len() < len as usize {
        return Ok(None);
    }
    buf.advance(header);
    Ok(Some(buf.split_to(len as usize).freeze()))
}

/// Read the packet id from the front of a frame body.
pub fn frame_id(body: &mut Bytes) -> Result<i32, ProtocolError> {
    Ok(read_varint(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::Disconnect;
    use crate::registry::PacketRegistry;

    #[test]
    fn frame_prefixes_length_and_id() {
        let registry = PacketRegistry::standard().unwrap();
        let packet = registry.packet(Disconnect { reason: "x".into() }).unwrap();
        let mut out = BytesMut::new();
        write_frame(&packet, &mut out);
        assert_eq!(&out[..], &[3, 0x40, 1, b'x']);

        let mut body = split_frame(&mut out).unwrap().unwrap();
        assert!(out.is_empty());
        assert_eq!(frame_id(&mut body).unwrap(), 0x40);
        assert_eq!(&body[..], &[1, b'x']);
    }

    #[test]
    fn partial_frames_wait_for_more_data() {
        let mut buf = BytesMut::from(&[5u8, 0, 1][..]);
        assert!(split_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
        buf.extend_from_slice(&[2, 3, 4]);
        assert_eq!(&split_frame(&mut buf).unwrap().unwrap()[..], &[0, 1, 2, 3, 4]);

        let mut empty = BytesMut::new();
        assert!(split_frame(&mut empty).unwrap().is_none());
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, (MAX_FRAME_LEN + 1) as i32);
        assert!(matches!(
            split_frame(&mut buf),
            Err(ProtocolError::BadFrameLength { .. })
        ));
    }
}
