// MQTT 3.1.1 wire encoding
//
// Packets are framed by a one-byte fixed header and a variable-length
// "remaining length" (7 bits per byte, at most four bytes). WebSocket
// frames do not have to line up with packet boundaries, so the reader
// buffers bytes until a whole packet is available.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Connect, Packet, Publish, QoS};
use crate::error::Error;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;
const MAX_REMAINING_LENGTH: usize = 268_435_455;

// ── Packet types (high nibble of the fixed header) ───────────────────

const CONNECT: u8 = 1;
const CONNACK: u8 = 2;
const PUBLISH: u8 = 3;
const PUBACK: u8 = 4;
const SUBSCRIBE: u8 = 8;
const SUBACK: u8 = 9;
const PINGREQ: u8 = 12;
const PINGRESP: u8 = 13;
const DISCONNECT: u8 = 14;

// ── Encoding ─────────────────────────────────────────────────────────

impl Packet {
    /// Append the wire form of this packet to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), Error> {
        let mut body = BytesMut::new();
        let first = match self {
            Self::Connect(connect) => {
                encode_connect(connect, &mut body)?;
                CONNECT << 4
            }
            Self::ConnAck {
                session_present,
                code,
            } => {
                body.put_u8(u8::from(*session_present));
                body.put_u8(*code);
                CONNACK << 4
            }
            Self::Publish(publish) => {
                put_str(&mut body, &publish.topic)?;
                match (publish.qos, publish.packet_id) {
                    (QoS::AtMostOnce, _) => {}
                    (QoS::AtLeastOnce, Some(id)) => body.put_u16(id),
                    (QoS::AtLeastOnce, None) => {
                        return Err(Error::Protocol(
                            "QoS 1 publish requires a packet identifier".into(),
                        ));
                    }
                }
                body.put_slice(&publish.payload);
                (PUBLISH << 4)
                    | (u8::from(publish.dup) << 3)
                    | (publish.qos.bits() << 1)
                    | u8::from(publish.retain)
            }
            Self::PubAck { packet_id } => {
                body.put_u16(*packet_id);
                PUBACK << 4
            }
            Self::Subscribe { packet_id, topics } => {
                body.put_u16(*packet_id);
                for (filter, qos) in topics {
                    put_str(&mut body, filter)?;
                    body.put_u8(qos.bits());
                }
                (SUBSCRIBE << 4) | 0b0010
            }
            Self::SubAck { packet_id, codes } => {
                body.put_u16(*packet_id);
                body.put_slice(codes);
                SUBACK << 4
            }
            Self::PingReq => PINGREQ << 4,
            Self::PingResp => PINGRESP << 4,
            Self::Disconnect => DISCONNECT << 4,
        };

        dst.put_u8(first);
        put_remaining_length(dst, body.len())?;
        dst.put_slice(&body);
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

fn encode_connect(connect: &Connect, body: &mut BytesMut) -> Result<(), Error> {
    put_str(body, PROTOCOL_NAME)?;
    body.put_u8(PROTOCOL_LEVEL);

    let mut flags = 0u8;
    if connect.username.is_some() {
        flags |= 0x80;
    }
    if connect.password.is_some() {
        flags |= 0x40;
    }
    if connect.clean_session {
        flags |= 0x02;
    }
    body.put_u8(flags);
    body.put_u16(connect.keep_alive_secs);

    put_str(body, &connect.client_id)?;
    if let Some(ref username) = connect.username {
        put_str(body, username)?;
    }
    if let Some(ref password) = connect.password {
        put_str(body, password)?;
    }
    Ok(())
}

fn put_str(dst: &mut BytesMut, s: &str) -> Result<(), Error> {
    let len = u16::try_from(s.len())
        .map_err(|_| Error::Protocol(format!("string of {} bytes is too long", s.len())))?;
    dst.put_u16(len);
    dst.put_slice(s.as_bytes());
    Ok(())
}

fn put_remaining_length(dst: &mut BytesMut, mut len: usize) -> Result<(), Error> {
    if len > MAX_REMAINING_LENGTH {
        return Err(Error::Protocol(format!("packet of {len} bytes exceeds MQTT limit")));
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        dst.put_u8(byte);
        if len == 0 {
            return Ok(());
        }
    }
}

// ── Decoding ─────────────────────────────────────────────────────────

/// Incremental packet decoder fed with raw bytes from the transport.
#[derive(Debug, Default)]
pub struct PacketReader {
    buf: BytesMut,
}

impl PacketReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the transport.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed by a complete packet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete packet, or `None` if more bytes are needed.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, Error> {
        let Some((header_len, remaining)) = read_remaining_length(&self.buf)? else {
            return Ok(None);
        };
        let total = header_len + remaining;
        if self.buf.len() < total {
            return Ok(None);
        }

        let mut frame = self.buf.split_to(total).freeze();
        let first = frame.get_u8();
        frame.advance(header_len - 1);
        decode_body(first, frame).map(Some)
    }
}

/// Returns `(fixed header length, remaining length)` once the header is complete.
fn read_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, Error> {
    let mut value = 0usize;
    let mut multiplier = 1usize;

    for (i, byte) in buf.iter().skip(1).take(4).enumerate() {
        value += usize::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((i + 2, value)));
        }
        multiplier *= 128;
    }

    if buf.len() >= 5 {
        return Err(Error::Protocol("malformed remaining length".into()));
    }
    Ok(None)
}

fn decode_body(first: u8, mut body: Bytes) -> Result<Packet, Error> {
    let flags = first & 0x0F;
    match first >> 4 {
        CONNECT => decode_connect(&mut body).map(Packet::Connect),
        CONNACK => {
            let ack_flags = get_u8(&mut body)?;
            let code = get_u8(&mut body)?;
            Ok(Packet::ConnAck {
                session_present: ack_flags & 0x01 == 1,
                code,
            })
        }
        PUBLISH => {
            let qos = QoS::from_bits((flags >> 1) & 0b11)
                .ok_or_else(|| Error::Protocol("unsupported QoS level".into()))?;
            let topic = get_str(&mut body)?;
            let packet_id = match qos {
                QoS::AtMostOnce => None,
                QoS::AtLeastOnce => Some(get_u16(&mut body)?),
            };
            Ok(Packet::Publish(Publish {
                topic,
                qos,
                packet_id,
                retain: flags & 0x01 == 1,
                dup: flags & 0x08 != 0,
                payload: body,
            }))
        }
        PUBACK => Ok(Packet::PubAck {
            packet_id: get_u16(&mut body)?,
        }),
        SUBSCRIBE => {
            let packet_id = get_u16(&mut body)?;
            let mut topics = Vec::new();
            while body.has_remaining() {
                let filter = get_str(&mut body)?;
                let qos = QoS::from_bits(get_u8(&mut body)? & 0b11)
                    .ok_or_else(|| Error::Protocol("unsupported QoS level".into()))?;
                topics.push((filter, qos));
            }
            Ok(Packet::Subscribe { packet_id, topics })
        }
        SUBACK => {
            let packet_id = get_u16(&mut body)?;
            Ok(Packet::SubAck {
                packet_id,
                codes: body.to_vec(),
            })
        }
        PINGREQ => Ok(Packet::PingReq),
        PINGRESP => Ok(Packet::PingResp),
        DISCONNECT => Ok(Packet::Disconnect),
        other => Err(Error::Protocol(format!("unsupported packet type {other}"))),
    }
}

fn decode_connect(body: &mut Bytes) -> Result<Connect, Error> {
    let name = get_str(body)?;
    if name != PROTOCOL_NAME {
        return Err(Error::Protocol(format!("unknown protocol name '{name}'")));
    }
    let _level = get_u8(body)?;
    let flags = get_u8(body)?;
    let keep_alive_secs = get_u16(body)?;
    let client_id = get_str(body)?;
    let username = if flags & 0x80 == 0 {
        None
    } else {
        Some(get_str(body)?)
    };
    let password = if flags & 0x40 == 0 {
        None
    } else {
        Some(get_str(body)?)
    };
    Ok(Connect {
        client_id,
        username,
        password,
        keep_alive_secs,
        clean_session: flags & 0x02 != 0,
    })
}

fn get_u8(body: &mut Bytes) -> Result<u8, Error> {
    if body.remaining() < 1 {
        return Err(truncated());
    }
    Ok(body.get_u8())
}

fn get_u16(body: &mut Bytes) -> Result<u16, Error> {
    if body.remaining() < 2 {
        return Err(truncated());
    }
    Ok(body.get_u16())
}

fn get_str(body: &mut Bytes) -> Result<String, Error> {
    let len = usize::from(get_u16(body)?);
    if body.remaining() < len {
        return Err(truncated());
    }
    let raw = body.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| Error::Protocol("string is not UTF-8".into()))
}

fn truncated() -> Error {
    Error::Protocol("truncated packet".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode_one(bytes: &[u8]) -> Packet {
        let mut reader = PacketReader::new();
        reader.push(bytes);
        let packet = reader.next_packet().unwrap().unwrap();
        assert_eq!(reader.buffered(), 0);
        packet
    }

    #[test]
    fn connect_layout_matches_protocol() {
        let packet = Packet::Connect(Connect {
            client_id: "d".into(),
            username: Some("u".into()),
            password: Some("p".into()),
            keep_alive_secs: 60,
            clean_session: true,
        });
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[
                0x10, 19, // fixed header
                0, 4, b'M', b'Q', b'T', b'T', 4, 0xC2, 0, 60, // variable header
                0, 1, b'd', 0, 1, b'u', 0, 1, b'p',
            ]
        );
        assert_eq!(decode_one(&bytes), packet);
    }

    #[test]
    fn qos1_publish_carries_packet_id() {
        let packet = Packet::Publish(Publish::at_least_once(
            "devices/d/messages/events/",
            7,
            Bytes::from_static(b"{}"),
        ));
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes[0], 0x32);
        assert_eq!(decode_one(&bytes), packet);
    }

    #[test]
    fn qos1_publish_without_id_is_rejected() {
        let mut publish = Publish::at_most_once("t", Bytes::new());
        publish.qos = QoS::AtLeastOnce;
        assert!(matches!(
            Packet::Publish(publish).to_bytes(),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn remaining_length_spans_multiple_bytes() {
        let payload = Bytes::from(vec![b'x'; 300]);
        let packet = Packet::Publish(Publish::at_most_once("t", payload));
        let bytes = packet.to_bytes().unwrap();
        // 2 (topic len) + 1 (topic) + 300 = 303 = 0xAF 0x02
        assert_eq!(&bytes[1..3], &[0xAF, 0x02]);
        assert_eq!(decode_one(&bytes), packet);
    }

    #[test]
    fn reader_waits_for_split_frames() {
        let bytes = Packet::SubAck {
            packet_id: 1,
            codes: vec![0, 1, 0x80],
        }
        .to_bytes()
        .unwrap();

        let mut reader = PacketReader::new();
        reader.push(&bytes[..1]);
        assert!(reader.next_packet().unwrap().is_none());
        reader.push(&bytes[1..4]);
        assert!(reader.next_packet().unwrap().is_none());
        reader.push(&bytes[4..]);
        assert_eq!(
            reader.next_packet().unwrap(),
            Some(Packet::SubAck {
                packet_id: 1,
                codes: vec![0, 1, 0x80]
            })
        );
    }

    #[test]
    fn reader_yields_back_to_back_packets() {
        let mut reader = PacketReader::new();
        reader.push(&Packet::PingResp.to_bytes().unwrap());
        reader.push(&Packet::PubAck { packet_id: 9 }.to_bytes().unwrap());

        assert_eq!(reader.next_packet().unwrap(), Some(Packet::PingResp));
        assert_eq!(
            reader.next_packet().unwrap(),
            Some(Packet::PubAck { packet_id: 9 })
        );
        assert_eq!(reader.next_packet().unwrap(), None);
    }

    #[test]
    fn subscribe_uses_reserved_flags() {
        let bytes = Packet::Subscribe {
            packet_id: 1,
            topics: vec![("$iothub/twin/res/#".into(), QoS::AtMostOnce)],
        }
        .to_bytes()
        .unwrap();
        assert_eq!(bytes[0], 0x82);
    }

    #[test]
    fn overlong_remaining_length_is_an_error() {
        let mut reader = PacketReader::new();
        reader.push(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(matches!(reader.next_packet(), Err(Error::Protocol(_))));
    }

    #[test]
    fn truncated_connack_is_an_error() {
        let mut reader = PacketReader::new();
        reader.push(&[0x20, 0x01, 0x00]);
        assert!(matches!(reader.next_packet(), Err(Error::Protocol(_))));
    }
}
