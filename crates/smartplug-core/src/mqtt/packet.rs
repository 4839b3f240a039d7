//! MQTT 3.1.1 packet encoding and decoding.
//!
//! Only the subset a device client needs: CONNECT, PUBLISH (QoS 0/1),
//! PUBACK, SUBSCRIBE, PINGREQ and DISCONNECT outbound; CONNACK, PUBLISH,
//! PUBACK, SUBACK and PINGRESP inbound. Everything works on caller-owned
//! slices, no allocation.

use thiserror_no_std::Error;

const CONNECT: u8 = 1;
const CONNACK: u8 = 2;
const PUBLISH: u8 = 3;
const PUBACK: u8 = 4;
const SUBSCRIBE: u8 = 8;
const SUBACK: u8 = 9;
const UNSUBACK: u8 = 11;
const PINGREQ: u8 = 12;
const PINGRESP: u8 = 13;
const DISCONNECT: u8 = 14;

const PROTOCOL_NAME: &[u8] = b"MQTT";
const PROTOCOL_LEVEL: u8 = 4;

const CONNECT_FLAG_CLEAN_SESSION: u8 = 0x02;
const CONNECT_FLAG_WILL: u8 = 0x04;
const CONNECT_FLAG_WILL_RETAIN: u8 = 0x20;
const CONNECT_FLAG_PASSWORD: u8 = 0x40;
const CONNECT_FLAG_USERNAME: u8 = 0x80;

/// Largest value the remaining length field can carry
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// SUBACK return code for a rejected subscription
pub const SUBACK_FAILURE: u8 = 0x80;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer too small for packet")]
    BufferTooSmall,
    #[error("malformed remaining length")]
    MalformedLength,
    #[error("malformed {0} packet")]
    Malformed(&'static str),
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("string exceeds 65535 bytes")]
    StringTooLong,
    #[error("unsupported packet type {0}")]
    UnsupportedPacket(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
}

impl QoS {
    fn from_bits(bits: u8) -> Result<Self, CodecError> {
        match bits {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            // QoS 2 is never requested, so a broker must not send it
            _ => Err(CodecError::Malformed("publish qos")),
        }
    }
}

/// Message the broker publishes if the client disappears
#[derive(Debug, Clone, Copy)]
pub struct LastWill<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions<'a> {
    pub client_id: &'a str,
    pub keep_alive_secs: u16,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
    pub will: Option<LastWill<'a>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    /// Present for QoS 1
    pub packet_id: Option<u16>,
}

/// Packets a client can receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    ConnAck { session_present: bool, return_code: u8 },
    Publish(Publish<'a>),
    PubAck { packet_id: u16 },
    SubAck { packet_id: u16, return_code: u8 },
    UnsubAck { packet_id: u16 },
    PingResp,
}

/// Cursor over an output buffer
struct Writer<'b> {
    buf: &'b mut [u8],
    pos: usize,
}

impl<'b> Writer<'b> {
    fn new(buf: &'b mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self, value: u8) -> Result<(), CodecError> {
        let slot = self.buf.get_mut(self.pos).ok_or(CodecError::BufferTooSmall)?;
        *slot = value;
        self.pos += 1;
        Ok(())
    }

    fn u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.bytes(&value.to_be_bytes())
    }

    fn bytes(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let end = self.pos + data.len();
        let dest = self
            .buf
            .get_mut(self.pos..end)
            .ok_or(CodecError::BufferTooSmall)?;
        dest.copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    /// Length-prefixed binary / UTF-8 field
    fn prefixed(&mut self, data: &[u8]) -> Result<(), CodecError> {
        let len = u16::try_from(data.len()).map_err(|_| CodecError::StringTooLong)?;
        self.u16(len)?;
        self.bytes(data)
    }

    fn remaining_length(&mut self, mut len: usize) -> Result<(), CodecError> {
        if len > MAX_REMAINING_LENGTH {
            return Err(CodecError::MalformedLength);
        }
        loop {
            let mut byte = (len % 128) as u8;
            len /= 128;
            if len > 0 {
                byte |= 0x80;
            }
            self.u8(byte)?;
            if len == 0 {
                return Ok(());
            }
        }
    }

    fn finish(self) -> usize {
        self.pos
    }
}

fn prefixed_len(data: &[u8]) -> usize {
    2 + data.len()
}

pub fn encode_connect(buf: &mut [u8], options: &ConnectOptions<'_>) -> Result<usize, CodecError> {
    let mut flags = CONNECT_FLAG_CLEAN_SESSION;
    let mut remaining = prefixed_len(PROTOCOL_NAME) + 1 + 1 + 2;
    remaining += prefixed_len(options.client_id.as_bytes());

    if let Some(will) = &options.will {
        flags |= CONNECT_FLAG_WILL | ((will.qos as u8) << 3);
        if will.retain {
            flags |= CONNECT_FLAG_WILL_RETAIN;
        }
        remaining += prefixed_len(will.topic.as_bytes()) + prefixed_len(will.payload);
    }
    if let Some(username) = options.username {
        flags |= CONNECT_FLAG_USERNAME;
        remaining += prefixed_len(username.as_bytes());
    }
    if let Some(password) = options.password {
        flags |= CONNECT_FLAG_PASSWORD;
        remaining += prefixed_len(password);
    }

    let mut w = Writer::new(buf);
    w.u8(CONNECT << 4)?;
    w.remaining_length(remaining)?;
    w.prefixed(PROTOCOL_NAME)?;
    w.u8(PROTOCOL_LEVEL)?;
    w.u8(flags)?;
    w.u16(options.keep_alive_secs)?;
    w.prefixed(options.client_id.as_bytes())?;
    if let Some(will) = &options.will {
        w.prefixed(will.topic.as_bytes())?;
        w.prefixed(will.payload)?;
    }
    if let Some(username) = options.username {
        w.prefixed(username.as_bytes())?;
    }
    if let Some(password) = options.password {
        w.prefixed(password)?;
    }
    Ok(w.finish())
}

pub fn encode_publish(buf: &mut [u8], publish: &Publish<'_>) -> Result<usize, CodecError> {
    let mut header = PUBLISH << 4 | (publish.qos as u8) << 1;
    if publish.retain {
        header |= 0x01;
    }
    if publish.dup {
        header |= 0x08;
    }

    let packet_id = match (publish.qos, publish.packet_id) {
        (QoS::AtMostOnce, _) => None,
        (QoS::AtLeastOnce, Some(id)) if id != 0 => Some(id),
        (QoS::AtLeastOnce, _) => return Err(CodecError::Malformed("publish packet id")),
    };

    let remaining = prefixed_len(publish.topic.as_bytes())
        + if packet_id.is_some() { 2 } else { 0 }
        + publish.payload.len();

    let mut w = Writer::new(buf);
    w.u8(header)?;
    w.remaining_length(remaining)?;
    w.prefixed(publish.topic.as_bytes())?;
    if let Some(id) = packet_id {
        w.u16(id)?;
    }
    w.bytes(publish.payload)?;
    Ok(w.finish())
}

pub fn encode_puback(buf: &mut [u8], packet_id: u16) -> Result<usize, CodecError> {
    let mut w = Writer::new(buf);
    w.u8(PUBACK << 4)?;
    w.remaining_length(2)?;
    w.u16(packet_id)?;
    Ok(w.finish())
}

/// SUBSCRIBE for a single topic filter
pub fn encode_subscribe(
    buf: &mut [u8],
    packet_id: u16,
    filter: &str,
    qos: QoS,
) -> Result<usize, CodecError> {
    let remaining = 2 + prefixed_len(filter.as_bytes()) + 1;
    let mut w = Writer::new(buf);
    // SUBSCRIBE requires the reserved flag bits to be 0b0010
    w.u8(SUBSCRIBE << 4 | 0x02)?;
    w.remaining_length(remaining)?;
    w.u16(packet_id)?;
    w.prefixed(filter.as_bytes())?;
    w.u8(qos as u8)?;
    Ok(w.finish())
}

pub fn encode_pingreq(buf: &mut [u8]) -> Result<usize, CodecError> {
    let mut w = Writer::new(buf);
    w.u8(PINGREQ << 4)?;
    w.u8(0)?;
    Ok(w.finish())
}

pub fn encode_disconnect(buf: &mut [u8]) -> Result<usize, CodecError> {
    let mut w = Writer::new(buf);
    w.u8(DISCONNECT << 4)?;
    w.u8(0)?;
    Ok(w.finish())
}

/// Parse the remaining length field starting at `buf[1]`.
///
/// Returns `(value, bytes used)` or `None` when more input is needed.
fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, CodecError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, byte) in buf.iter().skip(1).take(4).enumerate() {
        value += (*byte & 0x7f) as usize * multiplier;
        if *byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 5 {
        // Four continuation bytes in a row
        return Err(CodecError::MalformedLength);
    }
    Ok(None)
}

/// Total length of the first frame in `buf`, or `None` if it is incomplete
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, CodecError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let Some((remaining, len_bytes)) = decode_remaining_length(buf)? else {
        return Ok(None);
    };
    let total = 1 + len_bytes + remaining;
    Ok((buf.len() >= total).then_some(total))
}

fn read_u16(body: &[u8], at: usize, what: &'static str) -> Result<u16, CodecError> {
    body.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or(CodecError::Malformed(what))
}

/// Decode one complete frame. `frame` must be exactly what [`frame_len`]
/// reported.
pub fn decode(frame: &[u8]) -> Result<Packet<'_>, CodecError> {
    let Some((remaining, len_bytes)) = decode_remaining_length(frame)? else {
        return Err(CodecError::BufferTooSmall);
    };
    let header = frame[0];
    let start = 1 + len_bytes;
    let body = frame
        .get(start..start + remaining)
        .ok_or(CodecError::BufferTooSmall)?;

    match header >> 4 {
        CONNACK => {
            if body.len() != 2 {
                return Err(CodecError::Malformed("connack"));
            }
            Ok(Packet::ConnAck {
                session_present: body[0] & 0x01 != 0,
                return_code: body[1],
            })
        }
        PUBLISH => {
            let qos = QoS::from_bits((header >> 1) & 0x03)?;
            let topic_len = read_u16(body, 0, "publish topic")? as usize;
            let topic_bytes = body
                .get(2..2 + topic_len)
                .ok_or(CodecError::Malformed("publish topic"))?;
            let topic = core::str::from_utf8(topic_bytes).map_err(|_| CodecError::InvalidUtf8)?;
            let mut offset = 2 + topic_len;
            let packet_id = match qos {
                QoS::AtMostOnce => None,
                QoS::AtLeastOnce => {
                    let id = read_u16(body, offset, "publish packet id")?;
                    offset += 2;
                    Some(id)
                }
            };
            Ok(Packet::Publish(Publish {
                topic,
                payload: &body[offset..],
                qos,
                retain: header & 0x01 != 0,
                dup: header & 0x08 != 0,
                packet_id,
            }))
        }
        PUBACK => Ok(Packet::PubAck {
            packet_id: read_u16(body, 0, "puback")?,
        }),
        SUBACK => {
            let packet_id = read_u16(body, 0, "suback")?;
            let return_code = *body.get(2).ok_or(CodecError::Malformed("suback"))?;
            Ok(Packet::SubAck {
                packet_id,
                return_code,
            })
        }
        UNSUBACK => Ok(Packet::UnsubAck {
            packet_id: read_u16(body, 0, "unsuback")?,
        }),
        PINGRESP => Ok(Packet::PingResp),
        other => Err(CodecError::UnsupportedPacket(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_connect_with_will_and_credentials() {
        let mut buf = [0u8; 128];
        let options = ConnectOptions {
            client_id: "plug",
            keep_alive_secs: 60,
            username: Some("u"),
            password: Some(b"p"),
            will: Some(LastWill {
                topic: "t",
                payload: b"offline",
                qos: QoS::AtLeastOnce,
                retain: true,
            }),
        };
        let len = encode_connect(&mut buf, &options).unwrap();

        let expected: &[u8] = &[
            0x10, 34, // fixed header
            0, 4, b'M', b'Q', b'T', b'T', 4, // protocol
            0b1110_1110, // user, pass, will retain, will qos 1, will, clean
            0, 60, // keep alive
            0, 4, b'p', b'l', b'u', b'g', // client id
            0, 1, b't', // will topic
            0, 7, b'o', b'f', b'f', b'l', b'i', b'n', b'e', // will payload
            0, 1, b'u', // username
            0, 1, b'p', // password
        ];
        assert_eq!(&buf[..len], expected);
    }

    #[test]
    fn test_encode_publish_qos1_requires_packet_id() {
        let mut buf = [0u8; 32];
        let mut publish = Publish {
            topic: "a/b",
            payload: b"ON",
            qos: QoS::AtLeastOnce,
            retain: true,
            dup: false,
            packet_id: None,
        };
        assert_eq!(
            encode_publish(&mut buf, &publish),
            Err(CodecError::Malformed("publish packet id"))
        );

        publish.packet_id = Some(7);
        let len = encode_publish(&mut buf, &publish).unwrap();
        assert_eq!(
            &buf[..len],
            &[0x33, 9, 0, 3, b'a', b'/', b'b', 0, 7, b'O', b'N']
        );
    }

    #[test]
    fn test_encode_subscribe_and_control_packets() {
        let mut buf = [0u8; 32];
        let len = encode_subscribe(&mut buf, 1, "x/+", QoS::AtLeastOnce).unwrap();
        assert_eq!(&buf[..len], &[0x82, 8, 0, 1, 0, 3, b'x', b'/', b'+', 1]);

        let len = encode_pingreq(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[0xC0, 0]);
        let len = encode_disconnect(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[0xE0, 0]);
        let len = encode_puback(&mut buf, 0x0102).unwrap();
        assert_eq!(&buf[..len], &[0x40, 2, 1, 2]);
    }

    #[test]
    fn test_encode_reports_small_buffer() {
        let mut buf = [0u8; 4];
        let publish = Publish {
            topic: "topic",
            payload: b"payload",
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            packet_id: None,
        };
        assert_eq!(
            encode_publish(&mut buf, &publish),
            Err(CodecError::BufferTooSmall)
        );
    }

    #[test]
    fn test_multi_byte_remaining_length() {
        let payload = [0xAAu8; 200];
        let publish = Publish {
            topic: "t",
            payload: &payload,
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            packet_id: None,
        };
        let mut buf = [0u8; 256];
        let len = encode_publish(&mut buf, &publish).unwrap();
        // 3 + 200 = 203 = 0x4B + 1 * 128
        assert_eq!(&buf[1..3], &[0xCB, 0x01]);
        assert_eq!(frame_len(&buf[..len]).unwrap(), Some(len));

        match decode(&buf[..len]).unwrap() {
            Packet::Publish(p) => assert_eq!(p.payload.len(), 200),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_frame_len_needs_more() {
        assert_eq!(frame_len(&[]).unwrap(), None);
        assert_eq!(frame_len(&[0x30]).unwrap(), None);
        assert_eq!(frame_len(&[0x30, 0x85]).unwrap(), None);
        assert_eq!(frame_len(&[0x30, 3, 0, 1]).unwrap(), None);
        assert_eq!(frame_len(&[0x30, 3, 0, 1, b'a']).unwrap(), Some(5));
    }

    #[test]
    fn test_frame_len_rejects_overlong_length() {
        assert_eq!(
            frame_len(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]),
            Err(CodecError::MalformedLength)
        );
    }

    #[test]
    fn test_decode_incoming_packets() {
        assert_eq!(
            decode(&[0x20, 2, 0, 5]).unwrap(),
            Packet::ConnAck {
                session_present: false,
                return_code: 5
            }
        );
        assert_eq!(
            decode(&[0x90, 3, 0, 9, 1]).unwrap(),
            Packet::SubAck {
                packet_id: 9,
                return_code: 1
            }
        );
        assert_eq!(
            decode(&[0x40, 2, 0, 3]).unwrap(),
            Packet::PubAck { packet_id: 3 }
        );
        assert_eq!(decode(&[0xD0, 0]).unwrap(), Packet::PingResp);
        assert_eq!(
            decode(&[0xC0, 0]),
            Err(CodecError::UnsupportedPacket(12))
        );
    }

    #[test]
    fn test_decode_publish_qos1() {
        let frame = [0x32, 8, 0, 3, b'a', b'/', b'b', 0, 42, b'1'];
        let Packet::Publish(publish) = decode(&frame).unwrap() else {
            panic!("expected publish");
        };
        assert_eq!(publish.topic, "a/b");
        assert_eq!(publish.payload, b"1");
        assert_eq!(publish.qos, QoS::AtLeastOnce);
        assert_eq!(publish.packet_id, Some(42));
        assert!(!publish.retain);
    }

    #[test]
    fn test_decode_rejects_truncated_topic() {
        let frame = [0x30, 3, 0, 9, b'a'];
        assert_eq!(decode(&frame), Err(CodecError::Malformed("publish topic")));
    }
}
