//! Binary wire protocol for the paintboard.
//!
//! Wire format (multi-byte fields little-endian unless noted):
//! ```text
//! Client → Server
//!   PAINT     ┌──────┬─────┬─────┬───────┬────────────┬──────────┬────────┐
//!             │ 0xFE │ x   │ y   │ R G B │ uid (BE)   │ token    │ req id │
//!             │ 1 B  │ u16 │ u16 │ 3 B   │ 3 B        │ 16 B     │ u16    │
//!             └──────┴─────┴─────┴───────┴────────────┴──────────┴────────┘
//!   PONG      0xFB
//!
//! Server → Client
//!   ACK       0xFF │ req id u16 │ status u8
//!   BROADCAST 0xFA │ x u16 │ y u16 │ R G B
//!   HEARTBEAT 0xFC
//! ```
//!
//! A single WebSocket message may carry several concatenated frames.
//! The message is decoded as a whole before any frame is acted upon.

use uuid::Uuid;

pub const TAG_PAINT: u8 = 0xFE;
pub const TAG_PONG: u8 = 0xFB;
pub const TAG_ACK: u8 = 0xFF;
pub const TAG_BROADCAST: u8 = 0xFA;
pub const TAG_HEARTBEAT: u8 = 0xFC;

/// PAINT payload length after the tag.
pub const PAINT_PAYLOAD_LEN: usize = 2 + 2 + 3 + 3 + 16 + 2;
/// ACK payload length after the tag.
pub const ACK_PAYLOAD_LEN: usize = 2 + 1;
/// BROADCAST payload length after the tag.
pub const BROADCAST_PAYLOAD_LEN: usize = 2 + 2 + 3;

/// ACK status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AckStatus {
    /// Paint accepted
    Success = 0xEF,
    /// Malformed or out-of-range fields
    Malformed = 0xEC,
    /// Token rejected
    InvalidToken = 0xED,
    /// Missing PAINT capability
    PermissionDenied = 0xEB,
    /// Cooldown still running
    Cooldown = 0xEE,
    /// Outside the activity window
    OutOfWindow = 0xEA,
}

impl AckStatus {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0xEF => Some(Self::Success),
            0xEC => Some(Self::Malformed),
            0xED => Some(Self::InvalidToken),
            0xEB => Some(Self::PermissionDenied),
            0xEE => Some(Self::Cooldown),
            0xEA => Some(Self::OutOfWindow),
            _ => None,
        }
    }
}

/// A decoded PAINT frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaintFrame {
    pub x: u16,
    pub y: u16,
    /// 0xRRGGBB
    pub color: u32,
    /// 24-bit user id
    pub uid: u32,
    pub token: Uuid,
    pub request_id: u16,
}

/// Frames sent by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFrame {
    Paint(PaintFrame),
    /// Heartbeat reply; accepted and ignored
    Pong,
}

/// Frames sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFrame {
    Ack { request_id: u16, status: AckStatus },
    Broadcast { x: u16, y: u16, color: u32 },
    Heartbeat,
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Message contained no bytes
    Empty,
    /// Tag byte not part of the protocol
    UnknownTag(u8),
    /// Frame shorter than its tag requires
    Truncated { tag: u8, needed: usize, available: usize },
    /// ACK carried a status byte outside the known set
    UnknownStatus(u8),
    /// Text message on a binary-only channel
    UnexpectedText,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty message"),
            Self::UnknownTag(tag) => write!(f, "Unknown frame tag 0x{tag:02X}"),
            Self::Truncated { tag, needed, available } => write!(
                f,
                "Truncated frame 0x{tag:02X}: need {needed} bytes, have {available}"
            ),
            Self::UnknownStatus(s) => write!(f, "Unknown ACK status 0x{s:02X}"),
            Self::UnexpectedText => write!(f, "Text message on binary channel"),
        }
    }
}

impl std::error::Error for ProtocolError {}

fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn read_rgb(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}

fn push_rgb(buf: &mut Vec<u8>, color: u32) {
    let [_, r, g, b] = color.to_be_bytes();
    buf.extend_from_slice(&[r, g, b]);
}

/// Ensure `rest` holds at least `needed` payload bytes for `tag`.
fn require(tag: u8, rest: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if rest.len() < needed {
        return Err(ProtocolError::Truncated {
            tag,
            needed,
            available: rest.len(),
        });
    }
    Ok(())
}

impl PaintFrame {
    fn decode_payload(p: &[u8]) -> Self {
        let mut token = [0u8; 16];
        token.copy_from_slice(&p[10..26]);
        Self {
            x: read_u16_le(&p[0..2]),
            y: read_u16_le(&p[2..4]),
            color: read_rgb(&p[4..7]),
            uid: u32::from_be_bytes([0, p[7], p[8], p[9]]),
            token: Uuid::from_bytes(token),
            request_id: read_u16_le(&p[26..28]),
        }
    }
}

impl ClientFrame {
    /// Decode one frame from the front of `bytes`.
    ///
    /// Returns the frame and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let (&tag, rest) = bytes.split_first().ok_or(ProtocolError::Empty)?;
        match tag {
            TAG_PAINT => {
                require(tag, rest, PAINT_PAYLOAD_LEN)?;
                let frame = PaintFrame::decode_payload(&rest[..PAINT_PAYLOAD_LEN]);
                Ok((Self::Paint(frame), 1 + PAINT_PAYLOAD_LEN))
            }
            TAG_PONG => Ok((Self::Pong, 1)),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }

    /// Decode every frame in a message. Any malformed frame fails the whole
    /// message so that nothing is processed partially.
    pub fn decode_all(bytes: &[u8]) -> Result<Vec<Self>, ProtocolError> {
        if bytes.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let mut frames = Vec::with_capacity(bytes.len() / (1 + PAINT_PAYLOAD_LEN) + 1);
        let mut cursor = 0;
        while cursor < bytes.len() {
            let (frame, used) = Self::decode(&bytes[cursor..])?;
            frames.push(frame);
            cursor += used;
        }
        Ok(frames)
    }

    /// Serialize to binary wire format (client side).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + PAINT_PAYLOAD_LEN);
        self.encode_into(&mut buf);
        buf
    }

    /// Append the wire form to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Paint(p) => {
                buf.push(TAG_PAINT);
                buf.extend_from_slice(&p.x.to_le_bytes());
                buf.extend_from_slice(&p.y.to_le_bytes());
                push_rgb(buf, p.color);
                let [_, u0, u1, u2] = p.uid.to_be_bytes();
                buf.extend_from_slice(&[u0, u1, u2]);
                buf.extend_from_slice(p.token.as_bytes());
                buf.extend_from_slice(&p.request_id.to_le_bytes());
            }
            Self::Pong => buf.push(TAG_PONG),
        }
    }
}

impl ServerFrame {
    /// Serialize to binary wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + BROADCAST_PAYLOAD_LEN);
        match self {
            Self::Ack { request_id, status } => {
                buf.push(TAG_ACK);
                buf.extend_from_slice(&request_id.to_le_bytes());
                buf.push(*status as u8);
            }
            Self::Broadcast { x, y, color } => {
                buf.push(TAG_BROADCAST);
                buf.extend_from_slice(&x.to_le_bytes());
                buf.extend_from_slice(&y.to_le_bytes());
                push_rgb(&mut buf, *color);
            }
            Self::Heartbeat => buf.push(TAG_HEARTBEAT),
        }
        buf
    }

    /// Decode one server frame from the front of `bytes` (client side).
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let (&tag, rest) = bytes.split_first().ok_or(ProtocolError::Empty)?;
        match tag {
            TAG_ACK => {
                require(tag, rest, ACK_PAYLOAD_LEN)?;
                let status =
                    AckStatus::from_u8(rest[2]).ok_or(ProtocolError::UnknownStatus(rest[2]))?;
                let frame = Self::Ack {
                    request_id: read_u16_le(&rest[0..2]),
                    status,
                };
                Ok((frame, 1 + ACK_PAYLOAD_LEN))
            }
            TAG_BROADCAST => {
                require(tag, rest, BROADCAST_PAYLOAD_LEN)?;
                let frame = Self::Broadcast {
                    x: read_u16_le(&rest[0..2]),
                    y: read_u16_le(&rest[2..4]),
                    color: read_rgb(&rest[4..7]),
                };
                Ok((frame, 1 + BROADCAST_PAYLOAD_LEN))
            }
            TAG_HEARTBEAT => Ok((Self::Heartbeat, 1)),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> Uuid {
        Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap()
    }

    #[test]
    fn test_paint_frame_layout() {
        let frame = ClientFrame::Paint(PaintFrame {
            x: 0x0102,
            y: 0x0304,
            color: 0x112233,
            uid: 0x0A0B0C,
            token: token(),
            request_id: 0xBEEF,
        });
        let bytes = frame.encode();

        assert_eq!(bytes.len(), 1 + PAINT_PAYLOAD_LEN);
        assert_eq!(bytes[0], 0xFE);
        assert_eq!(&bytes[1..3], &[0x02, 0x01]); // x little-endian
        assert_eq!(&bytes[3..5], &[0x04, 0x03]); // y little-endian
        assert_eq!(&bytes[5..8], &[0x11, 0x22, 0x33]);
        assert_eq!(&bytes[8..11], &[0x0A, 0x0B, 0x0C]); // uid big-endian
        assert_eq!(&bytes[11..27], token().as_bytes());
        assert_eq!(&bytes[27..29], &[0xEF, 0xBE]);
    }

    #[test]
    fn test_decode_paint_from_raw_bytes() {
        let mut raw = vec![0xFE, 0x01, 0x00, 0x02, 0x00, 0x11, 0x22, 0x33, 0x00, 0x00, 0x07];
        raw.extend_from_slice(token().as_bytes());
        raw.extend_from_slice(&[0x2A, 0x00]);

        let (frame, used) = ClientFrame::decode(&raw).unwrap();
        assert_eq!(used, raw.len());
        match frame {
            ClientFrame::Paint(p) => {
                assert_eq!((p.x, p.y), (1, 2));
                assert_eq!(p.color, 0x112233);
                assert_eq!(p.uid, 7);
                assert_eq!(p.request_id, 42);
                assert_eq!(p.token.to_string(), "550e8400-e29b-41d4-a716-446655440000");
            }
            other => panic!("Expected paint frame, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_tag() {
        assert_eq!(
            ClientFrame::decode(&[0x00, 1, 2, 3]).unwrap_err(),
            ProtocolError::UnknownTag(0x00)
        );
    }

    #[test]
    fn test_decode_truncated_paint() {
        let err = ClientFrame::decode(&[0xFE, 0x01, 0x00]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                tag: 0xFE,
                needed: PAINT_PAYLOAD_LEN,
                available: 2
            }
        );
    }

    #[test]
    fn test_decode_all_concatenated() {
        let paint = ClientFrame::Paint(PaintFrame {
            x: 3,
            y: 4,
            color: 0xFFFFFF,
            uid: 1,
            token: Uuid::nil(),
            request_id: 9,
        });
        let mut bytes = paint.encode();
        ClientFrame::Pong.encode_into(&mut bytes);
        paint.encode_into(&mut bytes);

        let frames = ClientFrame::decode_all(&bytes).unwrap();
        assert_eq!(frames, vec![paint, ClientFrame::Pong, paint]);
    }

    #[test]
    fn test_decode_all_rejects_trailing_garbage() {
        let mut bytes = ClientFrame::Pong.encode();
        bytes.push(0x42);
        assert_eq!(
            ClientFrame::decode_all(&bytes).unwrap_err(),
            ProtocolError::UnknownTag(0x42)
        );
        assert_eq!(ClientFrame::decode_all(&[]).unwrap_err(), ProtocolError::Empty);
    }

    #[test]
    fn test_ack_encoding() {
        let bytes = ServerFrame::Ack {
            request_id: 0x0102,
            status: AckStatus::Cooldown,
        }
        .encode();
        assert_eq!(bytes, vec![0xFF, 0x02, 0x01, 0xEE]);
    }

    #[test]
    fn test_broadcast_encoding() {
        let bytes = ServerFrame::Broadcast {
            x: 1,
            y: 2,
            color: 0x112233,
        }
        .encode();
        assert_eq!(bytes, vec![0xFA, 0x01, 0x00, 0x02, 0x00, 0x11, 0x22, 0x33]);
    }

    #[test]
    fn test_heartbeat_encoding() {
        assert_eq!(ServerFrame::Heartbeat.encode(), vec![0xFC]);
    }

    #[test]
    fn test_server_frame_decode_unknown_status() {
        let err = ServerFrame::decode(&[0xFF, 0x00, 0x00, 0x01]).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownStatus(0x01));
    }

    #[test]
    fn test_ack_status_values() {
        assert_eq!(AckStatus::Success as u8, 0xEF);
        assert_eq!(AckStatus::Malformed as u8, 0xEC);
        assert_eq!(AckStatus::InvalidToken as u8, 0xED);
        assert_eq!(AckStatus::PermissionDenied as u8, 0xEB);
        assert_eq!(AckStatus::Cooldown as u8, 0xEE);
        assert_eq!(AckStatus::OutOfWindow as u8, 0xEA);
        for status in [AckStatus::Success, AckStatus::Cooldown, AckStatus::OutOfWindow] {
            assert_eq!(AckStatus::from_u8(status as u8), Some(status));
        }
    }

    #[test]
    fn test_protocol_error_display() {
        assert!(ProtocolError::UnknownTag(0x00).to_string().contains("0x00"));
        assert!(ProtocolError::Empty.to_string().contains("Empty"));
    }
}
