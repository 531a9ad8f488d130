use bytes::Bytes;

use crate::geom::Size;
use crate::sessions::{Event, EventData, SessionError};

pub const FRAME_VERSION: u8 = 1;
pub const KIND_OUTPUT: u8 = 0x01;
pub const KIND_SIZE: u8 = 0x02;

/// Encode one event as `version | kind | stamp_ns:i64_be | len:u32_be |
/// payload`.
pub fn encode_event(event: &Event) -> Vec<u8> {
    let (kind, payload): (u8, Vec<u8>) = match &event.data {
        EventData::Output(data) => (KIND_OUTPUT, data.to_vec()),
        EventData::Size(size) => {
            let mut payload = Vec::with_capacity(4);
            payload.extend_from_slice(&(size.r.max(0) as u16).to_be_bytes());
            payload.extend_from_slice(&(size.c.max(0) as u16).to_be_bytes());
            (KIND_SIZE, payload)
        }
    };

    let mut frame = Vec::with_capacity(14 + payload.len());
    frame.push(FRAME_VERSION);
    frame.push(kind);
    frame.extend_from_slice(&event.stamp.to_be_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> Option<u16> {
    let value = bytes.get(*cursor..*cursor + 2)?;
    *cursor += 2;
    Some(u16::from_be_bytes(value.try_into().unwrap()))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Option<u32> {
    let value = bytes.get(*cursor..*cursor + 4)?;
    *cursor += 4;
    Some(u32::from_be_bytes(value.try_into().unwrap()))
}

fn read_i64(bytes: &[u8], cursor: &mut usize) -> Option<i64> {
    let value = bytes.get(*cursor..*cursor + 8)?;
    *cursor += 8;
    Some(i64::from_be_bytes(value.try_into().unwrap()))
}

/// Decode a complete session. A truncated tail frame ends the stream with a
/// warning rather than an error; anything else malformed is a protocol
/// error.
pub fn decode_events(bytes: &[u8]) -> Result<Vec<Event>, SessionError> {
    let mut events = Vec::new();
    let mut cursor = 0;

    while cursor < bytes.len() {
        let start = cursor;

        let header = (
            bytes.get(cursor).copied(),
            bytes.get(cursor + 1).copied(),
            {
                cursor += 2;
                read_i64(bytes, &mut cursor)
            },
            read_u32(bytes, &mut cursor),
        );

        let (Some(version), Some(kind), Some(stamp), Some(len)) = header else {
            tracing::warn!(
                target: "cy::session",
                offset = start,
                "ignoring truncated session frame header"
            );
            break;
        };

        if version != FRAME_VERSION {
            return Err(SessionError::UnsupportedVersion(version));
        }

        let Some(payload) = bytes.get(cursor..cursor + len as usize) else {
            tracing::warn!(
                target: "cy::session",
                offset = start,
                expected = len,
                "ignoring truncated session frame payload"
            );
            break;
        };
        cursor += len as usize;

        match kind {
            KIND_OUTPUT => events.push(Event {
                stamp,
                data: EventData::Output(Bytes::copy_from_slice(payload)),
            }),
            KIND_SIZE => {
                let mut offset = 0;
                let rows = read_u16(payload, &mut offset)
                    .ok_or(SessionError::Protocol("size payload too short"))?;
                let cols = read_u16(payload, &mut offset)
                    .ok_or(SessionError::Protocol("size payload too short"))?;
                events.push(Event {
                    stamp,
                    data: EventData::Size(Size::new(rows as i32, cols as i32)),
                });
            }
            _ => return Err(SessionError::Protocol("unknown frame kind")),
        }
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let events = vec![
            Event::size(10, Size::new(26, 80)),
            Event::output(20, &b"hello"[..]),
            Event::output(30, &b""[..]),
        ];

        let mut bytes = Vec::new();
        for event in &events {
            bytes.extend(encode_event(event));
        }

        let decoded = decode_events(&bytes).expect("decode");
        assert_eq!(decoded, events);
    }

    #[test]
    fn truncated_tail_is_ignored() {
        let mut bytes = encode_event(&Event::output(1, &b"abc"[..]));
        let complete = bytes.len();
        bytes.extend(encode_event(&Event::output(2, &b"def"[..])));
        bytes.truncate(complete + 5);

        let decoded = decode_events(&bytes).expect("decode");
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let mut bytes = encode_event(&Event::output(1, &b"x"[..]));
        bytes[1] = 0x7f;
        assert!(decode_events(&bytes).is_err());
    }
}
