//! The client-server wire protocol: a single-byte type tag followed by a
//! 4-byte big-endian length and the payload.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const TAG_HANDSHAKE: u8 = 0x01;
pub const TAG_SIZE: u8 = 0x02;
pub const TAG_INPUT: u8 = 0x03;
pub const TAG_OUTPUT: u8 = 0x04;
pub const TAG_ERROR: u8 = 0x05;
pub const TAG_EXEC: u8 = 0x06;
pub const TAG_EXEC_RESULT: u8 = 0x07;

/// Frames larger than this are rejected as malformed.
const MAX_FRAME: u32 = 16 * 1024 * 1024;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub term: String,
    pub shell: String,
    pub editor: String,
    pub rows: u16,
    pub cols: u16,
    /// The client's color profile name (e.g. "truecolor").
    pub profile: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    pub source: String,
    pub code: String,
    pub node: u64,
    pub dir: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResponse {
    pub ok: bool,
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Must be the first frame a client sends.
    Handshake(Handshake),
    Size { rows: u16, cols: u16 },
    Input(Vec<u8>),
    Output(Vec<u8>),
    Error(String),
    Exec(ExecRequest),
    ExecResult(ExecResponse),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown frame tag {0:#x}")]
    UnknownTag(u8),
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("frame payload invalid: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("connection closed")]
    Closed,
}

pub fn encode_message(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let (tag, payload): (u8, Vec<u8>) = match message {
        Message::Handshake(handshake) => (TAG_HANDSHAKE, serde_json::to_vec(handshake)?),
        Message::Size { rows, cols } => {
            let mut payload = Vec::with_capacity(4);
            payload.extend_from_slice(&rows.to_be_bytes());
            payload.extend_from_slice(&cols.to_be_bytes());
            (TAG_SIZE, payload)
        }
        Message::Input(data) => (TAG_INPUT, data.clone()),
        Message::Output(data) => (TAG_OUTPUT, data.clone()),
        Message::Error(text) => (TAG_ERROR, text.as_bytes().to_vec()),
        Message::Exec(request) => (TAG_EXEC, serde_json::to_vec(request)?),
        Message::ExecResult(response) => (TAG_EXEC_RESULT, serde_json::to_vec(response)?),
    };

    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.push(tag);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub fn decode_message(tag: u8, payload: &[u8]) -> Result<Message, ProtocolError> {
    match tag {
        TAG_HANDSHAKE => Ok(Message::Handshake(serde_json::from_slice(payload)?)),
        TAG_SIZE => {
            if payload.len() != 4 {
                return Err(ProtocolError::Malformed("size payload must be 4 bytes"));
            }
            Ok(Message::Size {
                rows: u16::from_be_bytes([payload[0], payload[1]]),
                cols: u16::from_be_bytes([payload[2], payload[3]]),
            })
        }
        TAG_INPUT => Ok(Message::Input(payload.to_vec())),
        TAG_OUTPUT => Ok(Message::Output(payload.to_vec())),
        TAG_ERROR => Ok(Message::Error(
            String::from_utf8_lossy(payload).into_owned(),
        )),
        TAG_EXEC => Ok(Message::Exec(serde_json::from_slice(payload)?)),
        TAG_EXEC_RESULT => Ok(Message::ExecResult(serde_json::from_slice(payload)?)),
        other => Err(ProtocolError::UnknownTag(other)),
    }
}

pub async fn read_message<R>(reader: &mut R) -> Result<Message, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 5];
    reader.read_exact(&mut header).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::Closed
        } else {
            ProtocolError::Io(err)
        }
    })?;

    let tag = header[0];
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len > MAX_FRAME {
        return Err(ProtocolError::Malformed("frame too large"));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    decode_message(tag, &payload)
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_message(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_over_a_duplex_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let messages = vec![
            Message::Handshake(Handshake {
                term: "xterm-256color".into(),
                shell: "/bin/bash".into(),
                editor: "vim".into(),
                rows: 26,
                cols: 80,
                profile: "truecolor".into(),
            }),
            Message::Size { rows: 40, cols: 120 },
            Message::Input(b"ls\r".to_vec()),
            Message::Output(b"README.md\r\n".to_vec()),
            Message::Error("no such node".into()),
        ];

        for message in &messages {
            write_message(&mut client, message).await.expect("write");
        }

        for expected in &messages {
            let received = read_message(&mut server).await.expect("read");
            assert_eq!(&received, expected);
        }
    }

    #[tokio::test]
    async fn closed_connection_is_distinct_from_io_errors() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let result = read_message(&mut server).await;
        assert!(matches!(result, Err(ProtocolError::Closed)));
    }

    #[test]
    fn rejects_unknown_tags() {
        assert!(matches!(
            decode_message(0x7f, b""),
            Err(ProtocolError::UnknownTag(0x7f))
        ));
    }

    #[test]
    fn rejects_short_size_payload() {
        assert!(decode_message(TAG_SIZE, b"xy").is_err());
    }
}
