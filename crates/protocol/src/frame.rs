//! Frame codec.
//!
//! # Wire format
//!
//! ```text
//! [4 bytes LE: body_len][28 bytes: reserved, zero]
//! [body_len bytes: UTF-8 JSON message]
//! ```
//!
//! `body_len` must be in `1..=MAX_BODY_LEN`. The JSON body is written with
//! keys sorted at every level; deployed peers compare payloads textually.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{FRAME_HEADER_LEN, LENGTH_PREFIX_LEN, MAX_BODY_LEN};
use crate::envelope::Message;

/// Errors produced by the frame codec.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame length {len} outside 1..={MAX_BODY_LEN}")]
    Oversized { len: usize },

    #[error("malformed frame body: {0}")]
    Malformed(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encodes a message into a complete frame (header followed by body).
pub fn encode(message: &Message) -> Result<Vec<u8>, FrameError> {
    // Round-tripping through `Value` sorts every object's keys: serde_json's
    // map is ordered by key unless `preserve_order` is enabled.
    let canonical = serde_json::to_value(message)?;
    let body = serde_json::to_vec(&canonical)?;
    check_len(body.len())?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.resize(FRAME_HEADER_LEN, 0);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads the declared body length from a frame header.
pub fn parse_header(header: &[u8; FRAME_HEADER_LEN]) -> Result<usize, FrameError> {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    prefix.copy_from_slice(&header[..LENGTH_PREFIX_LEN]);
    let len = u32::from_le_bytes(prefix) as usize;
    check_len(len)?;
    Ok(len)
}

/// Decodes a frame from its header and body.
pub fn decode(header: &[u8; FRAME_HEADER_LEN], body: &[u8]) -> Result<Message, FrameError> {
    let len = parse_header(header)?;
    if body.len() != len {
        return Err(FrameError::Malformed(format!(
            "header declares {len} bytes, body has {}",
            body.len()
        )));
    }
    let text = std::str::from_utf8(body)
        .map_err(|e| FrameError::Malformed(format!("invalid UTF-8: {e}")))?;
    serde_json::from_str(text).map_err(|e| FrameError::Malformed(format!("invalid JSON: {e}")))
}

/// Reads exactly one frame from the stream.
///
/// The body buffer is only allocated after the header passed validation.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, FrameError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let len = parse_header(&header)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    decode(&header, &body)
}

/// Writes one frame to the stream and flushes it.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), FrameError> {
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

fn check_len(len: usize) -> Result<(), FrameError> {
    if len == 0 || len > MAX_BODY_LEN {
        return Err(FrameError::Oversized { len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MessageType;
    use serde_json::json;

    fn header_for(len: u32) -> [u8; FRAME_HEADER_LEN] {
        let mut header = [0u8; FRAME_HEADER_LEN];
        header[..4].copy_from_slice(&len.to_le_bytes());
        header
    }

    #[test]
    fn encode_writes_padded_little_endian_header() {
        let frame = encode(&Message::ping()).unwrap();
        let body = br#"{"Type":"Ping"}"#;
        assert_eq!(frame.len(), FRAME_HEADER_LEN + body.len());
        assert_eq!(&frame[..4], &(body.len() as u32).to_le_bytes());
        assert!(frame[4..FRAME_HEADER_LEN].iter().all(|b| *b == 0));
        assert_eq!(&frame[FRAME_HEADER_LEN..], body);
    }

    #[test]
    fn encode_sorts_keys_at_every_level() {
        let msg = Message::new(
            MessageType::SyncState,
            &json!({"zeta": 1, "alpha": {"y": 2, "b": 3}}),
        )
        .unwrap()
        .with_request_id(Some("r1".into()));
        let frame = encode(&msg).unwrap();
        let body = std::str::from_utf8(&frame[FRAME_HEADER_LEN..]).unwrap();
        assert_eq!(
            body,
            r#"{"Payload":{"alpha":{"b":3,"y":2},"zeta":1},"RequestID":"r1","Type":"SyncState"}"#
        );
    }

    #[test]
    fn decode_reverses_encode() {
        let msg = Message::new(
            MessageType::DeviceControl,
            &json!({"Rows": [{"domain": "light", "service": "turn_on", "data": {"entity_id": "light.kitchen"}}]}),
        )
        .unwrap()
        .with_request_id(Some("abc".into()));
        let frame = encode(&msg).unwrap();
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&frame[..FRAME_HEADER_LEN]);
        let decoded = decode(&header, &frame[FRAME_HEADER_LEN..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn decode_rejects_oversized_length() {
        let header = header_for(MAX_BODY_LEN as u32 + 1);
        let err = decode(&header, b"{}").unwrap_err();
        assert!(matches!(err, FrameError::Oversized { len } if len == MAX_BODY_LEN + 1));
    }

    #[test]
    fn decode_rejects_zero_length() {
        let err = decode(&header_for(0), b"").unwrap_err();
        assert!(matches!(err, FrameError::Oversized { len: 0 }));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let body = [0xff, 0xfe, 0xfd];
        let err = decode(&header_for(body.len() as u32), &body).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn decode_rejects_non_json() {
        let body = b"not json {{{";
        let err = decode(&header_for(body.len() as u32), body).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let err = decode(&header_for(10), b"{}").unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn encode_refuses_oversized_body() {
        let big = "x".repeat(MAX_BODY_LEN);
        let msg = Message::new(MessageType::SyncState, &json!({ "blob": big })).unwrap();
        assert!(matches!(encode(&msg), Err(FrameError::Oversized { .. })));
    }

    #[tokio::test]
    async fn frames_stream_back_to_back() {
        let first = Message::ping();
        let second = Message::new(MessageType::UpdateEntitys, &json!({"entity_ids": ["light.a"]}))
            .unwrap();

        let mut buf = Vec::new();
        write_frame(&mut buf, &first).await.unwrap();
        write_frame(&mut buf, &second).await.unwrap();

        let mut cursor = &buf[..];
        assert_eq!(read_frame(&mut cursor).await.unwrap(), first);
        assert_eq!(read_frame(&mut cursor).await.unwrap(), second);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(FrameError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof
        ));
    }

    #[tokio::test]
    async fn read_frame_fails_on_short_body() {
        let frame = encode(&Message::ping()).unwrap();
        let truncated = &frame[..frame.len() - 2];
        let mut cursor = truncated;
        assert!(matches!(read_frame(&mut cursor).await, Err(FrameError::Io(_))));
    }

    #[tokio::test]
    async fn read_frame_rejects_oversized_header_before_reading_body() {
        let header = header_for(u32::MAX);
        let mut cursor = &header[..];
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(FrameError::Oversized { .. })
        ));
    }
}
