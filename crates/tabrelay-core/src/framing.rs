//! Length-prefixed JSON framing used on the native messaging channel.
//!
//! Each frame is a 4-byte unsigned length in native byte order followed by
//! exactly that many bytes of UTF-8 JSON. The framing is symmetric: the host
//! reads and writes the same format.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

use crate::message::Message;

/// Upper bound on a single frame payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Size of the length prefix.
const PREFIX_LEN: usize = 4;

/// Errors from reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Payload was not a JSON object. The frame was consumed; the stream is
    /// still aligned on the next frame.
    #[error("Malformed frame payload: {0}")]
    Decode(String),

    /// Payload exceeded [`MAX_FRAME_LEN`]. The frame was drained.
    #[error("Frame too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },

    #[error("Frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the reader can keep going after this error.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::TooLarge { .. })
    }
}

/// Encode a message into a single length-prefixed frame.
pub fn encode(message: &Message) -> Result<Vec<u8>, FrameError> {
    let payload = serde_json::to_vec(message).map_err(|e| FrameError::Decode(e.to_string()))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    #[allow(clippy::cast_possible_truncation)]
    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
    frame.extend_from_slice(&len.to_ne_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode a frame payload (without the length prefix).
pub fn decode(payload: &[u8]) -> Result<Message, FrameError> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| FrameError::Decode(e.to_string()))?;
    Message::from_value(value).ok_or_else(|| FrameError::Decode("payload is not a JSON object".into()))
}

/// Reads frames from a byte stream.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub const fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the stream ends before a full length prefix
    /// could be read.
    pub async fn read(&mut self) -> Result<Option<Message>, FrameError> {
        let mut prefix = [0u8; PREFIX_LEN];
        match self.inner.read_exact(&mut prefix).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_ne_bytes(prefix) as usize;

        if len > MAX_FRAME_LEN {
            warn!(len, "Draining oversized frame");
            let mut limited = (&mut self.inner).take(len as u64);
            tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
            return Err(FrameError::TooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await?;
        decode(&payload).map(Some)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes frames to a byte stream; concurrent writers never interleave.
pub struct FrameWriter<W> {
    inner: Mutex<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Write one frame and flush.
    pub async fn write(&self, message: &Message) -> Result<(), FrameError> {
        let frame = encode(message)?;
        let mut inner = self.inner.lock().await;
        inner.write_all(&frame).await?;
        inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn msg(value: serde_json::Value) -> Message {
        Message::from_value(value).unwrap()
    }

    async fn round_trip(m: &Message) -> Message {
        let frame = encode(m).unwrap();
        let mut reader = FrameReader::new(frame.as_slice());
        reader.read().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn round_trips_representative_messages() {
        let cases = [
            Message::new(),
            msg(json!({"action": "type", "data": {"text": "héllo ✓ 日本語 🚀"}})),
            msg(json!({
                "action": "getElements",
                "requestId": "12",
                "data": {"selector": "a[href]", "nested": [{"x": 1}, {"y": [null, true, 2.5]}]}
            })),
        ];
        for case in &cases {
            assert_eq!(&round_trip(case).await, case);
        }
    }

    #[tokio::test]
    async fn prefix_is_native_endian_length() {
        let m = msg(json!({"a": 1}));
        let frame = encode(&m).unwrap();
        let len = u32::from_ne_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - 4);
    }

    #[tokio::test]
    async fn empty_stream_is_end_of_stream() {
        let mut reader = FrameReader::new(&[][..]);
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_prefix_is_end_of_stream() {
        let mut reader = FrameReader::new(&[1u8, 0][..]);
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_payload_does_not_desync_stream() {
        let bad = b"{not json";
        let mut bytes = (bad.len() as u32).to_ne_bytes().to_vec();
        bytes.extend_from_slice(bad);
        bytes.extend(encode(&msg(json!({"action": "ping"}))).unwrap());

        let mut reader = FrameReader::new(bytes.as_slice());
        let err = reader.read().await.unwrap_err();
        assert!(matches!(err, FrameError::Decode(_)));
        assert!(err.is_recoverable());

        let next = reader.read().await.unwrap().unwrap();
        assert_eq!(next.action(), Some("ping"));
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_object_payload_is_decode_error() {
        let payload = b"[1,2,3]";
        let mut bytes = (payload.len() as u32).to_ne_bytes().to_vec();
        bytes.extend_from_slice(payload);
        let mut reader = FrameReader::new(bytes.as_slice());
        assert!(matches!(reader.read().await, Err(FrameError::Decode(_))));
    }

    #[tokio::test]
    async fn concurrent_writes_do_not_interleave() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let writer = Arc::new(FrameWriter::new(client));

        let mut handles = Vec::new();
        for i in 0..32 {
            let writer = Arc::clone(&writer);
            handles.push(tokio::spawn(async move {
                let body = "x".repeat(512 + i);
                writer
                    .write(&msg(json!({"action": "fill", "n": i, "body": body})))
                    .await
                    .unwrap();
            }));
        }

        let reader_task = tokio::spawn(async move {
            let mut reader = FrameReader::new(server);
            let mut seen = Vec::new();
            for _ in 0..32 {
                let m = reader.read().await.unwrap().unwrap();
                let n = m.get("n").and_then(serde_json::Value::as_u64).unwrap();
                assert_eq!(m.get_str("body").unwrap().len(), 512 + n as usize);
                seen.push(n);
            }
            seen
        });

        for h in handles {
            h.await.unwrap();
        }
        let mut seen = reader_task.await.unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..32).collect::<Vec<_>>());
    }
}
