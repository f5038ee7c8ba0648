use crate::error::{DecodeError, Result};
use crate::types::Envelope;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

/// Parse one inbound text payload into an [`Envelope`].
///
/// Extra fields are ignored; a missing `id` means the stream id is not yet
/// known. Anything that is not an object carrying a tagged `entity` is an
/// error.
pub fn decode(payload: &str) -> Result<Envelope> {
    let value: Value = serde_json::from_str(payload)?;
    let Value::Object(ref obj) = value else {
        return Err(DecodeError::NotAnObject);
    };
    let entity = match obj.get("entity") {
        None | Some(Value::Null) => return Err(DecodeError::MissingEntity),
        Some(entity) => entity,
    };
    if entity.get("type").and_then(Value::as_str).is_none() {
        return Err(DecodeError::MissingTag);
    }
    Ok(serde_json::from_value(value)?)
}

/// Binary frames carry the same UTF-8 JSON as text frames.
pub fn decode_bytes(payload: &[u8]) -> Result<Envelope> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
    decode(text)
}

/// Counting front-end to [`decode`] for a live connection: failures are
/// logged and swallowed so one bad frame never tears the stream down.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    decoded: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub decoded: u64,
    pub dropped: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&self, payload: &str) -> Option<Envelope> {
        self.record(decode(payload), payload.len())
    }

    pub fn decode_bytes(&self, payload: &[u8]) -> Option<Envelope> {
        self.record(decode_bytes(payload), payload.len())
    }

    fn record(&self, result: Result<Envelope>, len: usize) -> Option<Envelope> {
        match result {
            Ok(envelope) => {
                self.decoded.fetch_add(1, Ordering::Relaxed);
                trace!(tag = envelope.entity.tag(), stream_id = ?envelope.stream_id, "frame decoded");
                Some(envelope)
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, bytes = len, "dropping malformed frame");
                None
            }
        }
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            decoded: self.decoded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
