//! MessagePack framing for collector-bound events.
//!
//! Each event is one MessagePack value: the fixed array
//! `[tag, timestamp, record]`, with `timestamp` in whole seconds since the
//! Unix epoch and `record` a map. Events are self-framing, so a collector
//! decodes them back-to-back off the stream with no length prefix.

use rmp_serde::Serializer;
use serde::Serialize;
use thiserror::Error;

use crate::record::LogRecord;

/// Failure to turn an event into a frame.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The record contained a value MessagePack cannot represent.
    #[error("record could not be serialised: {0}")]
    Serialise(#[from] rmp_serde::encode::Error),
    /// The encoded frame exceeded the configured ceiling.
    #[error("encoded frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
}

/// Encode one `(tag, timestamp, record)` event.
///
/// Deterministic and free of I/O; the same inputs always produce the same
/// bytes. Frames larger than `max_frame` are rejected rather than sent.
pub fn encode(
    tag: &str,
    timestamp: u64,
    record: &LogRecord,
    max_frame: usize,
) -> Result<Vec<u8>, EncodeError> {
    let mut frame = Vec::with_capacity(128);
    (tag, timestamp, record).serialize(&mut Serializer::new(&mut frame))?;
    if frame.len() > max_frame {
        return Err(EncodeError::FrameTooLarge {
            len: frame.len(),
            max: max_frame,
        });
    }
    Ok(frame)
}
