//! Binary buffers shared by the JSON CRDT codecs.
//!
//! [`Writer`] appends big-endian primitives to a growable buffer, [`Reader`]
//! consumes them from a borrowed slice and reports truncated input as
//! [`BufferError`] instead of panicking.

mod reader;
mod writer;

pub use reader::Reader;
pub use writer::Writer;

use thiserror::Error;

/// Errors raised while reading a binary buffer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("unexpected end of buffer: need {needed} byte(s) at offset {offset}")]
    EndOfBuffer { offset: usize, needed: usize },
    #[error("invalid utf-8 at offset {offset}")]
    InvalidUtf8 { offset: usize },
}

/// Returns `true` if `value` survives a round trip through `f32`.
pub fn is_float32(value: f64) -> bool {
    (value as f32) as f64 == value || value.is_nan()
}
