//! Variable-length integer encodings for timestamps and clocks.
//!
//! | encoding | payload | max bytes | layout |
//! |---|---|---|---|
//! | `vu57` | 57 bits | 8 | 7 bits + continuation per byte, last byte 8 bits |
//! | `vu39` | 39 bits | 6 | same scheme as `vu57` |
//! | `b1vu28` | flag + 28 bits | 4 | first byte `f?zzzzzz`, then `vu` bytes |
//! | `b1vu56` | flag + 56 bits | 8 | first byte `f?zzzzzz`, then `vu` bytes |
//! | `u53vu39` | 53 + 39 bits | 13 | 4 + 2 + 1 raw bytes, then `vu` bytes |
//!
//! All variable parts are little-endian: the first byte carries the lowest
//! bits.

mod crdt_reader;
mod crdt_writer;

pub use crdt_reader::CrdtReader;
pub use crdt_writer::CrdtWriter;

/// Largest value `vu39` can carry.
pub const VU39_MAX: u64 = (1 << 39) - 1;
/// Largest value `b1vu28` can carry.
pub const VU28_MAX: u64 = (1 << 28) - 1;
/// Largest value `b1vu56` can carry.
pub const VU56_MAX: u64 = (1 << 56) - 1;
/// Largest value `vu57` can carry.
pub const VU57_MAX: u64 = (1 << 57) - 1;
/// Largest first value of `u53vu39`.
pub const U53_MAX: u64 = (1 << 53) - 1;
