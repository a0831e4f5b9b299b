//! Binary patch format.
//!
//! ```text
//! clock table | meta | vu57 op count | base id | op...
//! ```
//!
//! - clock table: see [`ClockTable::write`](super::clock::ClockTable::write);
//!   every id below is table-relative.
//! - meta: CBOR `undefined` (`0xf7`) when absent, otherwise a one-element
//!   CBOR array header (`0x81`) followed by the CBOR value.
//! - base id: id of the first operation (absent when there are none). Ids
//!   of later operations are implied by the spans of those before them.
//! - op: one byte `opcode << 3 | n` where `n` is a length in `1..=7`, or
//!   `0` followed by the length as `vu39`. Operations without a length write
//!   `n = 0` and nothing else. `ins_str`, `ins_bin`, `ins_arr` and `nop`
//!   carry at least one element.

mod decoder;
mod encoder;

pub use super::{DecodeError, EncodeError};
pub use decoder::decode_patch;
pub use encoder::encode_patch;

const META_NONE: u8 = 0xf7;
const META_SOME: u8 = 0x81;
