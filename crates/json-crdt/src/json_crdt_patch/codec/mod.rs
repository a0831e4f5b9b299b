//! Binary codecs: the clock table with table-relative ids, and the patch
//! format built on it.

pub mod binary;
pub mod clock;

use json_crdt_buffers::BufferError;
use json_crdt_pack::CborError;
use thiserror::Error;

use crate::json_crdt_patch::clock::Ts;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("invalid constant: {0}")]
    Cbor(#[from] CborError),
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("invalid metadata marker 0x{0:02x}")]
    InvalidMeta(u8),
    #[error("unknown clock table index {0}")]
    UnknownSessionIndex(u64),
    #[error("time delta reaches before the clock table entry")]
    TimeUnderflow,
    #[error("varint exceeds its encoding domain")]
    VarintOverflow,
    #[error("timestamp {0} is outside the 53-bit session and time domain")]
    TimestampOutOfRange(Ts),
    #[error("operation with opcode {0} has zero length")]
    EmptyOperation(u8),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("timestamp {id} is newer than its clock table entry at {table_time}")]
    TimeTravel { id: Ts, table_time: u64 },
    #[error("operation {got} does not follow the previous one (expected {expected})")]
    NonContiguous { expected: Ts, got: Ts },
}
