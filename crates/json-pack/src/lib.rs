//! JSON-like values for the JSON CRDT engine.
//!
//! [`PackValue`] is the payload of constant nodes and the output of a
//! document view. It is a superset of JSON: it distinguishes `undefined`
//! from `null` and carries raw binary blobs. The [`cbor`] module encodes it
//! for the binary patch codec.

pub mod cbor;
mod pack_value;

pub use cbor::CborError;
pub use pack_value::{PackMap, PackValue};
