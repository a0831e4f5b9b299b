//! JSON CRDT: a replicated JSON document engine.
//!
//! Replicas mutate a shared JSON-like document by building [`Patch`]es and
//! converge by applying each other's patches in any order, any number of
//! times. The crate has two layers:
//!
//! - [`json_crdt_patch`]: logical timestamps and clocks, operations, patches,
//!   the patch builder and the compact binary codecs for ids and clocks.
//! - [`json_crdt`]: the document [`Model`], its node index and the CRDT node
//!   types (LWW constant/register/map/tuple and RGA string/binary/array).
//!
//! ```
//! use json_crdt::{Model, PackValue};
//!
//! let mut doc = Model::new(0x10000);
//! let mut builder = doc.api_builder();
//! let value = builder.json(&PackValue::from(serde_json::json!({"title": "hi"})));
//! builder.root(value);
//! doc.commit(&mut builder).unwrap();
//!
//! let replica = doc.fork(0x20000);
//! assert_eq!(replica.view(), doc.view());
//! ```

pub mod json_crdt;
pub mod json_crdt_patch;

pub use json_crdt::{Model, ModelError};
pub use json_crdt_patch::{Clock, Patch, PatchBuilder, Ts, Tss};
pub use json_crdt_pack::PackValue;
