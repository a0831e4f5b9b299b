//! JSON CRDT document: node types, the RGA engine and the model that
//! applies patches.

pub mod model;
pub mod nodes;

pub use model::{Model, ModelError, PathStep};
pub use nodes::rga::RgaError;
pub use nodes::{CrdtNode, NodeIndex};
