use crate::json_crdt_patch::clock::Ts;
use crate::json_crdt_patch::enums::{session, system_time};

/// Bottom timestamp and the fixed address of the document root.
pub const ORIGIN: Ts = Ts::new(session::SYSTEM, system_time::ORIGIN);

/// Reserved id of the built-in `undefined` constant.
pub const UNDEFINED: Ts = Ts::new(session::SYSTEM, system_time::UNDEFINED);
