//! Patch protocol: clocks, operations, patches and their binary encoding.

pub mod clock;
pub mod codec;
pub mod constants;
pub mod enums;
pub mod operations;
pub mod patch;
pub mod patch_builder;
pub mod util;

pub use clock::{
    compare, contains, contains_id, interval, print_ts, tick, ts, tss, Clock, ClockError,
    ClockVector, ServerClockVector, Ts, Tss,
};
pub use constants::{ORIGIN, UNDEFINED};
pub use enums::{session, system_time, JsonCrdtPatchOpcode};
pub use operations::{ConValue, Op};
pub use patch::Patch;
pub use patch_builder::PatchBuilder;
