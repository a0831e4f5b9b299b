//! [`PatchBuilder`]: appends operations to a patch, ticking a clock.

use json_crdt_pack::PackValue;

use crate::json_crdt_patch::clock::{Clock, ClockVector, Ts, Tss};
use crate::json_crdt_patch::constants::ORIGIN;
use crate::json_crdt_patch::operations::{ConValue, Op};
use crate::json_crdt_patch::patch::Patch;

/// Builds a [`Patch`] operation by operation.
///
/// Every method that creates an operation reserves its ticks on the clock
/// and returns the id of the new operation. Builders with equal clock state
/// fed the same calls produce equal patches.
#[derive(Debug, Clone)]
pub struct PatchBuilder {
    pub clock: Clock,
    pub patch: Patch,
}

impl PatchBuilder {
    /// Builder over a fresh logical clock.
    pub fn new(sid: u64, time: u64) -> Self {
        Self::from_clock(Clock::Logical(ClockVector::new(sid, time)))
    }

    pub fn from_clock(clock: impl Into<Clock>) -> Self {
        Self {
            clock: clock.into(),
            patch: Patch::new(),
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Time of the next tick.
    pub fn next_time(&self) -> u64 {
        self.clock.time()
    }

    /// Returns the accumulated patch and starts a new, empty one.
    pub fn flush(&mut self) -> Patch {
        std::mem::take(&mut self.patch)
    }

    /// Fills the gap with a `nop` when the clock moved on since the last
    /// operation, so that the patch stays contiguous.
    pub fn pad(&mut self) {
        let Some(next) = self.patch.next_time() else {
            return;
        };
        let drift = self.clock.time().saturating_sub(next);
        if drift > 0 {
            let id = Ts::new(self.clock.sid(), next);
            self.patch.ops.push(Op::Nop { id, len: drift });
        }
    }

    fn push(&mut self, span: u64, op: impl FnOnce(Ts) -> Op) -> Ts {
        self.pad();
        let id = self.clock.tick(span);
        self.patch.ops.push(op(id));
        id
    }

    /// New constant holding `val`.
    pub fn con(&mut self, val: impl Into<PackValue>) -> Ts {
        let val = ConValue::Val(val.into());
        self.push(1, |id| Op::NewCon { id, val })
    }

    /// New constant holding the timestamp `val` as its value.
    pub fn con_ref(&mut self, val: Ts) -> Ts {
        self.push(1, |id| Op::NewCon {
            id,
            val: ConValue::Ref(val),
        })
    }

    pub fn val(&mut self) -> Ts {
        self.push(1, |id| Op::NewVal { id })
    }

    pub fn obj(&mut self) -> Ts {
        self.push(1, |id| Op::NewObj { id })
    }

    pub fn vec(&mut self) -> Ts {
        self.push(1, |id| Op::NewVec { id })
    }

    pub fn str(&mut self) -> Ts {
        self.push(1, |id| Op::NewStr { id })
    }

    pub fn bin(&mut self) -> Ts {
        self.push(1, |id| Op::NewBin { id })
    }

    pub fn arr(&mut self) -> Ts {
        self.push(1, |id| Op::NewArr { id })
    }

    /// Points register `obj` at `val`.
    pub fn set_val(&mut self, obj: Ts, val: Ts) -> Ts {
        self.push(1, |id| Op::InsVal { id, obj, val })
    }

    /// Points the document root at `val`.
    pub fn root(&mut self, val: Ts) -> Ts {
        self.set_val(ORIGIN, val)
    }

    /// # Panics
    ///
    /// If `data` is empty.
    pub fn ins_obj(&mut self, obj: Ts, data: Vec<(String, Ts)>) -> Ts {
        assert!(!data.is_empty(), "EMPTY_TUPLES");
        self.push(1, |id| Op::InsObj { id, obj, data })
    }

    /// # Panics
    ///
    /// If `data` is empty.
    pub fn ins_vec(&mut self, obj: Ts, data: Vec<(u8, Ts)>) -> Ts {
        assert!(!data.is_empty(), "EMPTY_TUPLES");
        self.push(1, |id| Op::InsVec { id, obj, data })
    }

    /// Inserts `data` after element `after`; pass `obj` itself as `after` to
    /// insert at the head.
    ///
    /// # Panics
    ///
    /// If `data` is empty.
    pub fn ins_str(&mut self, obj: Ts, after: Ts, data: impl Into<String>) -> Ts {
        let data = data.into();
        assert!(!data.is_empty(), "EMPTY_STRING");
        let span = data.chars().count() as u64;
        self.push(span, |id| Op::InsStr {
            id,
            obj,
            after,
            data,
        })
    }

    /// # Panics
    ///
    /// If `data` is empty.
    pub fn ins_bin(&mut self, obj: Ts, after: Ts, data: Vec<u8>) -> Ts {
        assert!(!data.is_empty(), "EMPTY_BINARY");
        let span = data.len() as u64;
        self.push(span, |id| Op::InsBin {
            id,
            obj,
            after,
            data,
        })
    }

    /// # Panics
    ///
    /// If `data` is empty.
    pub fn ins_arr(&mut self, obj: Ts, after: Ts, data: Vec<Ts>) -> Ts {
        assert!(!data.is_empty(), "EMPTY_ARRAY");
        let span = data.len() as u64;
        self.push(span, |id| Op::InsArr {
            id,
            obj,
            after,
            data,
        })
    }

    /// Replaces the value of element `after` of array `obj`.
    pub fn upd_arr(&mut self, obj: Ts, after: Ts, val: Ts) -> Ts {
        self.push(1, |id| Op::UpdArr {
            id,
            obj,
            after,
            val,
        })
    }

    pub fn del(&mut self, obj: Ts, what: Vec<Tss>) -> Ts {
        self.push(1, |id| Op::Del { id, obj, what })
    }

    /// # Panics
    ///
    /// If `len` is zero.
    pub fn nop(&mut self, len: u64) -> Ts {
        assert!(len > 0, "EMPTY_NOP");
        self.push(len, |id| Op::Nop { id, len })
    }

    /// Emits the operations that create `value` as a node tree and returns
    /// the id of its top node.
    ///
    /// Strings and binaries become RGA nodes, arrays become RGA arrays,
    /// objects become LWW maps and everything else a constant.
    pub fn json(&mut self, value: &PackValue) -> Ts {
        match value {
            PackValue::Str(s) => {
                let id = self.str();
                if !s.is_empty() {
                    self.ins_str(id, id, s.as_str());
                }
                id
            }
            PackValue::Bytes(b) => {
                let id = self.bin();
                if !b.is_empty() {
                    self.ins_bin(id, id, b.clone());
                }
                id
            }
            PackValue::Array(items) => {
                let id = self.arr();
                if !items.is_empty() {
                    let values = items.iter().map(|item| self.json(item)).collect();
                    self.ins_arr(id, id, values);
                }
                id
            }
            PackValue::Object(map) => {
                let id = self.obj();
                if !map.is_empty() {
                    let entries = map
                        .iter()
                        .map(|(key, item)| (key.clone(), self.json(item)))
                        .collect();
                    self.ins_obj(id, entries);
                }
                id
            }
            scalar => self.con(scalar.clone()),
        }
    }

    /// Like [`json`](Self::json) but wraps the result in a fresh register so
    /// the slot can be overwritten later.
    pub fn json_val(&mut self, value: &PackValue) -> Ts {
        let reg = self.val();
        let child = self.json(value);
        self.set_val(reg, child);
        reg
    }

    /// Builds `value` and points the document root at it.
    pub fn json_set_root(&mut self, value: &PackValue) -> Ts {
        let id = self.json(value);
        self.root(id);
        id
    }
}
