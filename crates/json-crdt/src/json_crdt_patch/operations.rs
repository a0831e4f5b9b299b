//! Patch operations.
//!
//! Each operation carries the id of its first tick; operations that insert
//! several elements consume one tick per element (see [`Op::span`]).

use std::fmt;

use json_crdt_pack::PackValue;

use crate::json_crdt_patch::clock::{print_ts, Ts, Tss};
use crate::json_crdt_patch::constants::ORIGIN;
use crate::json_crdt_patch::enums::JsonCrdtPatchOpcode;

/// Payload of a constant node: a plain value or a timestamp used as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConValue {
    Val(PackValue),
    Ref(Ts),
}

impl Default for ConValue {
    fn default() -> Self {
        ConValue::Val(PackValue::Undefined)
    }
}

/// A single CRDT operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Creates an immutable constant.
    NewCon { id: Ts, val: ConValue },
    /// Creates an LWW register pointing at `undefined`.
    NewVal { id: Ts },
    /// Creates an LWW map.
    NewObj { id: Ts },
    /// Creates an LWW tuple.
    NewVec { id: Ts },
    /// Creates an RGA string.
    NewStr { id: Ts },
    /// Creates an RGA byte sequence.
    NewBin { id: Ts },
    /// Creates an RGA array of node ids.
    NewArr { id: Ts },
    /// Points register `obj` at node `val`. With `obj == ORIGIN` this sets
    /// the document root.
    InsVal { id: Ts, obj: Ts, val: Ts },
    /// Writes map keys.
    InsObj {
        id: Ts,
        obj: Ts,
        data: Vec<(String, Ts)>,
    },
    /// Writes tuple slots.
    InsVec {
        id: Ts,
        obj: Ts,
        data: Vec<(u8, Ts)>,
    },
    /// Inserts text after element `after` (or at the head when `after` is
    /// the string's own id).
    InsStr {
        id: Ts,
        obj: Ts,
        after: Ts,
        data: String,
    },
    InsBin {
        id: Ts,
        obj: Ts,
        after: Ts,
        data: Vec<u8>,
    },
    InsArr {
        id: Ts,
        obj: Ts,
        after: Ts,
        data: Vec<Ts>,
    },
    /// Replaces the value of array element `after` with node `val`.
    UpdArr { id: Ts, obj: Ts, after: Ts, val: Ts },
    /// Tombstones the listed element spans of sequence `obj`.
    Del { id: Ts, obj: Ts, what: Vec<Tss> },
    /// Consumes `len` ticks without effect.
    Nop { id: Ts, len: u64 },
}

impl Op {
    pub fn id(&self) -> Ts {
        match self {
            Op::NewCon { id, .. }
            | Op::NewVal { id }
            | Op::NewObj { id }
            | Op::NewVec { id }
            | Op::NewStr { id }
            | Op::NewBin { id }
            | Op::NewArr { id }
            | Op::InsVal { id, .. }
            | Op::InsObj { id, .. }
            | Op::InsVec { id, .. }
            | Op::InsStr { id, .. }
            | Op::InsBin { id, .. }
            | Op::InsArr { id, .. }
            | Op::UpdArr { id, .. }
            | Op::Del { id, .. }
            | Op::Nop { id, .. } => *id,
        }
    }

    /// Number of logical ticks this operation consumes.
    pub fn span(&self) -> u64 {
        match self {
            Op::InsStr { data, .. } => data.chars().count() as u64,
            Op::InsBin { data, .. } => data.len() as u64,
            Op::InsArr { data, .. } => data.len() as u64,
            Op::Nop { len, .. } => *len,
            _ => 1,
        }
    }

    pub fn opcode(&self) -> JsonCrdtPatchOpcode {
        use JsonCrdtPatchOpcode as O;
        match self {
            Op::NewCon { .. } => O::NewCon,
            Op::NewVal { .. } => O::NewVal,
            Op::NewObj { .. } => O::NewObj,
            Op::NewVec { .. } => O::NewVec,
            Op::NewStr { .. } => O::NewStr,
            Op::NewBin { .. } => O::NewBin,
            Op::NewArr { .. } => O::NewArr,
            Op::InsVal { .. } => O::InsVal,
            Op::InsObj { .. } => O::InsObj,
            Op::InsVec { .. } => O::InsVec,
            Op::InsStr { .. } => O::InsStr,
            Op::InsBin { .. } => O::InsBin,
            Op::InsArr { .. } => O::InsArr,
            Op::UpdArr { .. } => O::UpdArr,
            Op::Del { .. } => O::Del,
            Op::Nop { .. } => O::Nop,
        }
    }

    /// Short mnemonic, e.g. `"ins_str"`.
    pub fn name(&self) -> &'static str {
        match self {
            Op::NewCon { .. } => "new_con",
            Op::NewVal { .. } => "new_val",
            Op::NewObj { .. } => "new_obj",
            Op::NewVec { .. } => "new_vec",
            Op::NewStr { .. } => "new_str",
            Op::NewBin { .. } => "new_bin",
            Op::NewArr { .. } => "new_arr",
            Op::InsVal { obj, .. } if *obj == ORIGIN => "set_root",
            Op::InsVal { .. } => "ins_val",
            Op::InsObj { .. } => "ins_obj",
            Op::InsVec { .. } => "ins_vec",
            Op::InsStr { .. } => "ins_str",
            Op::InsBin { .. } => "ins_bin",
            Op::InsArr { .. } => "ins_arr",
            Op::UpdArr { .. } => "upd_arr",
            Op::Del { .. } => "del",
            Op::Nop { .. } => "nop",
        }
    }

    /// Returns a copy with every timestamp passed through `f`.
    pub fn map_ts(&self, f: &impl Fn(Ts) -> Ts) -> Op {
        let span = |s: &Tss| {
            let id = f(s.ts());
            Tss::new(id.sid, id.time, s.span)
        };
        match self {
            Op::NewCon { id, val } => Op::NewCon {
                id: f(*id),
                val: match val {
                    ConValue::Ref(r) => ConValue::Ref(f(*r)),
                    ConValue::Val(v) => ConValue::Val(v.clone()),
                },
            },
            Op::NewVal { id } => Op::NewVal { id: f(*id) },
            Op::NewObj { id } => Op::NewObj { id: f(*id) },
            Op::NewVec { id } => Op::NewVec { id: f(*id) },
            Op::NewStr { id } => Op::NewStr { id: f(*id) },
            Op::NewBin { id } => Op::NewBin { id: f(*id) },
            Op::NewArr { id } => Op::NewArr { id: f(*id) },
            Op::InsVal { id, obj, val } => Op::InsVal {
                id: f(*id),
                obj: f(*obj),
                val: f(*val),
            },
            Op::InsObj { id, obj, data } => Op::InsObj {
                id: f(*id),
                obj: f(*obj),
                data: data.iter().map(|(k, v)| (k.clone(), f(*v))).collect(),
            },
            Op::InsVec { id, obj, data } => Op::InsVec {
                id: f(*id),
                obj: f(*obj),
                data: data.iter().map(|(k, v)| (*k, f(*v))).collect(),
            },
            Op::InsStr {
                id,
                obj,
                after,
                data,
            } => Op::InsStr {
                id: f(*id),
                obj: f(*obj),
                after: f(*after),
                data: data.clone(),
            },
            Op::InsBin {
                id,
                obj,
                after,
                data,
            } => Op::InsBin {
                id: f(*id),
                obj: f(*obj),
                after: f(*after),
                data: data.clone(),
            },
            Op::InsArr {
                id,
                obj,
                after,
                data,
            } => Op::InsArr {
                id: f(*id),
                obj: f(*obj),
                after: f(*after),
                data: data.iter().map(|v| f(*v)).collect(),
            },
            Op::UpdArr {
                id,
                obj,
                after,
                val,
            } => Op::UpdArr {
                id: f(*id),
                obj: f(*obj),
                after: f(*after),
                val: f(*val),
            },
            Op::Del { id, obj, what } => Op::Del {
                id: f(*id),
                obj: f(*obj),
                what: what.iter().map(span).collect(),
            },
            Op::Nop { id, len } => Op::Nop {
                id: f(*id),
                len: *len,
            },
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = format!("{} {}", self.name(), print_ts(self.id()));
        let span = self.span();
        let head = if span > 1 {
            format!("{head}!{span}")
        } else {
            head
        };
        match self {
            Op::NewCon {
                val: ConValue::Val(v),
                ..
            } => write!(f, "{head} {{ {v:?} }}"),
            Op::NewCon {
                val: ConValue::Ref(r),
                ..
            } => write!(f, "{head} {{ ref {} }}", print_ts(*r)),
            Op::InsVal { obj, val, .. } => {
                write!(f, "{head}, obj = {}, val = {}", print_ts(*obj), print_ts(*val))
            }
            Op::InsObj { obj, data, .. } => {
                write!(f, "{head}, obj = {}", print_ts(*obj))?;
                for (key, val) in data {
                    write!(f, "\n  - {:?}: {}", key, print_ts(*val))?;
                }
                Ok(())
            }
            Op::InsVec { obj, data, .. } => {
                write!(f, "{head}, obj = {}", print_ts(*obj))?;
                for (index, val) in data {
                    write!(f, "\n  - {}: {}", index, print_ts(*val))?;
                }
                Ok(())
            }
            Op::InsStr {
                obj, after, data, ..
            } => write!(
                f,
                "{head}, obj = {} {{ {} ← {:?} }}",
                print_ts(*obj),
                print_ts(*after),
                data
            ),
            Op::InsBin {
                obj, after, data, ..
            } => write!(
                f,
                "{head}, obj = {} {{ {} ← {:?} }}",
                print_ts(*obj),
                print_ts(*after),
                data
            ),
            Op::InsArr {
                obj, after, data, ..
            } => {
                let items: Vec<String> = data.iter().map(|id| print_ts(*id)).collect();
                write!(
                    f,
                    "{head}, obj = {} {{ {} ← {} }}",
                    print_ts(*obj),
                    print_ts(*after),
                    items.join(", ")
                )
            }
            Op::UpdArr {
                obj, after, val, ..
            } => write!(
                f,
                "{head}, obj = {} {{ {} ← {} }}",
                print_ts(*obj),
                print_ts(*after),
                print_ts(*val)
            ),
            Op::Del { obj, what, .. } => {
                let spans: Vec<String> = what.iter().map(|s| s.to_string()).collect();
                write!(f, "{head}, obj = {} {{ {} }}", print_ts(*obj), spans.join(", "))
            }
            _ => f.write_str(&head),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_crdt_patch::clock::{ts, tss};

    #[test]
    fn span_counts_elements() {
        let ins = Op::InsStr {
            id: ts(1, 5),
            obj: ts(1, 1),
            after: ts(1, 1),
            data: "héllo".into(),
        };
        assert_eq!(ins.span(), 5);
        let nop = Op::Nop {
            id: ts(1, 5),
            len: 7,
        };
        assert_eq!(nop.span(), 7);
        assert_eq!(Op::NewObj { id: ts(1, 1) }.span(), 1);
    }

    #[test]
    fn root_write_is_named_set_root() {
        let op = Op::InsVal {
            id: ts(1, 3),
            obj: ORIGIN,
            val: ts(1, 2),
        };
        assert_eq!(op.name(), "set_root");
        assert_eq!(op.opcode(), JsonCrdtPatchOpcode::InsVal);
    }

    #[test]
    fn map_ts_rewrites_every_reference() {
        let op = Op::Del {
            id: ts(1, 10),
            obj: ts(1, 2),
            what: vec![tss(1, 3, 2), tss(4, 3, 1)],
        };
        let shifted = op.map_ts(&|id| if id.sid == 1 { ts(1, id.time + 100) } else { id });
        assert_eq!(
            shifted,
            Op::Del {
                id: ts(1, 110),
                obj: ts(1, 102),
                what: vec![tss(1, 103, 2), tss(4, 3, 1)],
            }
        );
    }

    #[test]
    fn display_is_one_line_per_simple_op() {
        let op = Op::InsStr {
            id: ts(1, 5),
            obj: ts(1, 1),
            after: ts(1, 1),
            data: "ab".into(),
        };
        assert_eq!(op.to_string(), "ins_str .5!2, obj = .1 { .1 ← \"ab\" }");
    }
}
