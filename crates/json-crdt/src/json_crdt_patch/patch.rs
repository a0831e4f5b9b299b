//! [`Patch`]: an ordered list of operations, the unit of replication.

use std::fmt;

use json_crdt_pack::PackValue;

use crate::json_crdt_patch::clock::{print_ts, Ts};
use crate::json_crdt_patch::codec::binary::{decode_patch, encode_patch, DecodeError, EncodeError};
use crate::json_crdt_patch::operations::Op;

/// An ordered list of operations, normally produced by a
/// [`PatchBuilder`](crate::json_crdt_patch::PatchBuilder).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Patch {
    pub ops: Vec<Op>,
    /// Application-defined metadata carried alongside the operations.
    pub meta: Option<PackValue>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the first operation.
    pub fn get_id(&self) -> Option<Ts> {
        self.ops.first().map(Op::id)
    }

    /// Total number of ticks consumed by all operations.
    pub fn span(&self) -> u64 {
        self.ops.iter().map(Op::span).sum()
    }

    /// Time the next appended operation is expected to start at, or `None`
    /// for an empty patch.
    pub fn next_time(&self) -> Option<u64> {
        self.ops.last().map(|op| op.id().time + op.span())
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Copy of the patch with every timestamp passed through `f`.
    pub fn rewrite_time(&self, f: impl Fn(Ts) -> Ts) -> Patch {
        Patch {
            ops: self.ops.iter().map(|op| op.map_ts(&f)).collect(),
            meta: self.meta.clone(),
        }
    }

    /// Moves the patch so its first operation starts at `new_time`.
    ///
    /// Only ids of the patch's own session at or after `transform_after`
    /// (default: the patch start) are shifted, so references to older
    /// operations of the same session stay put. Used when a server assigns
    /// the final times of a client patch.
    pub fn rebase(&self, new_time: u64, transform_after: Option<u64>) -> Patch {
        let Some(id) = self.get_id() else {
            return self.clone();
        };
        if id.time == new_time {
            return self.clone();
        }
        let transform_after = transform_after.unwrap_or(id.time);
        let delta = new_time as i128 - id.time as i128;
        self.rewrite_time(|stamp| {
            if stamp.sid != id.sid || stamp.time < transform_after {
                return stamp;
            }
            let time = (stamp.time as i128 + delta).max(0) as u64;
            Ts::new(stamp.sid, time)
        })
    }

    pub fn to_binary(&self) -> Result<Vec<u8>, EncodeError> {
        encode_patch(self)
    }

    pub fn from_binary(data: &[u8]) -> Result<Patch, DecodeError> {
        decode_patch(data)
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.get_id().map(print_ts).unwrap_or_else(|| "(nil)".into());
        write!(f, "Patch {}!{}", id, self.span())?;
        let last = self.ops.len().saturating_sub(1);
        for (i, op) in self.ops.iter().enumerate() {
            let branch = if i == last { "└─" } else { "├─" };
            let indent = if i == last { "   " } else { "│  " };
            let text = op.to_string().replace('\n', &format!("\n{indent}"));
            write!(f, "\n{branch} {text}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_crdt_patch::clock::ts;
    use crate::json_crdt_patch::constants::ORIGIN;
    use crate::json_crdt_patch::operations::ConValue;

    fn sample() -> Patch {
        Patch {
            ops: vec![
                Op::NewStr { id: ts(7, 10) },
                Op::InsStr {
                    id: ts(7, 11),
                    obj: ts(7, 10),
                    after: ts(7, 10),
                    data: "abc".into(),
                },
                Op::InsVal {
                    id: ts(7, 14),
                    obj: ORIGIN,
                    val: ts(7, 10),
                },
            ],
            meta: None,
        }
    }

    #[test]
    fn id_span_and_next_time() {
        let patch = sample();
        assert_eq!(patch.get_id(), Some(ts(7, 10)));
        assert_eq!(patch.span(), 5);
        assert_eq!(patch.next_time(), Some(15));
        assert_eq!(Patch::new().next_time(), None);
    }

    #[test]
    fn rebase_shifts_own_session_only() {
        let mut patch = sample();
        patch.ops.push(Op::NewCon {
            id: ts(7, 15),
            val: ConValue::Ref(ts(3, 12)),
        });
        let rebased = patch.rebase(100, None);
        assert_eq!(rebased.get_id(), Some(ts(7, 100)));
        assert_eq!(
            rebased.ops[1],
            Op::InsStr {
                id: ts(7, 101),
                obj: ts(7, 100),
                after: ts(7, 100),
                data: "abc".into(),
            }
        );
        // The root anchor and foreign sessions are untouched.
        assert_eq!(
            rebased.ops[2],
            Op::InsVal {
                id: ts(7, 104),
                obj: ORIGIN,
                val: ts(7, 100),
            }
        );
        assert_eq!(
            rebased.ops[3],
            Op::NewCon {
                id: ts(7, 105),
                val: ConValue::Ref(ts(3, 12)),
            }
        );
    }

    #[test]
    fn rebase_keeps_references_before_transform_point() {
        let patch = Patch {
            ops: vec![Op::InsStr {
                id: ts(7, 20),
                obj: ts(7, 5),
                after: ts(7, 5),
                data: "x".into(),
            }],
            meta: None,
        };
        let rebased = patch.rebase(30, None);
        assert_eq!(
            rebased.ops[0],
            Op::InsStr {
                id: ts(7, 30),
                obj: ts(7, 5),
                after: ts(7, 5),
                data: "x".into(),
            }
        );
    }

    #[test]
    fn display_lists_operations() {
        let text = sample().to_string();
        assert!(text.starts_with("Patch 7.10!5"));
        assert!(text.contains("├─ new_str 7.10"));
        assert!(text.contains("└─ set_root 7.14"));
    }
}
