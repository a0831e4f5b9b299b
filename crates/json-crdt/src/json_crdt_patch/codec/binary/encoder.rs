use json_crdt_pack::cbor;

use super::{EncodeError, META_NONE, META_SOME};
use crate::json_crdt_patch::clock::Ts;
use crate::json_crdt_patch::codec::clock::ClockEncoder;
use crate::json_crdt_patch::operations::{ConValue, Op};
use crate::json_crdt_patch::patch::Patch;
use crate::json_crdt_patch::util::binary::CrdtWriter;

/// Encodes a patch whose operations are contiguous in time.
pub fn encode_patch(patch: &Patch) -> Result<Vec<u8>, EncodeError> {
    let mut clock = ClockEncoder::new();
    let mut expected: Option<Ts> = None;
    for op in &patch.ops {
        let id = op.id();
        if let Some(expected) = expected {
            if id != expected {
                return Err(EncodeError::NonContiguous { expected, got: id });
            }
        }
        expected = Some(Ts::new(id.sid, id.time + op.span()));
        visit_ids(op, &mut |id| clock.observe(id));
    }

    let mut w = CrdtWriter::with_alloc_size(64 + patch.ops.len() * 8);
    clock.table.write(&mut w);
    match &patch.meta {
        None => w.u8(META_NONE),
        Some(meta) => {
            w.u8(META_SOME);
            cbor::write_any(&mut w.inner, meta);
        }
    }
    w.vu57(patch.ops.len() as u64);
    if let Some(id) = patch.get_id() {
        clock.write_id(&mut w, id)?;
    }
    for op in &patch.ops {
        write_op(&mut w, &mut clock, op)?;
    }
    Ok(w.flush())
}

/// Calls `f` with the operation's id and every timestamp it references.
fn visit_ids(op: &Op, f: &mut impl FnMut(Ts)) {
    f(op.id());
    match op {
        Op::NewCon {
            val: ConValue::Ref(r),
            ..
        } => f(*r),
        Op::InsVal { obj, val, .. } => {
            f(*obj);
            f(*val);
        }
        Op::InsObj { obj, data, .. } => {
            f(*obj);
            data.iter().for_each(|(_, v)| f(*v));
        }
        Op::InsVec { obj, data, .. } => {
            f(*obj);
            data.iter().for_each(|(_, v)| f(*v));
        }
        Op::InsStr { obj, after, .. } | Op::InsBin { obj, after, .. } => {
            f(*obj);
            f(*after);
        }
        Op::InsArr {
            obj, after, data, ..
        } => {
            f(*obj);
            f(*after);
            data.iter().for_each(|v| f(*v));
        }
        Op::UpdArr {
            obj, after, val, ..
        } => {
            f(*obj);
            f(*after);
            f(*val);
        }
        Op::Del { obj, what, .. } => {
            f(*obj);
            what.iter().for_each(|span| f(span.ts()));
        }
        _ => {}
    }
}

fn write_head(w: &mut CrdtWriter, op: &Op, len: usize) {
    let overlay = op.opcode().overlay();
    if (1..=7).contains(&len) {
        w.u8(overlay | len as u8);
    } else {
        w.u8(overlay);
        w.vu39(len as u64);
    }
}

fn write_op(w: &mut CrdtWriter, clock: &mut ClockEncoder, op: &Op) -> Result<(), EncodeError> {
    let overlay = op.opcode().overlay();
    match op {
        Op::NewCon { val, .. } => match val {
            ConValue::Val(v) => {
                w.u8(overlay);
                cbor::write_any(&mut w.inner, v);
            }
            ConValue::Ref(r) => {
                w.u8(overlay | 1);
                clock.write_id(w, *r)?;
            }
        },
        Op::NewVal { .. }
        | Op::NewObj { .. }
        | Op::NewVec { .. }
        | Op::NewStr { .. }
        | Op::NewBin { .. }
        | Op::NewArr { .. } => w.u8(overlay),
        Op::InsVal { obj, val, .. } => {
            w.u8(overlay);
            clock.write_id(w, *obj)?;
            clock.write_id(w, *val)?;
        }
        Op::InsObj { obj, data, .. } => {
            write_head(w, op, data.len());
            clock.write_id(w, *obj)?;
            for (key, val) in data {
                w.vu39(key.len() as u64);
                w.utf8(key);
                clock.write_id(w, *val)?;
            }
        }
        Op::InsVec { obj, data, .. } => {
            write_head(w, op, data.len());
            clock.write_id(w, *obj)?;
            for (index, val) in data {
                w.u8(*index);
                clock.write_id(w, *val)?;
            }
        }
        Op::InsStr {
            obj, after, data, ..
        } => {
            write_head(w, op, data.len());
            clock.write_id(w, *obj)?;
            clock.write_id(w, *after)?;
            w.utf8(data);
        }
        Op::InsBin {
            obj, after, data, ..
        } => {
            write_head(w, op, data.len());
            clock.write_id(w, *obj)?;
            clock.write_id(w, *after)?;
            w.buf(data);
        }
        Op::InsArr {
            obj, after, data, ..
        } => {
            write_head(w, op, data.len());
            clock.write_id(w, *obj)?;
            clock.write_id(w, *after)?;
            for val in data {
                clock.write_id(w, *val)?;
            }
        }
        Op::UpdArr {
            obj, after, val, ..
        } => {
            w.u8(overlay);
            clock.write_id(w, *obj)?;
            clock.write_id(w, *after)?;
            clock.write_id(w, *val)?;
        }
        Op::Del { obj, what, .. } => {
            write_head(w, op, what.len());
            clock.write_id(w, *obj)?;
            for span in what {
                clock.write_id(w, span.ts())?;
                w.vu39(span.span);
            }
        }
        Op::Nop { len, .. } => write_head(w, op, *len as usize),
    }
    Ok(())
}
