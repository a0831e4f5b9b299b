use json_crdt_pack::cbor;

use super::{DecodeError, META_NONE, META_SOME};
use crate::json_crdt_patch::clock::{Ts, Tss};
use crate::json_crdt_patch::codec::clock::{ClockDecoder, ClockTable};
use crate::json_crdt_patch::enums::JsonCrdtPatchOpcode as O;
use crate::json_crdt_patch::operations::{ConValue, Op};
use crate::json_crdt_patch::patch::Patch;
use crate::json_crdt_patch::util::binary::CrdtReader;

/// Decodes a patch written by [`encode_patch`](super::encode_patch).
pub fn decode_patch(data: &[u8]) -> Result<Patch, DecodeError> {
    let mut r = CrdtReader::new(data);
    let clock = ClockDecoder::new(ClockTable::read(&mut r)?);
    let meta = match r.u8()? {
        META_NONE => None,
        META_SOME => Some(cbor::read_any(&mut r.inner)?),
        other => return Err(DecodeError::InvalidMeta(other)),
    };
    let count = r.vu57()?;
    if count == 0 {
        return Ok(Patch {
            ops: Vec::new(),
            meta,
        });
    }
    let mut id = clock.read_id(&mut r)?;
    // Every operation takes at least one byte.
    let mut ops = Vec::with_capacity((count as usize).min(data.len()));
    for _ in 0..count {
        let op = read_op(&mut r, &clock, id)?;
        id = Ts::new(id.sid, id.time + op.span());
        ops.push(op);
    }
    Ok(Patch { ops, meta })
}

fn read_len(r: &mut CrdtReader<'_>, octet: u8) -> Result<usize, DecodeError> {
    match octet & 0b111 {
        0 => Ok(r.vu39()? as usize),
        len => Ok(len as usize),
    }
}

/// Length of an operation that consumes one tick per element.
fn read_span(r: &mut CrdtReader<'_>, octet: u8) -> Result<usize, DecodeError> {
    match read_len(r, octet)? {
        0 => Err(DecodeError::EmptyOperation(octet >> 3)),
        len => Ok(len),
    }
}

fn read_op(r: &mut CrdtReader<'_>, clock: &ClockDecoder, id: Ts) -> Result<Op, DecodeError> {
    let octet = r.u8()?;
    let opcode = O::try_from(octet >> 3).map_err(DecodeError::UnknownOpcode)?;
    Ok(match opcode {
        O::NewCon => {
            let val = if octet & 0b111 == 0 {
                ConValue::Val(cbor::read_any(&mut r.inner)?)
            } else {
                ConValue::Ref(clock.read_id(r)?)
            };
            Op::NewCon { id, val }
        }
        O::NewVal => Op::NewVal { id },
        O::NewObj => Op::NewObj { id },
        O::NewVec => Op::NewVec { id },
        O::NewStr => Op::NewStr { id },
        O::NewBin => Op::NewBin { id },
        O::NewArr => Op::NewArr { id },
        O::InsVal => {
            let obj = clock.read_id(r)?;
            let val = clock.read_id(r)?;
            Op::InsVal { id, obj, val }
        }
        O::InsObj => {
            let len = read_len(r, octet)?;
            let obj = clock.read_id(r)?;
            let mut data = Vec::with_capacity(len.min(r.inner.size()));
            for _ in 0..len {
                let key_len = r.vu39()? as usize;
                let key = r.utf8(key_len)?.to_owned();
                data.push((key, clock.read_id(r)?));
            }
            Op::InsObj { id, obj, data }
        }
        O::InsVec => {
            let len = read_len(r, octet)?;
            let obj = clock.read_id(r)?;
            let mut data = Vec::with_capacity(len.min(r.inner.size()));
            for _ in 0..len {
                let index = r.u8()?;
                data.push((index, clock.read_id(r)?));
            }
            Op::InsVec { id, obj, data }
        }
        O::InsStr => {
            let len = read_span(r, octet)?;
            let obj = clock.read_id(r)?;
            let after = clock.read_id(r)?;
            let data = r.utf8(len)?.to_owned();
            Op::InsStr {
                id,
                obj,
                after,
                data,
            }
        }
        O::InsBin => {
            let len = read_span(r, octet)?;
            let obj = clock.read_id(r)?;
            let after = clock.read_id(r)?;
            let data = r.buf(len)?.to_vec();
            Op::InsBin {
                id,
                obj,
                after,
                data,
            }
        }
        O::InsArr => {
            let len = read_span(r, octet)?;
            let obj = clock.read_id(r)?;
            let after = clock.read_id(r)?;
            let mut data = Vec::with_capacity(len.min(r.inner.size()));
            for _ in 0..len {
                data.push(clock.read_id(r)?);
            }
            Op::InsArr {
                id,
                obj,
                after,
                data,
            }
        }
        O::UpdArr => {
            let obj = clock.read_id(r)?;
            let after = clock.read_id(r)?;
            let val = clock.read_id(r)?;
            Op::UpdArr {
                id,
                obj,
                after,
                val,
            }
        }
        O::Del => {
            let len = read_len(r, octet)?;
            let obj = clock.read_id(r)?;
            let mut what = Vec::with_capacity(len.min(r.inner.size()));
            for _ in 0..len {
                let start = clock.read_id(r)?;
                let span = r.vu39()?;
                what.push(Tss::new(start.sid, start.time, span));
            }
            Op::Del { id, obj, what }
        }
        O::Nop => Op::Nop {
            id,
            len: read_span(r, octet)? as u64,
        },
    })
}
