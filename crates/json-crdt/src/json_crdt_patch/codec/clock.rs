//! Clock table codec.
//!
//! A blob that stores many timestamps writes the table of `(sid, time)`
//! pairs once, then every timestamp as `(table index, time delta)` where
//! the delta is counted back from the table entry's time. Index `0` is the
//! system session, whose timestamps are written as `(0, time)`.

use std::collections::HashMap;

use crate::json_crdt_patch::clock::{ts, ClockVector, Ts, MAX_TIME};
use crate::json_crdt_patch::codec::{DecodeError, EncodeError};
use crate::json_crdt_patch::enums::session;
use crate::json_crdt_patch::util::binary::{CrdtReader, CrdtWriter};

/// A timestamp relative to a clock table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeTimestamp {
    /// 1-based table index; `0` is the system session.
    pub session_index: u64,
    pub time_diff: u64,
}

impl RelativeTimestamp {
    pub fn new(session_index: u64, time_diff: u64) -> Self {
        Self {
            session_index,
            time_diff,
        }
    }
}

/// Ordered `(sid, time)` entries; the position is the wire index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClockTable {
    pub by_idx: Vec<Ts>,
    by_sid: HashMap<u64, usize>,
}

impl ClockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local session first at its last issued time, then the peers.
    pub fn from_clock(clock: &ClockVector) -> Self {
        let mut table = Self::new();
        table.push(ts(clock.sid, clock.time.saturating_sub(1)));
        for peer in clock.peers.values() {
            table.push(*peer);
        }
        table
    }

    /// Appends an entry. A session already in the table is replaced in
    /// place.
    pub fn push(&mut self, id: Ts) {
        match self.by_sid.get(&id.sid) {
            Some(&idx) => self.by_idx[idx] = id,
            None => {
                self.by_sid.insert(id.sid, self.by_idx.len());
                self.by_idx.push(id);
            }
        }
    }

    /// 0-based lookup.
    pub fn get_by_index(&self, index: usize) -> Option<Ts> {
        self.by_idx.get(index).copied()
    }

    /// Returns the 0-based index and entry of `sid`.
    pub fn get_by_sid(&self, sid: u64) -> Option<(usize, Ts)> {
        self.by_sid.get(&sid).map(|&idx| (idx, self.by_idx[idx]))
    }

    pub fn len(&self) -> usize {
        self.by_idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_idx.is_empty()
    }

    /// `vu57` entry count, then `vu57(sid) vu57(time)` per entry.
    pub fn write(&self, w: &mut CrdtWriter) {
        w.vu57(self.by_idx.len() as u64);
        for id in &self.by_idx {
            w.vu57(id.sid);
            w.vu57(id.time);
        }
    }

    pub fn read(r: &mut CrdtReader<'_>) -> Result<Self, DecodeError> {
        let len = r.vu57()?;
        let mut table = Self::new();
        for _ in 0..len {
            let sid = r.vu57()?;
            let time = r.vu57()?;
            table.push(checked(ts(sid, time))?);
        }
        Ok(table)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = CrdtWriter::with_alloc_size(16 + self.by_idx.len() * 16);
        self.write(&mut w);
        w.flush()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        Self::read(&mut CrdtReader::new(data))
    }

    /// Rebuilds a clock: the first entry is the local session, the rest are
    /// observed peers.
    pub fn to_clock(&self) -> Option<ClockVector> {
        let (first, peers) = self.by_idx.split_first()?;
        let mut clock = ClockVector::new(first.sid, first.time + 1);
        for peer in peers {
            clock.observe(*peer, 1);
        }
        Some(clock)
    }
}

fn checked(id: Ts) -> Result<Ts, DecodeError> {
    if id.sid > session::MAX || id.time > MAX_TIME {
        return Err(DecodeError::TimestampOutOfRange(id));
    }
    Ok(id)
}

/// Assigns table entries to timestamps while a blob is written.
#[derive(Debug, Clone, Default)]
pub struct ClockEncoder {
    pub table: ClockTable,
    clock: Option<ClockVector>,
}

impl ClockEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoder whose table starts with the local session of `clock`; peers
    /// get their observed time as reference when first appended.
    pub fn from_clock(clock: &ClockVector) -> Self {
        let mut table = ClockTable::new();
        table.push(ts(clock.sid, clock.time.saturating_sub(1)));
        Self {
            table,
            clock: Some(clock.clone()),
        }
    }

    /// Raises the reference time of `id`'s session to at least `id.time`,
    /// adding the session if needed. Call for every timestamp before the
    /// table is written to make every later [`append`](Self::append)
    /// succeed.
    pub fn observe(&mut self, id: Ts) {
        if id.sid == session::SYSTEM {
            return;
        }
        match self.table.get_by_sid(id.sid) {
            Some((_, entry)) if entry.time >= id.time => {}
            _ => self.table.push(id),
        }
    }

    pub fn append(&mut self, id: Ts) -> Result<RelativeTimestamp, EncodeError> {
        if id.sid == session::SYSTEM {
            return Ok(RelativeTimestamp::new(0, id.time));
        }
        let (idx, entry) = match self.table.get_by_sid(id.sid) {
            Some(found) => found,
            None => {
                let reference = match &self.clock {
                    Some(clock) => clock
                        .peer(id.sid)
                        .unwrap_or(ts(id.sid, clock.time.saturating_sub(1))),
                    None => id,
                };
                self.table.push(reference);
                (self.table.len() - 1, reference)
            }
        };
        if id.time > entry.time {
            return Err(EncodeError::TimeTravel {
                id,
                table_time: entry.time,
            });
        }
        Ok(RelativeTimestamp::new(idx as u64 + 1, entry.time - id.time))
    }

    /// Appends `id` and writes it with [`CrdtWriter::id`].
    pub fn write_id(&mut self, w: &mut CrdtWriter, id: Ts) -> Result<(), EncodeError> {
        let rel = self.append(id)?;
        w.id(rel.session_index, rel.time_diff);
        Ok(())
    }
}

/// Resolves table-relative ids back to timestamps.
#[derive(Debug, Clone)]
pub struct ClockDecoder {
    pub table: ClockTable,
}

impl ClockDecoder {
    pub fn new(table: ClockTable) -> Self {
        Self { table }
    }

    pub fn decode_id(&self, session_index: u64, time_diff: u64) -> Result<Ts, DecodeError> {
        if session_index == 0 {
            return checked(ts(session::SYSTEM, time_diff));
        }
        let entry = usize::try_from(session_index - 1)
            .ok()
            .and_then(|idx| self.table.get_by_index(idx))
            .ok_or(DecodeError::UnknownSessionIndex(session_index))?;
        let time = entry
            .time
            .checked_sub(time_diff)
            .ok_or(DecodeError::TimeUnderflow)?;
        Ok(ts(entry.sid, time))
    }

    pub fn read_id(&self, r: &mut CrdtReader<'_>) -> Result<Ts, DecodeError> {
        let (index, diff) = r.id()?;
        self.decode_id(index, diff)
    }
}
