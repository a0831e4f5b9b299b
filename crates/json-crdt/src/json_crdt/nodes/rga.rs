//! Replicated Growable Array.
//!
//! A sequence of chunks, each a run of consecutive ticks of one session.
//! Chunks live in an arena and are linked in document order; a second
//! index keyed by chunk start id resolves element ids to chunks. Deleted
//! chunks stay in place as tombstones without payload so that late
//! insertions anchored inside them still find their position.

use std::cell::OnceCell;
use std::collections::BTreeMap;

use thiserror::Error;

use crate::json_crdt_patch::clock::{Ts, Tss};
use crate::json_crdt_patch::constants::ORIGIN;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RgaError {
    #[error("position {pos} out of bounds for length {len}")]
    OutOfBounds { pos: usize, len: usize },
}

/// Payload of a chunk: one element per tick.
pub trait ChunkData: Clone + Default {
    /// Number of elements.
    fn span(&self) -> u64;
    /// Keeps the first `at` elements and returns the rest.
    fn split_off(&mut self, at: u64) -> Self;
    fn append(&mut self, other: Self);
}

impl ChunkData for String {
    fn span(&self) -> u64 {
        self.chars().count() as u64
    }

    fn split_off(&mut self, at: u64) -> Self {
        let byte = self
            .char_indices()
            .nth(at as usize)
            .map_or(self.len(), |(i, _)| i);
        String::split_off(self, byte)
    }

    fn append(&mut self, other: Self) {
        self.push_str(&other);
    }
}

impl<E: Clone> ChunkData for Vec<E> {
    fn span(&self) -> u64 {
        self.len() as u64
    }

    fn split_off(&mut self, at: u64) -> Self {
        Vec::split_off(self, at as usize)
    }

    fn append(&mut self, mut other: Self) {
        Vec::append(self, &mut other);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    /// Id of the first element.
    pub id: Ts,
    pub span: u64,
    pub deleted: bool,
    /// `None` once deleted.
    pub data: Option<T>,
}

impl<T> Chunk<T> {
    pub fn contains(&self, id: Ts) -> bool {
        id.sid == self.id.sid && id.time >= self.id.time && id.time < self.id.time + self.span
    }

    fn continues(&self, next: &Chunk<T>) -> bool {
        self.id.sid == next.id.sid
            && self.id.time + self.span == next.id.time
            && self.deleted == next.deleted
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    chunk: Chunk<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Payloads dropped by [`Rga::delete`].
#[derive(Debug)]
pub struct Removed<T> {
    pub data: Vec<T>,
    /// Ticks of the requested spans that matched no known element.
    pub unknown: u64,
}

#[derive(Debug, Clone)]
pub struct Rga<T> {
    /// Id of the node owning the sequence. Inserting after it inserts at
    /// the head.
    pub id: Ts,
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    by_id: BTreeMap<(u64, u64), usize>,
    len: u64,
    view: OnceCell<T>,
}

impl<T: ChunkData> Rga<T> {
    pub fn new(id: Ts) -> Self {
        Self {
            id,
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            by_id: BTreeMap::new(),
            len: 0,
            view: OnceCell::new(),
        }
    }

    /// Number of live elements.
    pub fn size(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Chunks in document order, tombstones included.
    pub fn chunks(&self) -> Chunks<'_, T> {
        Chunks {
            slots: &self.slots,
            cur: self.head,
        }
    }

    /// Chunk holding element `id`, if known.
    pub fn find_chunk(&self, id: Ts) -> Option<&Chunk<T>> {
        self.find_slot(id).map(|(s, _)| &self.slots[s].chunk)
    }

    /// Concatenated payload of all live chunks.
    pub fn view(&self) -> &T {
        self.view.get_or_init(|| {
            let mut out = T::default();
            for chunk in self.chunks() {
                if let Some(data) = &chunk.data {
                    out.append(data.clone());
                }
            }
            out
        })
    }

    /// Inserts `data`, whose first element gets `id`, right after element
    /// `after`. `after` equal to the sequence id (or [`ORIGIN`]) inserts at
    /// the head.
    ///
    /// Concurrent insertions after the same anchor are ordered by id,
    /// greatest first, so every replica ends up with the same sequence.
    /// Returns `false` when the anchor is unknown and nothing was inserted.
    pub fn ins(&mut self, after: Ts, id: Ts, data: T) -> bool {
        let span = data.span();
        if span == 0 || self.find_slot(id).is_some() {
            return true;
        }
        let mut prev = if after == self.id || after == ORIGIN {
            None
        } else {
            let Some((s, offset)) = self.find_slot(after) else {
                return false;
            };
            if offset + 1 < self.slots[s].chunk.span {
                self.split(s, offset + 1);
            }
            Some(s)
        };
        let mut next = match prev {
            Some(p) => self.slots[p].next,
            None => self.head,
        };
        while let Some(n) = next {
            if self.slots[n].chunk.id < id {
                break;
            }
            prev = Some(n);
            next = self.slots[n].next;
        }
        let s = self.alloc(Chunk {
            id,
            span,
            deleted: false,
            data: Some(data),
        });
        self.link_after(prev, s);
        self.by_id.insert((id.sid, id.time), s);
        self.len += span;
        let left = match prev {
            Some(p) if self.try_merge(p) => p,
            _ => s,
        };
        self.try_merge(left);
        self.invalidate();
        true
    }

    /// Tombstones every known element inside `spans`, splitting chunks at
    /// the span edges.
    pub fn delete(&mut self, spans: &[Tss]) -> Removed<T> {
        let mut removed = Removed {
            data: Vec::new(),
            unknown: 0,
        };
        for span in spans {
            let end = span.time + span.span;
            let mut t = span.time;
            while t < end {
                let Some((s, offset)) = self.find_slot(Ts::new(span.sid, t)) else {
                    // Skip ahead to the next known chunk of the session.
                    match self.by_id.range((span.sid, t)..(span.sid, end)).next() {
                        Some((&(_, time), _)) => {
                            removed.unknown += time - t;
                            t = time;
                            continue;
                        }
                        None => {
                            removed.unknown += end - t;
                            break;
                        }
                    }
                };
                let chunk = &self.slots[s].chunk;
                if chunk.deleted {
                    t = chunk.id.time + chunk.span;
                    continue;
                }
                let s = if offset > 0 { self.split(s, offset) } else { s };
                let take = (end - t).min(self.slots[s].chunk.span);
                if take < self.slots[s].chunk.span {
                    self.split(s, take);
                }
                let chunk = &mut self.slots[s].chunk;
                chunk.deleted = true;
                if let Some(data) = chunk.data.take() {
                    removed.data.push(data);
                }
                self.len -= take;
                t += take;
                let prev = self.slots[s].prev;
                let left = match prev {
                    Some(p) if self.try_merge(p) => p,
                    _ => s,
                };
                self.try_merge(left);
            }
        }
        self.invalidate();
        removed
    }

    /// Id of the live element at `pos`.
    pub fn find_id(&self, pos: usize) -> Result<Ts, RgaError> {
        let mut remaining = pos as u64;
        for chunk in self.chunks().filter(|c| !c.deleted) {
            if remaining < chunk.span {
                return Ok(Ts::new(chunk.id.sid, chunk.id.time + remaining));
            }
            remaining -= chunk.span;
        }
        Err(RgaError::OutOfBounds {
            pos,
            len: self.size(),
        })
    }

    /// Id spans covering the live elements `pos..pos + len`.
    pub fn find_id_span(&self, pos: usize, len: usize) -> Result<Vec<Tss>, RgaError> {
        let end = pos.checked_add(len).filter(|&end| end <= self.size());
        if end.is_none() {
            return Err(RgaError::OutOfBounds {
                pos: pos.saturating_add(len),
                len: self.size(),
            });
        }
        let mut spans: Vec<Tss> = Vec::new();
        let mut skip = pos as u64;
        let mut left = len as u64;
        for chunk in self.chunks().filter(|c| !c.deleted) {
            if left == 0 {
                break;
            }
            if skip >= chunk.span {
                skip -= chunk.span;
                continue;
            }
            let take = (chunk.span - skip).min(left);
            let time = chunk.id.time + skip;
            match spans.last_mut() {
                Some(last) if last.sid == chunk.id.sid && last.time + last.span == time => {
                    last.span += take;
                }
                _ => spans.push(Tss::new(chunk.id.sid, time, take)),
            }
            skip = 0;
            left -= take;
        }
        Ok(spans)
    }

    fn invalidate(&mut self) {
        self.view = OnceCell::new();
    }

    fn find_slot(&self, id: Ts) -> Option<(usize, u64)> {
        let (&(sid, time), &s) = self.by_id.range(..=(id.sid, id.time)).next_back()?;
        if sid != id.sid || id.time >= time + self.slots[s].chunk.span {
            return None;
        }
        Some((s, id.time - time))
    }

    fn alloc(&mut self, chunk: Chunk<T>) -> usize {
        let slot = Slot {
            chunk,
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(s) => {
                self.slots[s] = slot;
                s
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        }
    }

    fn link_after(&mut self, prev: Option<usize>, s: usize) {
        let next = match prev {
            Some(p) => self.slots[p].next,
            None => self.head,
        };
        self.slots[s].prev = prev;
        self.slots[s].next = next;
        match prev {
            Some(p) => self.slots[p].next = Some(s),
            None => self.head = Some(s),
        }
        if let Some(n) = next {
            self.slots[n].prev = Some(s);
        }
    }

    fn unlink(&mut self, s: usize) {
        let Slot { prev, next, .. } = self.slots[s];
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            self.slots[n].prev = prev;
        }
    }

    /// Splits the chunk in slot `s` after `at` elements and returns the
    /// slot of the right half.
    fn split(&mut self, s: usize, at: u64) -> usize {
        let chunk = &mut self.slots[s].chunk;
        let id = Ts::new(chunk.id.sid, chunk.id.time + at);
        let right = Chunk {
            id,
            span: chunk.span - at,
            deleted: chunk.deleted,
            data: chunk.data.as_mut().map(|data| data.split_off(at)),
        };
        chunk.span = at;
        let r = self.alloc(right);
        self.link_after(Some(s), r);
        self.by_id.insert((id.sid, id.time), r);
        r
    }

    /// Folds the chunk after `left` into it when it continues the same run.
    fn try_merge(&mut self, left: usize) -> bool {
        let Some(right) = self.slots[left].next else {
            return false;
        };
        if !self.slots[left].chunk.continues(&self.slots[right].chunk) {
            return false;
        }
        let data = self.slots[right].chunk.data.take();
        let Chunk { id, span, .. } = self.slots[right].chunk;
        let chunk = &mut self.slots[left].chunk;
        chunk.span += span;
        if let (Some(into), Some(data)) = (chunk.data.as_mut(), data) {
            into.append(data);
        }
        self.unlink(right);
        self.by_id.remove(&(id.sid, id.time));
        self.free.push(right);
        true
    }
}

impl Rga<Vec<Ts>> {
    /// Replaces the value of element `elem` when `val` is newer than the
    /// current one. Returns the replaced value.
    pub fn upd(&mut self, elem: Ts, val: Ts) -> Option<Ts> {
        let (s, offset) = self.find_slot(elem)?;
        let slot = self.slots[s].chunk.data.as_mut()?.get_mut(offset as usize)?;
        if val <= *slot {
            return None;
        }
        let old = std::mem::replace(slot, val);
        self.invalidate();
        Some(old)
    }
}

/// Chunks are compared as runs, so different chunk boundaries over the same
/// elements are equal.
impl<T: ChunkData + PartialEq> PartialEq for Rga<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && normalized(self) == normalized(other)
    }
}

fn normalized<T: ChunkData>(rga: &Rga<T>) -> Vec<Chunk<T>> {
    let mut out: Vec<Chunk<T>> = Vec::new();
    for chunk in rga.chunks() {
        match out.last_mut() {
            Some(last) if last.continues(chunk) => {
                last.span += chunk.span;
                if let (Some(into), Some(data)) = (last.data.as_mut(), &chunk.data) {
                    into.append(data.clone());
                }
            }
            _ => out.push(chunk.clone()),
        }
    }
    out
}

pub struct Chunks<'a, T> {
    slots: &'a [Slot<T>],
    cur: Option<usize>,
}

impl<'a, T> Iterator for Chunks<'a, T> {
    type Item = &'a Chunk<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = &self.slots[self.cur?];
        self.cur = slot.next;
        Some(&slot.chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_crdt_patch::clock::{ts, tss};
    use proptest::prelude::*;

    const STR: Ts = Ts::new(1, 1);

    fn text(rga: &Rga<String>) -> &str {
        rga.view().as_str()
    }

    #[test]
    fn insert_at_head_and_after() {
        let mut rga = Rga::<String>::new(STR);
        assert!(rga.ins(STR, ts(1, 2), "abc".into()));
        assert!(rga.ins(ts(1, 4), ts(1, 5), "d".into()));
        assert_eq!(text(&rga), "abcd");
        assert_eq!(rga.size(), 4);
        // Typing at the end keeps a single chunk.
        assert_eq!(rga.chunks().count(), 1);
    }

    #[test]
    fn origin_anchor_means_head() {
        let mut rga = Rga::<String>::new(STR);
        rga.ins(STR, ts(1, 2), "b".into());
        rga.ins(ORIGIN, ts(1, 3), "a".into());
        assert_eq!(text(&rga), "ab");
    }

    #[test]
    fn insert_inside_chunk_splits_it() {
        let mut rga = Rga::<String>::new(STR);
        rga.ins(STR, ts(1, 2), "abcd".into());
        rga.ins(ts(1, 3), ts(2, 10), "XY".into());
        assert_eq!(text(&rga), "abXYcd");
        let spans: Vec<_> = rga.chunks().map(|c| (c.id, c.span)).collect();
        assert_eq!(spans, vec![(ts(1, 2), 2), (ts(2, 10), 2), (ts(1, 4), 2)]);
        assert_eq!(rga.find_chunk(ts(1, 5)).map(|c| c.id), Some(ts(1, 4)));
    }

    #[test]
    fn concurrent_inserts_order_by_id() {
        let build = |first: (Ts, &str), second: (Ts, &str)| {
            let mut rga = Rga::<String>::new(STR);
            rga.ins(STR, ts(1, 2), "ab".into());
            rga.ins(ts(1, 2), first.0, first.1.into());
            rga.ins(ts(1, 2), second.0, second.1.into());
            text(&rga).to_owned()
        };
        let x = (ts(5, 10), "x");
        let y = (ts(9, 10), "y");
        assert_eq!(build(x, y), build(y, x));
        // Same time: the greater session wins the spot next to the anchor.
        assert_eq!(build(x, y), "ayxb");
    }

    #[test]
    fn concurrent_insert_skips_newer_subtree() {
        let mut rga = Rga::<String>::new(STR);
        rga.ins(STR, ts(1, 2), "a".into());
        // A newer insertion after "a" followed by a continuation of it.
        rga.ins(ts(1, 2), ts(3, 20), "N".into());
        rga.ins(ts(3, 20), ts(3, 21), "n".into());
        // An older concurrent insertion after "a" lands after that subtree.
        rga.ins(ts(1, 2), ts(4, 5), "o".into());
        assert_eq!(text(&rga), "aNno");
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let mut rga = Rga::<String>::new(STR);
        rga.ins(STR, ts(1, 2), "ab".into());
        let before = rga.clone();
        assert!(rga.ins(STR, ts(1, 2), "ab".into()));
        assert_eq!(text(&rga), "ab");
        assert_eq!(rga, before);
    }

    #[test]
    fn unknown_anchor_drops_insert() {
        let mut rga = Rga::<String>::new(STR);
        rga.ins(STR, ts(1, 2), "ab".into());
        assert!(!rga.ins(ts(7, 7), ts(1, 10), "zz".into()));
        assert_eq!(text(&rga), "ab");
        assert_eq!(rga.size(), 2);
    }

    #[test]
    fn delete_middle_character() {
        let mut rga = Rga::<String>::new(STR);
        rga.ins(STR, ts(1, 2), "abc".into());
        let removed = rga.delete(&[tss(1, 3, 1)]);
        assert_eq!(removed.data, vec!["b".to_owned()]);
        assert_eq!(removed.unknown, 0);
        assert_eq!(text(&rga), "ac");
        assert_eq!(rga.size(), 2);
        let chunks: Vec<_> = rga.chunks().map(|c| (c.id, c.span, c.deleted)).collect();
        assert_eq!(
            chunks,
            vec![(ts(1, 2), 1, false), (ts(1, 3), 1, true), (ts(1, 4), 1, false)]
        );
    }

    #[test]
    fn delete_spanning_split_chunks() {
        let mut rga = Rga::<String>::new(STR);
        rga.ins(STR, ts(1, 2), "abcdef".into());
        rga.ins(ts(1, 3), ts(2, 10), "XY".into());
        // "abXYcdef": remove "b" through "d" by their original ids.
        rga.delete(&[tss(1, 3, 3)]);
        assert_eq!(text(&rga), "aXYef");
        rga.delete(&[tss(2, 10, 2)]);
        assert_eq!(text(&rga), "aef");
        let deleted: Vec<_> = rga
            .chunks()
            .filter(|c| c.deleted)
            .map(|c| (c.id, c.span))
            .collect();
        assert_eq!(deleted, vec![(ts(1, 3), 1), (ts(2, 10), 2), (ts(1, 4), 2)]);
    }

    #[test]
    fn deleted_range_keeps_anchors() {
        let mut rga = Rga::<String>::new(STR);
        rga.ins(STR, ts(1, 2), "abc".into());
        rga.delete(&[tss(1, 2, 3)]);
        assert_eq!(text(&rga), "");
        assert!(rga.ins(ts(1, 3), ts(2, 9), "z".into()));
        assert_eq!(text(&rga), "z");
    }

    #[test]
    fn delete_of_unknown_ids_is_counted() {
        let mut rga = Rga::<String>::new(STR);
        rga.ins(STR, ts(1, 5), "ab".into());
        let removed = rga.delete(&[tss(1, 3, 5), tss(8, 1, 2)]);
        assert_eq!(removed.unknown, 5);
        assert_eq!(text(&rga), "");
    }

    #[test]
    fn delete_twice_is_harmless() {
        let mut rga = Rga::<String>::new(STR);
        rga.ins(STR, ts(1, 2), "abc".into());
        rga.delete(&[tss(1, 2, 2)]);
        let removed = rga.delete(&[tss(1, 2, 2)]);
        assert!(removed.data.is_empty());
        assert_eq!(rga.size(), 1);
        assert_eq!(text(&rga), "c");
    }

    #[test]
    fn find_id_and_span() {
        let mut rga = Rga::<String>::new(STR);
        rga.ins(STR, ts(1, 2), "abcd".into());
        rga.ins(ts(1, 3), ts(2, 10), "XY".into());
        assert_eq!(rga.find_id(0).unwrap(), ts(1, 2));
        assert_eq!(rga.find_id(2).unwrap(), ts(2, 10));
        assert_eq!(rga.find_id(5).unwrap(), ts(1, 5));
        assert_eq!(
            rga.find_id(6),
            Err(RgaError::OutOfBounds { pos: 6, len: 6 })
        );
        assert_eq!(
            rga.find_id_span(1, 4).unwrap(),
            vec![tss(1, 3, 1), tss(2, 10, 2), tss(1, 4, 1)]
        );
        assert_eq!(rga.find_id_span(6, 0).unwrap(), vec![]);
        assert!(rga.find_id_span(5, 2).is_err());
    }

    #[test]
    fn view_cache_follows_edits() {
        let mut rga = Rga::<Vec<u8>>::new(STR);
        rga.ins(STR, ts(1, 2), vec![1, 2, 3]);
        assert_eq!(rga.view(), &vec![1, 2, 3]);
        rga.delete(&[tss(1, 2, 1)]);
        assert_eq!(rga.view(), &vec![2, 3]);
    }

    #[test]
    fn array_update_is_last_writer_wins() {
        let mut rga = Rga::<Vec<Ts>>::new(STR);
        rga.ins(STR, ts(1, 2), vec![ts(1, 10), ts(1, 11)]);
        assert_eq!(rga.upd(ts(1, 3), ts(1, 20)), Some(ts(1, 11)));
        assert_eq!(rga.upd(ts(1, 3), ts(1, 15)), None);
        assert_eq!(rga.view(), &vec![ts(1, 10), ts(1, 20)]);
        assert_eq!(rga.upd(ts(9, 9), ts(1, 30)), None);
    }

    #[test]
    fn equality_ignores_chunk_boundaries() {
        let mut a = Rga::<String>::new(STR);
        a.ins(STR, ts(5, 10), "ab".into());
        a.ins(ts(5, 11), ts(1, 3), "Y".into());
        let mut b = Rga::<String>::new(STR);
        b.ins(STR, ts(5, 10), "ab".into());
        // Splits "ab", then skips the newer right half.
        b.ins(ts(5, 10), ts(1, 3), "Y".into());
        assert_eq!(text(&b), "abY");
        assert_eq!(a.chunks().count(), 2);
        assert_eq!(b.chunks().count(), 3);
        assert_eq!(a, b);
    }

    #[derive(Debug, Clone)]
    enum Edit {
        Insert { pos: usize, text: String },
        Delete { pos: usize, len: usize },
    }

    fn edit() -> impl Strategy<Value = Edit> {
        prop_oneof![
            (0..64usize, "[a-z]{1,5}").prop_map(|(pos, text)| Edit::Insert { pos, text }),
            (0..64usize, 1..8usize).prop_map(|(pos, len)| Edit::Delete { pos, len }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn matches_plain_vector(edits in prop::collection::vec(edit(), 1..40)) {
            let mut rga = Rga::<String>::new(STR);
            let mut model: Vec<char> = Vec::new();
            let mut time = 2;
            for edit in edits {
                match edit {
                    Edit::Insert { pos, text } => {
                        let pos = pos % (model.len() + 1);
                        let after = if pos == 0 { STR } else { rga.find_id(pos - 1).unwrap() };
                        let sid = if time % 3 == 0 { 1 } else { 2 };
                        let span = text.chars().count() as u64;
                        prop_assert!(rga.ins(after, ts(sid, time), text.clone()));
                        time += span;
                        for (i, c) in text.chars().enumerate() {
                            model.insert(pos + i, c);
                        }
                    }
                    Edit::Delete { pos, len } => {
                        if model.is_empty() {
                            continue;
                        }
                        let pos = pos % model.len();
                        let len = len.min(model.len() - pos);
                        let spans = rga.find_id_span(pos, len).unwrap();
                        rga.delete(&spans);
                        model.drain(pos..pos + len);
                    }
                }
                let expected: String = model.iter().collect();
                prop_assert_eq!(rga.view().as_str(), expected.as_str());
                prop_assert_eq!(rga.size(), model.len());
            }
        }
    }
}
