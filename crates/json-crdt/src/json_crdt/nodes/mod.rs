//! JSON CRDT node types.
//!
//! | Type      | Semantics                                   |
//! |-----------|---------------------------------------------|
//! | `ConNode` | Immutable constant                          |
//! | `ValNode` | Last-write-wins register                    |
//! | `ObjNode` | LWW map from string keys to node ids        |
//! | `VecNode` | LWW tuple of up to 256 slots                |
//! | `StrNode` | RGA string                                  |
//! | `BinNode` | RGA byte string                             |
//! | `ArrNode` | RGA array of node ids, LWW per element      |
//!
//! Containers store ids only; values are resolved through a [`NodeIndex`].

pub mod rga;

use std::collections::HashMap;

use indexmap::IndexMap;
use json_crdt_pack::{PackMap, PackValue};

use crate::json_crdt_patch::clock::Ts;
use crate::json_crdt_patch::enums::session;
use crate::json_crdt_patch::operations::ConValue;
use rga::Rga;

/// Every node of a document keyed by id.
pub type NodeIndex = HashMap<Ts, CrdtNode>;

// ── ConNode ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ConNode {
    pub id: Ts,
    pub val: ConValue,
}

impl ConNode {
    pub fn new(id: Ts, val: ConValue) -> Self {
        Self { id, val }
    }

    /// A timestamp constant views as `[sid, time]`.
    pub fn view(&self) -> PackValue {
        match &self.val {
            ConValue::Val(val) => val.clone(),
            ConValue::Ref(id) => {
                PackValue::Array(vec![PackValue::from(id.sid), PackValue::from(id.time)])
            }
        }
    }
}

// ── ValNode ───────────────────────────────────────────────────────────────

/// Last-write-wins register. The document root is one, at `ORIGIN`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValNode {
    pub id: Ts,
    /// Id of the current value.
    pub val: Ts,
}

impl ValNode {
    pub fn new(id: Ts, val: Ts) -> Self {
        Self { id, val }
    }

    /// Points the register at `val` if it is newer than both the current
    /// value and the register itself. A system value (the initial
    /// `undefined`) always loses. Returns the replaced value.
    pub fn set(&mut self, val: Ts) -> Option<Ts> {
        if val <= self.id {
            return None;
        }
        if self.val.sid != session::SYSTEM && val <= self.val {
            return None;
        }
        Some(std::mem::replace(&mut self.val, val))
    }
}

// ── ObjNode ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ObjNode {
    pub id: Ts,
    /// Keys in first-write order.
    pub keys: IndexMap<String, Ts>,
}

impl ObjNode {
    pub fn new(id: Ts) -> Self {
        Self {
            id,
            keys: IndexMap::new(),
        }
    }

    /// Writes `key` unless the current value is at least as new.
    ///
    /// `None` means the write lost; otherwise carries the replaced value.
    pub fn put(&mut self, key: &str, val: Ts) -> Option<Option<Ts>> {
        match self.keys.get_mut(key) {
            Some(current) if val <= *current => None,
            Some(current) => Some(Some(std::mem::replace(current, val))),
            None => {
                self.keys.insert(key.to_owned(), val);
                Some(None)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Ts> {
        self.keys.get(key).copied()
    }
}

// ── VecNode ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct VecNode {
    pub id: Ts,
    /// `None` marks a slot never written.
    pub elements: Vec<Option<Ts>>,
}

impl VecNode {
    pub fn new(id: Ts) -> Self {
        Self {
            id,
            elements: Vec::new(),
        }
    }

    /// Same contract as [`ObjNode::put`], keyed by slot.
    pub fn put(&mut self, index: u8, val: Ts) -> Option<Option<Ts>> {
        let index = index as usize;
        if index >= self.elements.len() {
            self.elements.resize(index + 1, None);
        }
        match self.elements[index] {
            Some(current) if val <= current => None,
            old => {
                self.elements[index] = Some(val);
                Some(old)
            }
        }
    }

    pub fn get(&self, index: usize) -> Option<Ts> {
        self.elements.get(index).copied().flatten()
    }
}

// ── StrNode / BinNode / ArrNode ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StrNode {
    pub id: Ts,
    pub rga: Rga<String>,
}

impl StrNode {
    pub fn new(id: Ts) -> Self {
        Self {
            id,
            rga: Rga::new(id),
        }
    }

    pub fn view(&self) -> &str {
        self.rga.view()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinNode {
    pub id: Ts,
    pub rga: Rga<Vec<u8>>,
}

impl BinNode {
    pub fn new(id: Ts) -> Self {
        Self {
            id,
            rga: Rga::new(id),
        }
    }

    pub fn view(&self) -> &[u8] {
        self.rga.view()
    }
}

/// RGA whose elements hold the ids of their value nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrNode {
    pub id: Ts,
    pub rga: Rga<Vec<Ts>>,
}

impl ArrNode {
    pub fn new(id: Ts) -> Self {
        Self {
            id,
            rga: Rga::new(id),
        }
    }

    /// Value ids of the live elements in order.
    pub fn values(&self) -> &[Ts] {
        self.rga.view()
    }

    /// Value id held by element `elem`, if it is live.
    pub fn get(&self, elem: Ts) -> Option<Ts> {
        let chunk = self.rga.find_chunk(elem)?;
        let data = chunk.data.as_ref()?;
        data.get((elem.time - chunk.id.time) as usize).copied()
    }
}

// ── CrdtNode ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum CrdtNode {
    Con(ConNode),
    Val(ValNode),
    Obj(ObjNode),
    Vec(VecNode),
    Str(StrNode),
    Bin(BinNode),
    Arr(ArrNode),
}

impl CrdtNode {
    pub fn id(&self) -> Ts {
        match self {
            Self::Con(n) => n.id,
            Self::Val(n) => n.id,
            Self::Obj(n) => n.id,
            Self::Vec(n) => n.id,
            Self::Str(n) => n.id,
            Self::Bin(n) => n.id,
            Self::Arr(n) => n.id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Con(_) => "con",
            Self::Val(_) => "val",
            Self::Obj(_) => "obj",
            Self::Vec(_) => "vec",
            Self::Str(_) => "str",
            Self::Bin(_) => "bin",
            Self::Arr(_) => "arr",
        }
    }

    /// Ids of every node this one references, tombstoned array elements
    /// excluded.
    pub fn children(&self) -> Vec<Ts> {
        match self {
            Self::Con(_) | Self::Str(_) | Self::Bin(_) => Vec::new(),
            Self::Val(n) => vec![n.val],
            Self::Obj(n) => n.keys.values().copied().collect(),
            Self::Vec(n) => n.elements.iter().flatten().copied().collect(),
            Self::Arr(n) => n.values().to_vec(),
        }
    }

    /// Plain value of the node with references resolved through `index`.
    ///
    /// Map keys holding `undefined` are left out, as are array elements
    /// whose value node is missing. Tuple holes stay `undefined`. Nesting
    /// is walked with an explicit stack, so document depth is bounded by
    /// memory rather than by the call stack.
    pub fn view<'a>(&'a self, index: &'a NodeIndex) -> PackValue {
        let mut stack = match visit(self, index) {
            Visit::Leaf(val) => return val,
            Visit::Open(frame) => vec![frame],
        };
        while let Some(frame) = stack.last_mut() {
            match frame.next(index).map(|child| visit(child, index)) {
                Some(Visit::Leaf(val)) => frame.push(val),
                Some(Visit::Open(open)) => stack.push(open),
                None => {
                    let val = stack.pop().map_or(PackValue::Undefined, Frame::finish);
                    match stack.last_mut() {
                        Some(parent) => parent.push(val),
                        None => return val,
                    }
                }
            }
        }
        PackValue::Undefined
    }
}

enum Visit<'a> {
    Leaf(PackValue),
    Open(Frame<'a>),
}

/// A container whose view is being assembled.
enum Frame<'a> {
    Obj {
        entries: indexmap::map::Iter<'a, String, Ts>,
        key: Option<&'a String>,
        map: PackMap,
    },
    Vec {
        slots: std::slice::Iter<'a, Option<Ts>>,
        items: Vec<PackValue>,
    },
    Arr {
        ids: std::slice::Iter<'a, Ts>,
        items: Vec<PackValue>,
    },
}

/// Follows registers to the first non-register node and either views it
/// directly or opens a frame for it.
fn visit<'a>(mut node: &'a CrdtNode, index: &'a NodeIndex) -> Visit<'a> {
    loop {
        let frame = match node {
            CrdtNode::Val(reg) => match index.get(&reg.val) {
                Some(next) => {
                    node = next;
                    continue;
                }
                None => return Visit::Leaf(PackValue::Undefined),
            },
            CrdtNode::Con(n) => return Visit::Leaf(n.view()),
            CrdtNode::Str(n) => return Visit::Leaf(PackValue::Str(n.view().to_owned())),
            CrdtNode::Bin(n) => return Visit::Leaf(PackValue::Bytes(n.view().to_vec())),
            CrdtNode::Obj(n) => Frame::Obj {
                entries: n.keys.iter(),
                key: None,
                map: PackMap::new(),
            },
            CrdtNode::Vec(n) => Frame::Vec {
                slots: n.elements.iter(),
                items: Vec::with_capacity(n.elements.len()),
            },
            CrdtNode::Arr(n) => Frame::Arr {
                ids: n.values().iter(),
                items: Vec::with_capacity(n.values().len()),
            },
        };
        return Visit::Open(frame);
    }
}

impl<'a> Frame<'a> {
    /// Next child to descend into. Children that view as `undefined`
    /// without a node are settled in place.
    fn next(&mut self, index: &'a NodeIndex) -> Option<&'a CrdtNode> {
        match self {
            Frame::Obj { entries, key, .. } => {
                for (k, id) in entries.by_ref() {
                    if let Some(node) = index.get(id) {
                        *key = Some(k);
                        return Some(node);
                    }
                }
                None
            }
            Frame::Vec { slots, items } => {
                for slot in slots.by_ref() {
                    match slot.and_then(|id| index.get(&id)) {
                        Some(node) => return Some(node),
                        None => items.push(PackValue::Undefined),
                    }
                }
                None
            }
            Frame::Arr { ids, .. } => ids.find_map(|id| index.get(id)),
        }
    }

    fn push(&mut self, val: PackValue) {
        match self {
            Frame::Obj { key, map, .. } => {
                if let Some(k) = key.take() {
                    if !val.is_undefined() {
                        map.insert(k.clone(), val);
                    }
                }
            }
            Frame::Vec { items, .. } | Frame::Arr { items, .. } => items.push(val),
        }
    }

    fn finish(self) -> PackValue {
        match self {
            Frame::Obj { map, .. } => PackValue::Object(map),
            Frame::Vec { items, .. } | Frame::Arr { items, .. } => PackValue::Array(items),
        }
    }
}

/// View of node `id`, `undefined` when it is not in the index.
pub fn view_id(index: &NodeIndex, id: Ts) -> PackValue {
    index
        .get(&id)
        .map_or(PackValue::Undefined, |node| node.view(index))
}
