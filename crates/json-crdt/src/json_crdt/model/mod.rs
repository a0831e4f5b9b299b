//! JSON CRDT document model.
//!
//! A [`Model`] owns a node index (every known node keyed by its id), the
//! root register and a clock. Operations are applied through
//! [`Model::apply_patch`] or [`Model::apply_operation`]; [`Model::view`]
//! materializes the document.
//!
//! Operations that reference nodes or elements the model has not seen are
//! dropped without error, so patches may arrive late, early or twice.

pub mod api;
pub mod util;

use std::collections::HashSet;

use json_crdt_pack::PackValue;
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::nodes::rga::RgaError;
use super::nodes::{
    view_id, ArrNode, BinNode, ConNode, CrdtNode, NodeIndex, ObjNode, StrNode, ValNode, VecNode,
};
use crate::json_crdt_patch::clock::{Clock, ClockError, ClockVector, ServerClockVector, Ts, Tss};
use crate::json_crdt_patch::constants::{ORIGIN, UNDEFINED};
use crate::json_crdt_patch::enums::session;
use crate::json_crdt_patch::operations::{ConValue, Op};
use crate::json_crdt_patch::patch::Patch;
use crate::json_crdt_patch::patch_builder::PatchBuilder;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error(transparent)]
    Rga(#[from] RgaError),
    #[error("node {0} not found")]
    NotFound(Ts),
    #[error("nothing at path step {depth}")]
    PathNotFound { depth: usize },
    #[error("node {id} is {found}, expected {expected}")]
    WrongKind {
        id: Ts,
        expected: &'static str,
        found: &'static str,
    },
}

/// One step of a [`Model::find`] path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

impl From<&str> for PathStep {
    fn from(key: &str) -> Self {
        PathStep::Key(key.to_owned())
    }
}

impl From<String> for PathStep {
    fn from(key: String) -> Self {
        PathStep::Key(key)
    }
}

impl From<usize> for PathStep {
    fn from(index: usize) -> Self {
        PathStep::Index(index)
    }
}

/// In-memory JSON CRDT document.
///
/// `Clone` gives a second handle on the same session; [`fork`](Model::fork)
/// gives an independent replica with its own session.
#[derive(Debug, Clone)]
pub struct Model {
    root: ValNode,
    index: NodeIndex,
    clock: Clock,
    /// Ids removed by garbage collection; replayed creations stay dead.
    collected: HashSet<Ts>,
}

impl Model {
    /// Empty document writing as session `sid`.
    pub fn new(sid: u64) -> Self {
        Self::from_clock(ClockVector::new(sid, 1))
    }

    /// Empty document with a random session id.
    pub fn create() -> Self {
        Self::new(util::random_session_id())
    }

    /// Empty document whose times are assigned by a server, starting at
    /// `time`.
    pub fn with_server_clock(time: u64) -> Self {
        Self::from_clock(ServerClockVector::new(time))
    }

    pub fn from_clock(clock: impl Into<Clock>) -> Self {
        let mut index = NodeIndex::new();
        index.insert(
            UNDEFINED,
            CrdtNode::Con(ConNode::new(UNDEFINED, ConValue::Val(PackValue::Undefined))),
        );
        Self {
            root: ValNode::new(ORIGIN, UNDEFINED),
            index,
            clock: clock.into(),
            collected: HashSet::new(),
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn sid(&self) -> u64 {
        self.clock.sid()
    }

    /// The root register.
    pub fn root(&self) -> &ValNode {
        &self.root
    }

    pub fn index(&self) -> &NodeIndex {
        &self.index
    }

    pub fn node(&self, id: Ts) -> Option<&CrdtNode> {
        self.index.get(&id)
    }

    /// Plain value of the whole document; `undefined` when empty.
    pub fn view(&self) -> PackValue {
        view_id(&self.index, self.root.val)
    }

    /// Deep copy writing as session `sid`.
    pub fn fork(&self, sid: u64) -> Model {
        let mut model = self.clone();
        model.clock = self.clock.fork(sid);
        model
    }

    /// Builder over a copy of the model clock. Hand it back to
    /// [`commit`](Model::commit) once the edit is described.
    pub fn api_builder(&self) -> PatchBuilder {
        PatchBuilder::from_clock(self.clock.clone())
    }

    /// Applies everything `builder` accumulated and returns the patch for
    /// transmission.
    pub fn commit(&mut self, builder: &mut PatchBuilder) -> Result<Patch, ModelError> {
        let patch = builder.flush();
        self.apply_patch(&patch)?;
        Ok(patch)
    }

    /// Resolves a path of map keys and tuple or array indices starting at
    /// the root. Registers along the way are followed to their values.
    pub fn find(&self, path: &[PathStep]) -> Result<&CrdtNode, ModelError> {
        let mut node = self.resolve(self.root.val)?;
        for (depth, step) in path.iter().enumerate() {
            let child = match (node, step) {
                (CrdtNode::Obj(obj), PathStep::Key(key)) => obj.get(key),
                (CrdtNode::Vec(vec), PathStep::Index(index)) => vec.get(*index),
                (CrdtNode::Arr(arr), PathStep::Index(index)) => arr.values().get(*index).copied(),
                (node, step) => {
                    return Err(ModelError::WrongKind {
                        id: node.id(),
                        expected: match step {
                            PathStep::Key(_) => "obj",
                            PathStep::Index(_) => "vec or arr",
                        },
                        found: node.name(),
                    })
                }
            };
            let child = child.ok_or(ModelError::PathNotFound { depth })?;
            node = self.resolve(child)?;
        }
        Ok(node)
    }

    fn resolve(&self, mut id: Ts) -> Result<&CrdtNode, ModelError> {
        loop {
            match self.index.get(&id) {
                Some(CrdtNode::Val(reg)) => id = reg.val,
                Some(node) => return Ok(node),
                None => return Err(ModelError::NotFound(id)),
            }
        }
    }

    /// Applies every operation of `patch` in order.
    ///
    /// The whole patch is validated against a copy of the clock first, so
    /// a rejected patch leaves the model untouched.
    pub fn apply_patch(&mut self, patch: &Patch) -> Result<(), ModelError> {
        let mut clock = self.clock.clone();
        for op in &patch.ops {
            if let Err(err) = clock.observe(op.id(), op.span()) {
                warn!(%err, id = %op.id(), "rejecting patch");
                return Err(err.into());
            }
        }
        for op in &patch.ops {
            self.apply_operation(op)?;
        }
        Ok(())
    }

    pub fn apply_operation(&mut self, op: &Op) -> Result<(), ModelError> {
        if let Err(err) = self.clock.observe(op.id(), op.span()) {
            warn!(%err, id = %op.id(), "rejecting operation");
            return Err(err.into());
        }
        trace!(op = op.name(), id = %op.id(), span = op.span(), "apply");
        match op {
            Op::NewCon { id, val } => {
                self.insert_node(*id, || CrdtNode::Con(ConNode::new(*id, val.clone())))
            }
            Op::NewVal { id } => self.insert_node(*id, || CrdtNode::Val(ValNode::new(*id, UNDEFINED))),
            Op::NewObj { id } => self.insert_node(*id, || CrdtNode::Obj(ObjNode::new(*id))),
            Op::NewVec { id } => self.insert_node(*id, || CrdtNode::Vec(VecNode::new(*id))),
            Op::NewStr { id } => self.insert_node(*id, || CrdtNode::Str(StrNode::new(*id))),
            Op::NewBin { id } => self.insert_node(*id, || CrdtNode::Bin(BinNode::new(*id))),
            Op::NewArr { id } => self.insert_node(*id, || CrdtNode::Arr(ArrNode::new(*id))),
            Op::InsVal { obj, val, .. } => self.set_val(*obj, *val),
            Op::InsObj { obj, data, .. } => self.ins_obj(*obj, data),
            Op::InsVec { obj, data, .. } => self.ins_vec(*obj, data),
            Op::InsStr {
                id,
                obj,
                after,
                data,
            } => match self.index.get_mut(obj) {
                Some(CrdtNode::Str(node)) => {
                    if !node.rga.ins(*after, *id, data.clone()) {
                        debug!(%obj, %after, "dropping ins_str: unknown anchor");
                    }
                }
                _ => debug!(%obj, "dropping ins_str: no such string"),
            },
            Op::InsBin {
                id,
                obj,
                after,
                data,
            } => match self.index.get_mut(obj) {
                Some(CrdtNode::Bin(node)) => {
                    if !node.rga.ins(*after, *id, data.clone()) {
                        debug!(%obj, %after, "dropping ins_bin: unknown anchor");
                    }
                }
                _ => debug!(%obj, "dropping ins_bin: no such binary"),
            },
            Op::InsArr {
                id,
                obj,
                after,
                data,
            } => self.ins_arr(*id, *obj, *after, data),
            Op::UpdArr { obj, after, val, .. } => self.upd_arr(*obj, *after, *val),
            Op::Del { obj, what, .. } => self.del(*obj, what),
            Op::Nop { .. } => {}
        }
        Ok(())
    }

    fn insert_node(&mut self, id: Ts, node: impl FnOnce() -> CrdtNode) {
        if self.index.contains_key(&id) || self.collected.contains(&id) {
            return;
        }
        self.index.insert(id, node());
    }

    fn set_val(&mut self, obj: Ts, val: Ts) {
        if !self.index.contains_key(&val) {
            debug!(%obj, %val, "dropping ins_val: unknown value");
            return;
        }
        let reg = if obj == ORIGIN {
            &mut self.root
        } else {
            match self.index.get_mut(&obj) {
                Some(CrdtNode::Val(reg)) => reg,
                _ => {
                    debug!(%obj, "dropping ins_val: no such register");
                    return;
                }
            }
        };
        if let Some(old) = reg.set(val) {
            self.gc(old);
        }
    }

    fn ins_obj(&mut self, obj: Ts, data: &[(String, Ts)]) {
        let known: Vec<bool> = data.iter().map(|(_, val)| self.index.contains_key(val)).collect();
        let Some(CrdtNode::Obj(node)) = self.index.get_mut(&obj) else {
            debug!(%obj, "dropping ins_obj: no such object");
            return;
        };
        let mut garbage = Vec::new();
        for ((key, val), known) in data.iter().zip(known) {
            if !known || val.time <= node.id.time {
                debug!(%obj, key = key.as_str(), %val, "skipping ins_obj entry");
                continue;
            }
            if let Some(Some(old)) = node.put(key, *val) {
                garbage.push(old);
            }
        }
        for old in garbage {
            self.gc(old);
        }
    }

    fn ins_vec(&mut self, obj: Ts, data: &[(u8, Ts)]) {
        let known: Vec<bool> = data.iter().map(|(_, val)| self.index.contains_key(val)).collect();
        let Some(CrdtNode::Vec(node)) = self.index.get_mut(&obj) else {
            debug!(%obj, "dropping ins_vec: no such tuple");
            return;
        };
        let mut garbage = Vec::new();
        for ((slot, val), known) in data.iter().zip(known) {
            if !known || val.time <= node.id.time {
                debug!(%obj, slot, %val, "skipping ins_vec entry");
                continue;
            }
            if let Some(Some(old)) = node.put(*slot, *val) {
                garbage.push(old);
            }
        }
        for old in garbage {
            self.gc(old);
        }
    }

    fn ins_arr(&mut self, id: Ts, obj: Ts, after: Ts, data: &[Ts]) {
        // Elements may only point at nodes newer than the array.
        if !data.iter().all(|val| newer_than(*val, obj)) {
            debug!(%obj, "dropping ins_arr: element older than array");
            return;
        }
        match self.index.get_mut(&obj) {
            Some(CrdtNode::Arr(node)) => {
                if !node.rga.ins(after, id, data.to_vec()) {
                    debug!(%obj, %after, "dropping ins_arr: unknown anchor");
                }
            }
            _ => debug!(%obj, "dropping ins_arr: no such array"),
        }
    }

    fn upd_arr(&mut self, obj: Ts, after: Ts, val: Ts) {
        if !self.index.contains_key(&val) || !newer_than(val, obj) {
            debug!(%obj, %val, "dropping upd_arr: unusable value");
            return;
        }
        let Some(CrdtNode::Arr(node)) = self.index.get_mut(&obj) else {
            debug!(%obj, "dropping upd_arr: no such array");
            return;
        };
        if let Some(old) = node.rga.upd(after, val) {
            self.gc(old);
        }
    }

    fn del(&mut self, obj: Ts, what: &[Tss]) {
        let (unknown, garbage) = match self.index.get_mut(&obj) {
            Some(CrdtNode::Str(node)) => (node.rga.delete(what).unknown, Vec::new()),
            Some(CrdtNode::Bin(node)) => (node.rga.delete(what).unknown, Vec::new()),
            Some(CrdtNode::Arr(node)) => {
                let removed = node.rga.delete(what);
                (removed.unknown, removed.data.concat())
            }
            _ => {
                debug!(%obj, "dropping del: no such sequence");
                return;
            }
        };
        if unknown > 0 {
            debug!(%obj, unknown, "del: part of the range is unknown");
        }
        for old in garbage {
            self.gc(old);
        }
    }

    /// Removes the subtree rooted at `id` from the index. System nodes are
    /// shared and never removed.
    fn gc(&mut self, id: Ts) {
        let mut stack = vec![id];
        let mut removed = 0usize;
        while let Some(next) = stack.pop() {
            if next.sid == session::SYSTEM {
                continue;
            }
            let Some(node) = self.index.remove(&next) else {
                continue;
            };
            self.collected.insert(next);
            removed += 1;
            stack.extend(node.children());
        }
        if removed > 0 {
            debug!(root = %id, removed, "collected subtree");
        }
    }
}

fn newer_than(val: Ts, container: Ts) -> bool {
    val.sid == session::SYSTEM || val.time > container.time
}

/// Equal root, index and clock. Chunk layout inside sequences is ignored.
impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.index == other.index && self.clock == other.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_crdt_patch::clock::{ts, tss};
    use serde_json::json;

    #[test]
    fn empty_model_views_undefined() {
        let model = Model::new(0x10000);
        assert_eq!(model.view(), PackValue::Undefined);
        assert!(model.node(UNDEFINED).is_some());
    }

    #[test]
    fn set_root_to_constant() {
        let mut model = Model::new(0x10000);
        let mut b = model.api_builder();
        let t = b.con(true);
        b.root(t);
        model.commit(&mut b).unwrap();
        assert_eq!(model.view(), json!(true));
    }

    #[test]
    fn applying_advances_clock() {
        let mut model = Model::new(0x10000);
        let mut b = PatchBuilder::new(0x20000, 40);
        b.con(1);
        model.apply_patch(&b.flush()).unwrap();
        assert_eq!(model.clock().time(), 41);
        assert_eq!(model.clock().peers().next(), Some(ts(0x20000, 40)));
    }

    #[test]
    fn overwrite_collects_old_subtree() {
        let mut model = Model::new(0x10000);
        let mut b = model.api_builder();
        let first = b.json_set_root(&json!({"a": [1, "x"]}).into());
        model.commit(&mut b).unwrap();
        let before = model.index().len();
        assert_eq!(before, 1 + 4);
        let mut b = model.api_builder();
        b.json_set_root(&json!(2).into());
        model.commit(&mut b).unwrap();
        assert_eq!(model.view(), json!(2));
        assert!(model.node(first).is_none());
        assert_eq!(model.index().len(), 2);
    }

    #[test]
    fn map_overwrite_collects_old_value() {
        let mut model = Model::new(0x10000);
        let mut b = model.api_builder();
        let obj = b.json_set_root(&json!({"k": "old"}).into());
        model.commit(&mut b).unwrap();
        let old = match model.node(obj) {
            Some(CrdtNode::Obj(node)) => node.get("k").unwrap(),
            other => panic!("unexpected {other:?}"),
        };
        let mut b = model.api_builder();
        let new = b.con("new");
        b.ins_obj(obj, vec![("k".into(), new)]);
        model.commit(&mut b).unwrap();
        assert_eq!(model.view(), json!({"k": "new"}));
        assert!(model.node(old).is_none());
    }

    #[test]
    fn register_write_with_missing_value_is_dropped() {
        let mut model = Model::new(0x10000);
        let mut b = PatchBuilder::new(0x20000, 1);
        b.root(ts(0x30000, 5));
        model.apply_patch(&b.flush()).unwrap();
        assert_eq!(model.view(), PackValue::Undefined);
    }

    #[test]
    fn map_rejects_values_older_than_map() {
        let mut model = Model::new(0x10000);
        let mut b = model.api_builder();
        let early = b.con(1);
        let obj = b.obj();
        b.ins_obj(obj, vec![("a".into(), early)]);
        b.root(obj);
        model.commit(&mut b).unwrap();
        assert_eq!(model.view(), json!({}));
    }

    #[test]
    fn array_rejects_elements_older_than_array() {
        let mut model = Model::new(0x10000);
        let mut b = model.api_builder();
        let early = b.con(1);
        let arr = b.arr();
        b.ins_arr(arr, arr, vec![early]);
        b.root(arr);
        model.commit(&mut b).unwrap();
        assert_eq!(model.view(), json!([]));
    }

    #[test]
    fn tuple_slots_and_holes() {
        let mut model = Model::new(0x10000);
        let mut b = model.api_builder();
        let vec = b.vec();
        let x = b.con("x");
        b.ins_vec(vec, vec![(1, x)]);
        b.root(vec);
        model.commit(&mut b).unwrap();
        assert_eq!(
            model.view(),
            PackValue::Array(vec![PackValue::Undefined, "x".into()])
        );
    }

    #[test]
    fn string_insert_and_delete() {
        let mut model = Model::new(0x10000);
        let mut b = model.api_builder();
        let s = b.str();
        b.ins_str(s, s, "abc");
        b.root(s);
        model.commit(&mut b).unwrap();
        let mid = match model.node(s) {
            Some(CrdtNode::Str(node)) => node.rga.find_id(1).unwrap(),
            other => panic!("unexpected {other:?}"),
        };
        let mut b = model.api_builder();
        b.del(s, vec![tss(mid.sid, mid.time, 1)]);
        model.commit(&mut b).unwrap();
        assert_eq!(model.view(), json!("ac"));
    }

    #[test]
    fn array_delete_collects_element_values() {
        let mut model = Model::new(0x10000);
        let mut b = model.api_builder();
        let arr = b.json_set_root(&json!([{"deep": "x"}, 2]).into());
        model.commit(&mut b).unwrap();
        let first = model.find(&[PathStep::Index(0)]).unwrap().id();
        let elem = match model.node(arr) {
            Some(CrdtNode::Arr(node)) => node.rga.find_id(0).unwrap(),
            other => panic!("unexpected {other:?}"),
        };
        let mut b = model.api_builder();
        b.del(arr, vec![tss(elem.sid, elem.time, 1)]);
        model.commit(&mut b).unwrap();
        assert_eq!(model.view(), json!([2]));
        assert!(model.node(first).is_none());
    }

    #[test]
    fn upd_arr_replaces_element() {
        let mut model = Model::new(0x10000);
        let mut b = model.api_builder();
        let arr = b.json_set_root(&json!([1, 2]).into());
        model.commit(&mut b).unwrap();
        let elem = match model.node(arr) {
            Some(CrdtNode::Arr(node)) => node.rga.find_id(1).unwrap(),
            other => panic!("unexpected {other:?}"),
        };
        let old = model.find(&[PathStep::Index(1)]).unwrap().id();
        let mut b = model.api_builder();
        let val = b.con("two");
        b.upd_arr(arr, elem, val);
        model.commit(&mut b).unwrap();
        assert_eq!(model.view(), json!([1, "two"]));
        assert!(model.node(old).is_none());
    }

    #[test]
    fn find_walks_keys_and_indices() {
        let mut model = Model::new(0x10000);
        let mut b = model.api_builder();
        b.json_set_root(&json!({"doc": {"items": ["a", {"b": true}]}}).into());
        model.commit(&mut b).unwrap();
        let node = model
            .find(&["doc".into(), "items".into(), PathStep::Index(1), "b".into()])
            .unwrap();
        assert_eq!(node.view(model.index()), json!(true));
        assert_eq!(
            model.find(&["doc".into(), "nope".into()]),
            Err(ModelError::PathNotFound { depth: 1 })
        );
        assert!(matches!(
            model.find(&["doc".into(), PathStep::Index(0)]),
            Err(ModelError::WrongKind { found: "obj", .. })
        ));
    }

    #[test]
    fn find_follows_registers() {
        let mut model = Model::new(0x10000);
        let mut b = model.api_builder();
        let obj = b.obj();
        let reg = b.json_val(&json!("v").into());
        b.ins_obj(obj, vec![("r".into(), reg)]);
        b.root(obj);
        model.commit(&mut b).unwrap();
        assert_eq!(model.view(), json!({"r": "v"}));
        assert_eq!(model.find(&["r".into()]).unwrap().name(), "str");
    }

    #[test]
    fn fork_writes_as_new_session() {
        let mut model = Model::new(0x10000);
        let mut b = model.api_builder();
        b.json_set_root(&json!([1]).into());
        model.commit(&mut b).unwrap();
        let fork = model.fork(0x20000);
        assert_eq!(fork.sid(), 0x20000);
        assert_eq!(fork.view(), model.view());
        assert_eq!(fork.clock().time(), model.clock().time());
        let clone = model.clone();
        assert_eq!(clone, model);
    }

    #[test]
    fn server_clock_rejects_foreign_sessions() {
        let mut model = Model::with_server_clock(1);
        let mut b = PatchBuilder::new(0x10000, 1);
        b.json_set_root(&json!(1).into());
        let err = model.apply_patch(&b.flush()).unwrap_err();
        assert_eq!(err, ModelError::Clock(ClockError::ForeignSession { sid: 0x10000 }));
        assert_eq!(model.view(), PackValue::Undefined);
    }

    #[test]
    fn server_clock_rejects_whole_patch_from_the_future() {
        let mut model = Model::with_server_clock(1);
        let mut b = model.api_builder();
        b.con(1);
        b.clock.tick(10);
        b.pad();
        let patch = b.flush();
        // Shift the tail past the server time.
        let mut bad = patch.clone();
        let con = PatchBuilder::new(session::SERVER, 50).con(3);
        bad.ops.push(Op::NewCon {
            id: con,
            val: ConValue::Val(3.into()),
        });
        assert!(matches!(
            model.apply_patch(&bad),
            Err(ModelError::Clock(ClockError::TimeTravel { .. }))
        ));
        assert!(model.node(ts(session::SERVER, 1)).is_none());
        model.apply_patch(&patch).unwrap();
        assert!(model.node(ts(session::SERVER, 1)).is_some());
    }

    #[test]
    fn ids_past_the_time_domain_reject_the_whole_patch() {
        let mut model = Model::new(0x20000);
        let mut b = model.api_builder();
        b.json_set_root(&json!({"a": 1}).into());
        model.commit(&mut b).unwrap();
        let before = model.clone();

        let mut b = PatchBuilder::new(0x30000, 1);
        b.con(7);
        let mut patch = b.flush();
        patch.ops.push(Op::NewCon {
            id: ts(0x30000, 1 << 56),
            val: ConValue::Val(8.into()),
        });
        assert_eq!(
            model.apply_patch(&patch),
            Err(ModelError::Clock(ClockError::Overflow))
        );
        assert_eq!(model, before);
        assert!(model.node(ts(0x30000, 1)).is_none());

        let mut b = model.api_builder();
        let one = b.con(1);
        b.root(one);
        model.commit(&mut b).unwrap();
        assert_eq!(model.view(), json!(1));
    }

    #[test]
    fn server_clock_commits_local_edits() {
        let mut model = Model::with_server_clock(5);
        let mut b = model.api_builder();
        b.json_set_root(&json!({"n": 1}).into());
        let patch = model.commit(&mut b).unwrap();
        assert_eq!(patch.get_id(), Some(ts(session::SERVER, 5)));
        assert_eq!(model.view(), json!({"n": 1}));
        assert_eq!(model.fork(0x20000).sid(), session::SERVER);
    }
}
