//! Position-based editing on top of [`Model`].
//!
//! Each helper translates positions into element ids with the RGA lookups,
//! builds a patch against the model clock, applies it and returns it for
//! transmission. A no-op edit (empty text, zero length) returns an empty
//! patch without ticking the clock.

use json_crdt_pack::PackValue;

use super::{Model, ModelError};
use crate::json_crdt::nodes::rga::{ChunkData, Rga, RgaError};
use crate::json_crdt::nodes::CrdtNode;
use crate::json_crdt_patch::clock::{Ts, Tss};
use crate::json_crdt_patch::patch::Patch;

impl Model {
    /// Inserts `text` so that its first character lands at `pos`.
    pub fn ins_str_at(&mut self, obj: Ts, pos: usize, text: &str) -> Result<Patch, ModelError> {
        let after = anchor(self.str_rga(obj)?, pos)?;
        if text.is_empty() {
            return Ok(Patch::new());
        }
        let mut builder = self.api_builder();
        builder.ins_str(obj, after, text);
        self.commit(&mut builder)
    }

    /// Deletes `len` characters starting at `pos`.
    pub fn del_str_at(&mut self, obj: Ts, pos: usize, len: usize) -> Result<Patch, ModelError> {
        let spans = self.str_rga(obj)?.find_id_span(pos, len)?;
        self.delete_spans(obj, spans)
    }

    pub fn ins_bin_at(&mut self, obj: Ts, pos: usize, data: &[u8]) -> Result<Patch, ModelError> {
        let after = anchor(self.bin_rga(obj)?, pos)?;
        if data.is_empty() {
            return Ok(Patch::new());
        }
        let mut builder = self.api_builder();
        builder.ins_bin(obj, after, data.to_vec());
        self.commit(&mut builder)
    }

    pub fn del_bin_at(&mut self, obj: Ts, pos: usize, len: usize) -> Result<Patch, ModelError> {
        let spans = self.bin_rga(obj)?.find_id_span(pos, len)?;
        self.delete_spans(obj, spans)
    }

    /// Inserts `values`, each built as a fresh node tree, starting at `pos`.
    pub fn ins_arr_at(
        &mut self,
        obj: Ts,
        pos: usize,
        values: &[PackValue],
    ) -> Result<Patch, ModelError> {
        let after = anchor(self.arr_rga(obj)?, pos)?;
        if values.is_empty() {
            return Ok(Patch::new());
        }
        let mut builder = self.api_builder();
        let ids = values.iter().map(|value| builder.json(value)).collect();
        builder.ins_arr(obj, after, ids);
        self.commit(&mut builder)
    }

    pub fn del_arr_at(&mut self, obj: Ts, pos: usize, len: usize) -> Result<Patch, ModelError> {
        let spans = self.arr_rga(obj)?.find_id_span(pos, len)?;
        self.delete_spans(obj, spans)
    }

    /// Replaces the value of the array element at `pos`.
    pub fn set_arr_at(
        &mut self,
        obj: Ts,
        pos: usize,
        value: &PackValue,
    ) -> Result<Patch, ModelError> {
        let elem = self.arr_rga(obj)?.find_id(pos)?;
        let mut builder = self.api_builder();
        let val = builder.json(value);
        builder.upd_arr(obj, elem, val);
        self.commit(&mut builder)
    }

    fn delete_spans(&mut self, obj: Ts, spans: Vec<Tss>) -> Result<Patch, ModelError> {
        if spans.is_empty() {
            return Ok(Patch::new());
        }
        let mut builder = self.api_builder();
        builder.del(obj, spans);
        self.commit(&mut builder)
    }

    fn str_rga(&self, id: Ts) -> Result<&Rga<String>, ModelError> {
        match self.node(id) {
            Some(CrdtNode::Str(node)) => Ok(&node.rga),
            other => Err(mismatch(id, "str", other)),
        }
    }

    fn bin_rga(&self, id: Ts) -> Result<&Rga<Vec<u8>>, ModelError> {
        match self.node(id) {
            Some(CrdtNode::Bin(node)) => Ok(&node.rga),
            other => Err(mismatch(id, "bin", other)),
        }
    }

    fn arr_rga(&self, id: Ts) -> Result<&Rga<Vec<Ts>>, ModelError> {
        match self.node(id) {
            Some(CrdtNode::Arr(node)) => Ok(&node.rga),
            other => Err(mismatch(id, "arr", other)),
        }
    }
}

fn mismatch(id: Ts, expected: &'static str, found: Option<&CrdtNode>) -> ModelError {
    match found {
        Some(node) => ModelError::WrongKind {
            id,
            expected,
            found: node.name(),
        },
        None => ModelError::NotFound(id),
    }
}

/// Element to insert after so that new content starts at `pos`.
fn anchor<T: ChunkData>(rga: &Rga<T>, pos: usize) -> Result<Ts, RgaError> {
    match pos {
        0 => Ok(rga.id),
        _ if pos > rga.size() => Err(RgaError::OutOfBounds {
            pos,
            len: rga.size(),
        }),
        _ => rga.find_id(pos - 1),
    }
}
