//! Undo Manager: bounded snapshot-based undo/redo over the Layer Manager.
//!
//! DESIGN
//! ======
//! Entries hold [`LayerSnapshot`]s, never references into the manager, so
//! later edits to a live layer cannot rewrite history. Local bytes are shared
//! as `Arc<[u8]>`; they are immutable, so sharing them is equivalent to a
//! deep copy.
//!
//! `push` appends to the undo stack and always empties the redo stack. The
//! undo stack is a `VecDeque` capped at `capacity`; the oldest entry is
//! evicted first. An entry moves to the opposite stack only if applying it
//! succeeded; a failed entry is dropped.

use std::collections::VecDeque;

use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::layers::{LayerId, LayerManager, LayerSnapshot, Side};

#[cfg(test)]
#[path = "undo_test.rs"]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoKind {
    LayerAdd,
    LayerDelete,
    LayerModify,
    LayerReorder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    pub kind: UndoKind,
    pub layer_id: LayerId,
    pub side: Side,
    pub before: Option<LayerSnapshot>,
    pub after: Option<LayerSnapshot>,
    pub from_index: Option<usize>,
    pub to_index: Option<usize>,
    pub timestamp: OffsetDateTime,
}

impl UndoEntry {
    /// A layer was added; `after` is its state right after creation.
    #[must_use]
    pub fn add(after: LayerSnapshot) -> Self {
        Self::new(UndoKind::LayerAdd, after.id.clone(), after.side, None, Some(after))
    }

    /// A layer was removed; `before` is its state right before removal.
    #[must_use]
    pub fn delete(before: LayerSnapshot) -> Self {
        Self::new(UndoKind::LayerDelete, before.id.clone(), before.side, Some(before), None)
    }

    #[must_use]
    pub fn modify(before: LayerSnapshot, after: LayerSnapshot) -> Self {
        Self::new(UndoKind::LayerModify, before.id.clone(), before.side, Some(before), Some(after))
    }

    #[must_use]
    pub fn reorder(layer_id: impl Into<LayerId>, side: Side, from: usize, to: usize) -> Self {
        Self {
            from_index: Some(from),
            to_index: Some(to),
            ..Self::new(UndoKind::LayerReorder, layer_id.into(), side, None, None)
        }
    }

    fn new(
        kind: UndoKind,
        layer_id: LayerId,
        side: Side,
        before: Option<LayerSnapshot>,
        after: Option<LayerSnapshot>,
    ) -> Self {
        Self {
            kind,
            layer_id,
            side,
            before,
            after,
            from_index: None,
            to_index: None,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

pub struct UndoManager {
    undo: VecDeque<UndoEntry>,
    redo: Vec<UndoEntry>,
    capacity: usize,
}

impl UndoManager {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { undo: VecDeque::with_capacity(capacity), redo: Vec::new(), capacity }
    }

    pub fn push(&mut self, entry: UndoEntry) {
        debug!(kind = ?entry.kind, layer_id = %entry.layer_id, "undo: push");
        self.redo.clear();
        self.undo.push_back(entry);
        while self.undo.len() > self.capacity {
            self.undo.pop_front();
        }
    }

    /// Revert the most recent entry. Returns whether anything changed.
    pub fn undo(&mut self, layers: &mut LayerManager) -> bool {
        let Some(entry) = self.undo.pop_back() else {
            return false;
        };
        if revert(layers, &entry) {
            debug!(kind = ?entry.kind, layer_id = %entry.layer_id, "undo: reverted");
            self.redo.push(entry);
            true
        } else {
            warn!(kind = ?entry.kind, layer_id = %entry.layer_id, "undo: entry no longer applies, dropped");
            false
        }
    }

    /// Replay the most recently undone entry.
    pub fn redo(&mut self, layers: &mut LayerManager) -> bool {
        let Some(entry) = self.redo.pop() else {
            return false;
        };
        if replay(layers, &entry) {
            debug!(kind = ?entry.kind, layer_id = %entry.layer_id, "undo: replayed");
            self.undo.push_back(entry);
            true
        } else {
            warn!(kind = ?entry.kind, layer_id = %entry.layer_id, "undo: redo entry no longer applies, dropped");
            false
        }
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &UndoEntry> {
        self.undo.iter()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Snapshot a layer for a later `modify` or `delete` entry.
    #[must_use]
    pub fn capture_snapshot(layers: &LayerManager, id: &str) -> Option<LayerSnapshot> {
        layers.snapshot(id)
    }
}

fn revert(layers: &mut LayerManager, entry: &UndoEntry) -> bool {
    match entry.kind {
        UndoKind::LayerAdd => layers.remove_layer(&entry.layer_id),
        UndoKind::LayerDelete => entry.before.as_ref().is_some_and(|s| layers.recreate_from_snapshot(s)),
        UndoKind::LayerModify => entry.before.as_ref().is_some_and(|s| layers.apply_snapshot(s)),
        UndoKind::LayerReorder => match (entry.from_index, entry.to_index) {
            (Some(from), Some(to)) => layers.reorder_within(entry.side, to, from),
            _ => false,
        },
    }
}

fn replay(layers: &mut LayerManager, entry: &UndoEntry) -> bool {
    match entry.kind {
        UndoKind::LayerAdd => entry.after.as_ref().is_some_and(|s| layers.recreate_from_snapshot(s)),
        UndoKind::LayerDelete => layers.remove_layer(&entry.layer_id),
        UndoKind::LayerModify => entry.after.as_ref().is_some_and(|s| layers.apply_snapshot(s)),
        UndoKind::LayerReorder => match (entry.from_index, entry.to_index) {
            (Some(from), Some(to)) => layers.reorder_within(entry.side, from, to),
            _ => false,
        },
    }
}
