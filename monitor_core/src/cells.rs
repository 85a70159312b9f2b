//! Cell ownership state: which server processes control each grid cell.

use std::collections::BTreeSet;

use ahash::AHashMap;
use monitor_proto::{CellKey, CellStatusUpdate, ServerId, WorldId};

use crate::events::ChangeEvent;

pub type CellEvent = ChangeEvent<Cell>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub key: CellKey,
    /// More than one server may control a cell while it is being handed off.
    pub controlling_servers: BTreeSet<ServerId>,
    pub is_loaded: bool,
    pub subscriber_count: u32,
}

impl Cell {
    pub fn from_update(update: &CellStatusUpdate) -> Self {
        Self {
            key: update.cell,
            controlling_servers: update.controlling_servers.iter().copied().collect(),
            is_loaded: update.is_loaded,
            subscriber_count: update.subscriber_count,
        }
    }
}

#[derive(Debug, Default)]
pub struct CellStatusStore {
    world: Option<WorldId>,
    cells: AHashMap<CellKey, Cell>,
}

impl CellStatusStore {
    pub fn world(&self) -> Option<WorldId> {
        self.world
    }

    pub fn get(&self, key: CellKey) -> Option<&Cell> {
        self.cells.get(&key)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn loaded_count(&self) -> usize {
        self.cells.values().filter(|cell| cell.is_loaded).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    /// Upsert one cell. Re-delivery of an identical record produces no event.
    pub fn apply(&mut self, update: &CellStatusUpdate) -> Option<CellEvent> {
        let cell = Cell::from_update(update);
        match self.cells.insert(cell.key, cell.clone()) {
            None => Some(ChangeEvent::Created(cell)),
            Some(previous) if previous == cell => None,
            Some(previous) => Some(ChangeEvent::Updated {
                current: cell,
                previous,
            }),
        }
    }

    pub fn apply_batch(&mut self, batch: &[CellStatusUpdate]) -> Vec<CellEvent> {
        batch.iter().filter_map(|update| self.apply(update)).collect()
    }

    pub fn reset(&mut self, world: WorldId) {
        tracing::info!(
            target: "cluster_monitor::cells",
            %world,
            dropped = self.cells.len(),
            "cell_store.reset"
        );
        self.cells.clear();
        self.world = Some(world);
    }
}
