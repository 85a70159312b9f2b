//! Per-server region meshes merged from cell ownership.
//!
//! Membership is maintained incrementally from cell events; the geometry is
//! rebuilt in full once the debounce deadline passes, so a burst of cell
//! updates costs a single remesh.
//!
//! Region colors are assigned by the ordinal of each server among the servers
//! that own at least one cell at remesh time. A server gaining or losing its
//! last cell can therefore shift the colors of servers ordered after it.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use ahash::AHashMap;
use bevy::math::Vec2;
use monitor_proto::{CellKey, ServerId};

use crate::cells::{Cell, CellEvent};
use crate::events::ChangeEvent;
use crate::palette::{Palette, Rgba};

pub const DEFAULT_REMESH_DEBOUNCE: Duration = Duration::from_millis(250);
pub const DEFAULT_CELL_SIZE: f32 = 100.0;

/// Merged quads for every cell one server controls.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionMesh {
    pub server_id: ServerId,
    pub color: Rgba,
    pub cell_count: usize,
    pub vertices: Vec<Vec2>,
    /// Triangle list, two triangles per cell.
    pub indices: Vec<u32>,
}

impl RegionMesh {
    /// Axis-aligned bounds of the region, `(min, max)`.
    pub fn bounds(&self) -> Option<(Vec2, Vec2)> {
        let first = *self.vertices.first()?;
        Some(
            self.vertices
                .iter()
                .fold((first, first), |(min, max), v| (min.min(*v), max.max(*v))),
        )
    }
}

#[derive(Debug, Clone)]
pub struct RegionSettings {
    pub cell_size: f32,
    pub debounce: Duration,
    pub palette: Palette,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            debounce: DEFAULT_REMESH_DEBOUNCE,
            palette: Palette::default(),
        }
    }
}

#[derive(Debug)]
pub struct RegionAggregator {
    settings: RegionSettings,
    owned: BTreeMap<ServerId, BTreeSet<CellKey>>,
    owners_of: AHashMap<CellKey, BTreeSet<ServerId>>,
    deadline: Option<Duration>,
    regions: Vec<RegionMesh>,
    remesh_count: u64,
}

impl Default for RegionAggregator {
    fn default() -> Self {
        Self::new(RegionSettings::default())
    }
}

impl RegionAggregator {
    pub fn new(settings: RegionSettings) -> Self {
        Self {
            settings,
            owned: BTreeMap::new(),
            owners_of: AHashMap::new(),
            deadline: None,
            regions: Vec::new(),
            remesh_count: 0,
        }
    }

    /// Regions from the most recent remesh, ordered by server id.
    pub fn regions(&self) -> &[RegionMesh] {
        &self.regions
    }

    pub fn region_for(&self, server_id: ServerId) -> Option<&RegionMesh> {
        self.regions.iter().find(|region| region.server_id == server_id)
    }

    /// Cells currently owned by `server_id`, independent of remesh timing.
    pub fn cells_of(&self, server_id: ServerId) -> impl Iterator<Item = &CellKey> {
        self.owned.get(&server_id).into_iter().flatten()
    }

    pub fn owning_servers(&self) -> impl Iterator<Item = ServerId> + '_ {
        self.owned.keys().copied()
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn remesh_count(&self) -> u64 {
        self.remesh_count
    }

    pub fn on_cell_event(&mut self, event: &CellEvent, now: Duration) {
        let changed = match event {
            ChangeEvent::Created(cell) | ChangeEvent::Updated { current: cell, .. } => {
                self.set_owners(cell.key, &cell.controlling_servers)
            }
            ChangeEvent::Deleted(cell) => self.set_owners(cell.key, &BTreeSet::new()),
        };
        if changed {
            self.schedule(now);
        }
    }

    /// Replace all membership from a full cell listing.
    pub fn rebuild_from<'a>(&mut self, cells: impl IntoIterator<Item = &'a Cell>, now: Duration) {
        self.owned.clear();
        self.owners_of.clear();
        for cell in cells {
            self.set_owners(cell.key, &cell.controlling_servers);
        }
        self.schedule(now);
    }

    /// Remesh if the debounce deadline has passed. Returns whether it ran.
    pub fn poll(&mut self, now: Duration) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.remesh();
                true
            }
            _ => false,
        }
    }

    /// Remesh immediately, regardless of the deadline.
    pub fn flush(&mut self) {
        self.remesh();
    }

    pub fn cancel_pending(&mut self) {
        self.deadline = None;
    }

    /// Drop all membership, geometry, and any pending remesh.
    pub fn reset(&mut self) {
        self.owned.clear();
        self.owners_of.clear();
        self.regions.clear();
        self.deadline = None;
    }

    fn schedule(&mut self, now: Duration) {
        self.deadline = Some(now + self.settings.debounce);
    }

    fn set_owners(&mut self, key: CellKey, owners: &BTreeSet<ServerId>) -> bool {
        let previous = self.owners_of.get(&key).cloned().unwrap_or_default();
        if previous == *owners {
            return false;
        }
        for server in previous.difference(owners) {
            if let Some(cells) = self.owned.get_mut(server) {
                cells.remove(&key);
                if cells.is_empty() {
                    self.owned.remove(server);
                }
            }
        }
        for server in owners.difference(&previous) {
            self.owned.entry(*server).or_default().insert(key);
        }
        if owners.is_empty() {
            self.owners_of.remove(&key);
        } else {
            self.owners_of.insert(key, owners.clone());
        }
        true
    }

    fn remesh(&mut self) {
        let size = self.settings.cell_size;
        self.regions = self
            .owned
            .iter()
            .filter(|(_, cells)| !cells.is_empty())
            .enumerate()
            .map(|(ordinal, (server_id, cells))| {
                let mut vertices = Vec::with_capacity(cells.len() * 4);
                let mut indices = Vec::with_capacity(cells.len() * 6);
                for key in cells {
                    let base = vertices.len() as u32;
                    let origin = Vec2::new(key.x as f32, key.z as f32);
                    vertices.extend_from_slice(&[
                        origin,
                        origin + Vec2::new(size, 0.0),
                        origin + Vec2::new(size, size),
                        origin + Vec2::new(0.0, size),
                    ]);
                    indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
                }
                RegionMesh {
                    server_id: *server_id,
                    color: self.settings.palette.color_for(ordinal),
                    cell_count: cells.len(),
                    vertices,
                    indices,
                }
            })
            .collect();
        self.deadline = None;
        self.remesh_count += 1;
        tracing::debug!(
            target: "cluster_monitor::regions",
            regions = self.regions.len(),
            remesh = self.remesh_count,
            "regions.remeshed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(x: i32, z: i32, servers: &[ServerId]) -> Cell {
        Cell {
            key: CellKey::new(x, z),
            controlling_servers: servers.iter().copied().collect(),
            is_loaded: true,
            subscriber_count: 0,
        }
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn burst_coalesces_into_one_remesh() {
        let mut regions = RegionAggregator::default();
        regions.on_cell_event(&ChangeEvent::Created(cell(0, 0, &[1])), ms(0));
        regions.on_cell_event(&ChangeEvent::Created(cell(100, 0, &[1])), ms(100));
        regions.on_cell_event(&ChangeEvent::Created(cell(0, 100, &[2])), ms(200));

        assert!(!regions.poll(ms(300)));
        assert!(regions.regions().is_empty());
        assert!(regions.poll(ms(450)));
        assert_eq!(regions.remesh_count(), 1);
        assert!(!regions.poll(ms(1000)));

        let first = regions.region_for(1).unwrap();
        assert_eq!(first.cell_count, 2);
        assert_eq!(first.vertices.len(), 8);
        assert_eq!(first.indices.len(), 12);
        assert_eq!(
            first.bounds(),
            Some((Vec2::new(0.0, 0.0), Vec2::new(200.0, 100.0)))
        );

        let second = regions.region_for(2).unwrap();
        assert_eq!(second.cell_count, 1);
        assert_ne!(first.color, second.color);
    }

    #[test]
    fn handoff_overlap_counts_for_both_servers() {
        let mut regions = RegionAggregator::default();
        regions.on_cell_event(&ChangeEvent::Created(cell(0, 0, &[1, 2])), ms(0));
        regions.flush();
        assert_eq!(regions.regions().len(), 2);

        let previous = cell(0, 0, &[1, 2]);
        regions.on_cell_event(
            &ChangeEvent::Updated {
                current: cell(0, 0, &[2]),
                previous,
            },
            ms(10),
        );
        assert_eq!(regions.cells_of(1).count(), 0);
        assert_eq!(regions.cells_of(2).count(), 1);
        regions.flush();
        assert_eq!(regions.regions().len(), 1);
    }

    #[test]
    fn unchanged_ownership_does_not_schedule() {
        let mut regions = RegionAggregator::default();
        regions.on_cell_event(&ChangeEvent::Created(cell(0, 0, &[1])), ms(0));
        regions.flush();
        let mut reloaded = cell(0, 0, &[1]);
        reloaded.is_loaded = false;
        regions.on_cell_event(
            &ChangeEvent::Updated {
                current: reloaded,
                previous: cell(0, 0, &[1]),
            },
            ms(5),
        );
        assert!(!regions.is_pending());
    }

    #[test]
    fn ordinal_colors_shift_when_earlier_server_empties() {
        let palette = Palette::default();
        let mut regions = RegionAggregator::default();
        regions.on_cell_event(&ChangeEvent::Created(cell(0, 0, &[1])), ms(0));
        regions.on_cell_event(&ChangeEvent::Created(cell(100, 0, &[2])), ms(0));
        regions.flush();
        assert_eq!(regions.region_for(2).unwrap().color, palette.color_for(1));

        regions.on_cell_event(&ChangeEvent::Created(cell(0, 0, &[])), ms(1));
        regions.flush();
        assert_eq!(regions.region_for(2).unwrap().color, palette.color_for(0));
    }

    #[test]
    fn reset_cancels_pending_remesh() {
        let mut regions = RegionAggregator::default();
        regions.on_cell_event(&ChangeEvent::Created(cell(0, 0, &[1])), ms(0));
        regions.reset();
        assert!(!regions.is_pending());
        assert!(!regions.poll(ms(10_000)));
        assert_eq!(regions.owning_servers().count(), 0);
    }

    #[test]
    fn rebuild_from_listing() {
        let mut regions = RegionAggregator::default();
        let cells = [cell(0, 0, &[3]), cell(100, 100, &[3]), cell(0, 100, &[])];
        regions.rebuild_from(cells.iter(), ms(0));
        assert!(regions.poll(ms(250)));
        assert_eq!(regions.regions().len(), 1);
        assert_eq!(regions.region_for(3).unwrap().cell_count, 2);
    }
}
