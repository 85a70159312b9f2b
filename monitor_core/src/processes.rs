//! Server process health with stable first-seen color assignment.

use std::collections::BTreeMap;

use monitor_proto::{ProcessHealthUpdate, ServerId, WorldId};

use crate::events::ChangeEvent;
use crate::palette::{Palette, Rgba};

pub type ProcessEvent = ChangeEvent<ServerProcess>;

#[derive(Debug, Clone, PartialEq)]
pub struct ServerProcess {
    pub server_id: ServerId,
    pub address: String,
    pub is_online: bool,
    pub scene_id: String,
    pub pid: u32,
    pub host_name: String,
    /// Assigned once when the id is first seen.
    pub color: Rgba,
}

#[derive(Debug, Default)]
pub struct ProcessHealthStore {
    world: Option<WorldId>,
    processes: BTreeMap<ServerId, ServerProcess>,
    palette: Palette,
    next_color: usize,
}

impl ProcessHealthStore {
    pub fn new(palette: Palette) -> Self {
        Self {
            palette,
            ..Self::default()
        }
    }

    pub fn world(&self) -> Option<WorldId> {
        self.world
    }

    pub fn get(&self, server_id: ServerId) -> Option<&ServerProcess> {
        self.processes.get(&server_id)
    }

    pub fn color_of(&self, server_id: ServerId) -> Option<Rgba> {
        self.processes.get(&server_id).map(|process| process.color)
    }

    /// Processes ordered by server id.
    pub fn iter(&self) -> impl Iterator<Item = &ServerProcess> {
        self.processes.values()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn online_count(&self) -> usize {
        self.processes.values().filter(|p| p.is_online).count()
    }

    pub fn apply(&mut self, update: &ProcessHealthUpdate) -> Option<ProcessEvent> {
        match self.processes.get_mut(&update.server_id) {
            Some(existing) => {
                let current = ServerProcess {
                    server_id: update.server_id,
                    address: update.address.clone(),
                    is_online: update.is_online,
                    scene_id: update.scene_id.clone(),
                    pid: update.pid,
                    host_name: update.host_name.clone(),
                    color: existing.color,
                };
                if *existing == current {
                    return None;
                }
                let previous = std::mem::replace(existing, current.clone());
                if previous.is_online != current.is_online {
                    tracing::info!(
                        target: "cluster_monitor::processes",
                        server = current.server_id,
                        online = current.is_online,
                        "process.online_changed"
                    );
                }
                Some(ChangeEvent::Updated { current, previous })
            }
            None => {
                let color = self.palette.color_for(self.next_color);
                self.next_color += 1;
                let process = ServerProcess {
                    server_id: update.server_id,
                    address: update.address.clone(),
                    is_online: update.is_online,
                    scene_id: update.scene_id.clone(),
                    pid: update.pid,
                    host_name: update.host_name.clone(),
                    color,
                };
                tracing::debug!(
                    target: "cluster_monitor::processes",
                    server = process.server_id,
                    host = %process.host_name,
                    color = %process.color,
                    "process.first_seen"
                );
                self.processes.insert(process.server_id, process.clone());
                Some(ChangeEvent::Created(process))
            }
        }
    }

    pub fn apply_batch(&mut self, batch: &[ProcessHealthUpdate]) -> Vec<ProcessEvent> {
        batch.iter().filter_map(|update| self.apply(update)).collect()
    }

    /// Clears processes and restarts color assignment from the first palette entry.
    pub fn reset(&mut self, world: WorldId) {
        self.processes.clear();
        self.next_color = 0;
        self.world = Some(world);
    }
}
