//! Canonical entity state reconciled from the at-least-once entity feed.

use ahash::AHashMap;
use bevy::math::Vec2;
use monitor_proto::{AiActivity, EntityUpdate, NetworkId, ServerId, WorldId};

use crate::events::ChangeEvent;
use crate::filter::{is_visible, VisibilityFilter};

pub type EntityEvent = ChangeEvent<Entity>;

/// Latest known state of one simulated entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entity {
    pub id: NetworkId,
    pub location: [f32; 3],
    pub object_type_tag: u32,
    pub template_crc: u32,
    pub interest_radius: f32,
    pub authoritative_server: ServerId,
    pub level: i32,
    pub hibernating: bool,
    pub ai_activity: AiActivity,
    pub creation_type: i32,
    /// Whether the entity passes the filter currently held by its store.
    pub visible: bool,
}

impl Entity {
    pub fn from_update(update: &EntityUpdate) -> Self {
        Self {
            id: update.id,
            location: update.location,
            object_type_tag: update.object_type_tag,
            template_crc: update.template_crc,
            interest_radius: update.interest_radius,
            authoritative_server: update.authoritative_server,
            level: update.level,
            hibernating: update.hibernating_counter > 0,
            ai_activity: update.ai_activity,
            creation_type: update.creation_type,
            visible: false,
        }
    }

    /// Position on the top-down map: world x and z.
    #[inline]
    pub fn map_position(&self) -> Vec2 {
        Vec2::new(self.location[0], self.location[2])
    }
}

#[derive(Debug, Default)]
pub struct EntityStore {
    world: Option<WorldId>,
    entities: AHashMap<NetworkId, Entity>,
    filter: VisibilityFilter,
    visible_count: usize,
}

impl EntityStore {
    pub fn new(filter: VisibilityFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn world(&self) -> Option<WorldId> {
        self.world
    }

    pub fn filter(&self) -> &VisibilityFilter {
        &self.filter
    }

    pub fn get(&self, id: NetworkId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn visible_count(&self) -> usize {
        self.visible_count
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn visible(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(|entity| entity.visible)
    }

    /// Apply one feed record. Unknown ids on delete are ignored.
    pub fn apply(&mut self, update: &EntityUpdate) -> Option<EntityEvent> {
        if update.delete {
            let removed = self.entities.remove(&update.id)?;
            if removed.visible {
                self.visible_count -= 1;
                return Some(ChangeEvent::Deleted(removed));
            }
            return None;
        }

        let mut entity = Entity::from_update(update);
        entity.visible = is_visible(&entity, &self.filter);

        match self.entities.insert(entity.id, entity) {
            None => {
                if entity.visible {
                    self.visible_count += 1;
                    Some(ChangeEvent::Created(entity))
                } else {
                    None
                }
            }
            Some(previous) => match (previous.visible, entity.visible) {
                (true, true) => Some(ChangeEvent::Updated {
                    current: entity,
                    previous,
                }),
                (true, false) => {
                    self.visible_count -= 1;
                    Some(ChangeEvent::Deleted(entity))
                }
                (false, true) => {
                    self.visible_count += 1;
                    Some(ChangeEvent::Created(entity))
                }
                (false, false) => None,
            },
        }
    }

    /// Apply a batch in array order, collecting the resulting events.
    pub fn apply_batch(&mut self, batch: &[EntityUpdate]) -> Vec<EntityEvent> {
        batch.iter().filter_map(|update| self.apply(update)).collect()
    }

    /// Replace the filter and report every entity whose visibility flipped,
    /// ordered by id.
    pub fn set_filter(&mut self, filter: VisibilityFilter) -> Vec<EntityEvent> {
        self.filter = filter;
        let mut events = Vec::new();
        for entity in self.entities.values_mut() {
            let now_visible = is_visible(entity, &self.filter);
            if now_visible == entity.visible {
                continue;
            }
            entity.visible = now_visible;
            if now_visible {
                self.visible_count += 1;
                events.push(ChangeEvent::Created(*entity));
            } else {
                self.visible_count -= 1;
                events.push(ChangeEvent::Deleted(*entity));
            }
        }
        events.sort_unstable_by_key(|event| event.current().id);
        tracing::debug!(
            target: "cluster_monitor::entities",
            flipped = events.len(),
            visible = self.visible_count,
            total = self.entities.len(),
            "entity_store.filter_changed"
        );
        events
    }

    /// Drop everything for a world switch. No per-entity events are produced.
    pub fn reset(&mut self, world: WorldId) {
        tracing::info!(
            target: "cluster_monitor::entities",
            previous = ?self.world,
            %world,
            dropped = self.entities.len(),
            "entity_store.reset"
        );
        self.entities.clear();
        self.visible_count = 0;
        self.world = Some(world);
    }
}

#[cfg(test)]
pub(crate) fn test_entity(id: NetworkId) -> Entity {
    Entity {
        id,
        location: [0.0; 3],
        object_type_tag: 0,
        template_crc: 0,
        interest_radius: 0.0,
        authoritative_server: 1,
        level: 1,
        hibernating: false,
        ai_activity: AiActivity::Idle,
        creation_type: 0,
        visible: false,
    }
}
