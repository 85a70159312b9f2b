//! Incremental aggregates derived from the entity change stream.

use std::collections::{BTreeMap, BTreeSet};

use ahash::AHashMap;
use monitor_proto::{NetworkId, ServerId};

use crate::entities::{Entity, EntityStore};
use crate::events::{ChangeEvent, ChangeListener};

/// Count of visible entities grouped by a key derived from each entity.
///
/// The key each id was counted under is remembered, so a visibility edge that
/// coincides with a key change still decrements the right bucket.
#[derive(Debug, Clone)]
pub struct VisibleCounts<K> {
    key: fn(&Entity) -> K,
    counted: AHashMap<NetworkId, K>,
    counts: BTreeMap<K, usize>,
}

pub type ServerObjectCounts = VisibleCounts<ServerId>;
pub type ObjectTypeCounts = VisibleCounts<u32>;

impl VisibleCounts<u32> {
    /// Group by authoritative server.
    pub fn by_server() -> Self {
        Self::new(|entity| entity.authoritative_server)
    }

    /// Group by object type tag.
    pub fn by_object_type() -> Self {
        Self::new(|entity| entity.object_type_tag)
    }
}

impl<K: Ord + Copy> VisibleCounts<K> {
    pub fn new(key: fn(&Entity) -> K) -> Self {
        Self {
            key,
            counted: AHashMap::new(),
            counts: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: K) -> usize {
        self.counts.get(&key).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counted.len()
    }

    /// Non-zero counts ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = (K, usize)> + '_ {
        self.counts.iter().map(|(key, count)| (*key, *count))
    }

    pub fn clear(&mut self) {
        self.counted.clear();
        self.counts.clear();
    }

    fn count(&mut self, entity: &Entity) {
        let key = (self.key)(entity);
        match self.counted.insert(entity.id, key) {
            Some(previous) if previous == key => return,
            Some(previous) => self.decrement(previous),
            None => {}
        }
        *self.counts.entry(key).or_default() += 1;
    }

    fn uncount(&mut self, id: NetworkId) {
        if let Some(key) = self.counted.remove(&id) {
            self.decrement(key);
        }
    }

    fn decrement(&mut self, key: K) {
        if let Some(count) = self.counts.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&key);
            }
        }
    }
}

impl<K: Ord + Copy> ChangeListener<Entity> for VisibleCounts<K> {
    fn on_change(&mut self, event: &ChangeEvent<Entity>) {
        match event {
            ChangeEvent::Created(entity) | ChangeEvent::Updated { current: entity, .. } => {
                self.count(entity)
            }
            ChangeEvent::Deleted(entity) => self.uncount(entity.id),
        }
    }

    fn on_reset(&mut self) {
        self.clear();
    }
}

/// Entities picked on the map. The renderer resolves screen coordinates to
/// ids; ids that leave the visible set drop out of the selection.
#[derive(Debug, Clone, Default)]
pub struct SelectionSet {
    selected: BTreeSet<NetworkId>,
}

impl SelectionSet {
    /// Replace the selection, keeping only ids currently visible in `store`.
    pub fn select(&mut self, ids: impl IntoIterator<Item = NetworkId>, store: &EntityStore) {
        self.selected = ids
            .into_iter()
            .filter(|id| store.get(*id).is_some_and(|entity| entity.visible))
            .collect();
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn contains(&self, id: NetworkId) -> bool {
        self.selected.contains(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = NetworkId> + '_ {
        self.selected.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

impl ChangeListener<Entity> for SelectionSet {
    fn on_change(&mut self, event: &ChangeEvent<Entity>) {
        if let ChangeEvent::Deleted(entity) = event {
            self.selected.remove(&entity.id);
        }
    }

    fn on_reset(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use monitor_proto::{AiActivity, EntityUpdate};

    use super::*;
    use crate::entities::test_entity;

    fn on_server(id: NetworkId, server: ServerId) -> Entity {
        let mut entity = test_entity(id);
        entity.authoritative_server = server;
        entity.visible = true;
        entity
    }

    #[test]
    fn counts_follow_server_handoff() {
        let mut counts = ServerObjectCounts::by_server();
        counts.on_change(&ChangeEvent::Created(on_server(1, 10)));
        counts.on_change(&ChangeEvent::Created(on_server(2, 10)));
        counts.on_change(&ChangeEvent::Updated {
            current: on_server(2, 11),
            previous: on_server(2, 10),
        });
        assert_eq!(counts.get(10), 1);
        assert_eq!(counts.get(11), 1);
        assert_eq!(counts.total(), 2);

        counts.on_change(&ChangeEvent::Deleted(on_server(1, 10)));
        assert_eq!(counts.iter().collect::<Vec<_>>(), vec![(11, 1)]);

        counts.on_reset();
        assert_eq!(counts.total(), 0);
    }

    #[test]
    fn delete_after_key_change_uses_counted_key() {
        let mut counts = ServerObjectCounts::by_server();
        counts.on_change(&ChangeEvent::Created(on_server(1, 10)));
        // Hidden in the same update that moved it to server 11.
        counts.on_change(&ChangeEvent::Deleted(on_server(1, 11)));
        assert_eq!(counts.get(10), 0);
        assert_eq!(counts.total(), 0);
    }

    #[test]
    fn object_type_counts() {
        let mut counts = ObjectTypeCounts::by_object_type();
        let mut a = on_server(1, 1);
        a.object_type_tag = 7;
        counts.on_change(&ChangeEvent::Created(a));
        counts.on_change(&ChangeEvent::Updated {
            current: a,
            previous: a,
        });
        assert_eq!(counts.get(7), 1);
        // A stray delete for an uncounted key is ignored.
        counts.on_change(&ChangeEvent::Deleted(on_server(9, 1)));
        assert_eq!(counts.total(), 1);
    }

    #[test]
    fn selection_keeps_visible_ids_and_drops_deleted() {
        let mut store = EntityStore::default();
        for id in [1u64, 2] {
            store.apply(&EntityUpdate {
                id,
                delete: false,
                location: [0.0; 3],
                object_type_tag: 0,
                template_crc: 0,
                interest_radius: 0.0,
                authoritative_server: 1,
                level: 1,
                hibernating_counter: 0,
                ai_activity: AiActivity::Idle,
                creation_type: 0,
            });
        }
        let mut selection = SelectionSet::default();
        selection.select([1, 2, 3], &store);
        assert_eq!(selection.ids().collect::<Vec<_>>(), vec![1, 2]);

        let removed = store.apply(&EntityUpdate::deletion(2)).unwrap();
        selection.on_change(&removed);
        assert!(!selection.contains(2));
        assert_eq!(selection.len(), 1);
    }
}
