//! Dense, render-facing instance buffer for the visible entity set.
//!
//! The renderer only draws slots `[0, count)`, so the buffer must stay
//! contiguous. Inserts append at `count`, deletes move the last slot into the
//! hole, and growth extends every attribute array to the new capacity at once.
//! Slot numbers change only on removal, never on growth.

use std::f32::consts::TAU;

use ahash::AHashMap;
use bevy::math::{Mat4, Quat, Vec2, Vec3};
use bevy::prelude::Transform;
use monitor_proto::NetworkId;
use serde::{Deserialize, Serialize};

use crate::entities::Entity;
use crate::palette::{Palette, Rgba};

pub const GROWTH_CHUNK: usize = 1024;
pub const MIN_CAPACITY: usize = 256;
pub const MIN_INSTANCE_SCALE: f32 = 1.0;
pub const MAX_INSTANCE_SCALE: f32 = 50.0;

/// Which entity property selects the palette entry for a new instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorMode {
    #[default]
    ObjectType,
    AuthoritativeServer,
}

/// Ratio between the visible map window and the full world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewScale {
    pub visible_half_extent: f32,
    pub full_half_extent: f32,
}

impl Default for ViewScale {
    fn default() -> Self {
        Self {
            visible_half_extent: 8192.0,
            full_half_extent: 8192.0,
        }
    }
}

impl ViewScale {
    /// Marker scale for a zoom level, clamped to `[1, 50]`.
    pub fn scale_for_zoom(&self, zoom: f32) -> f32 {
        let ratio = if self.full_half_extent > 0.0 {
            self.visible_half_extent / self.full_half_extent
        } else {
            1.0
        };
        (100.0 * ratio / zoom).clamp(MIN_INSTANCE_SCALE, MAX_INSTANCE_SCALE)
    }
}

#[derive(Debug, Clone)]
pub struct InstanceSettings {
    pub initial_capacity: usize,
    pub growth_chunk: usize,
    pub min_capacity: usize,
    pub view: ViewScale,
    pub initial_zoom: f32,
    pub color_mode: ColorMode,
    pub palette: Palette,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            initial_capacity: MIN_CAPACITY,
            growth_chunk: GROWTH_CHUNK,
            min_capacity: MIN_CAPACITY,
            view: ViewScale::default(),
            initial_zoom: 1.0,
            color_mode: ColorMode::default(),
            palette: Palette::default(),
        }
    }
}

#[derive(Debug)]
pub struct InstanceIndex {
    // Attribute arrays, each `capacity` long.
    transforms: Vec<Transform>,
    colors: Vec<Rgba>,
    headings: Vec<f32>,
    count: usize,
    slot_of: AHashMap<NetworkId, usize>,
    /// `slot_ids[slot]` for every slot below `count`.
    slot_ids: Vec<NetworkId>,
    growth_chunk: usize,
    min_capacity: usize,
    view: ViewScale,
    zoom: f32,
    scale: f32,
    color_mode: ColorMode,
    palette: Palette,
    dirty: bool,
}

impl Default for InstanceIndex {
    fn default() -> Self {
        Self::new(InstanceSettings::default())
    }
}

impl InstanceIndex {
    pub fn new(settings: InstanceSettings) -> Self {
        let capacity = settings.initial_capacity;
        let zoom = if settings.initial_zoom.is_finite() && settings.initial_zoom > 0.0 {
            settings.initial_zoom
        } else {
            1.0
        };
        Self {
            transforms: vec![Transform::IDENTITY; capacity],
            colors: vec![Rgba::WHITE; capacity],
            headings: vec![0.0; capacity],
            count: 0,
            slot_of: AHashMap::with_capacity(capacity),
            slot_ids: Vec::with_capacity(capacity),
            growth_chunk: settings.growth_chunk.max(1),
            min_capacity: settings.min_capacity.max(1),
            view: settings.view,
            zoom,
            scale: settings.view.scale_for_zoom(zoom),
            color_mode: settings.color_mode,
            palette: settings.palette,
            dirty: false,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.transforms.len()
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn slot_of(&self, id: NetworkId) -> Option<usize> {
        self.slot_of.get(&id).copied()
    }

    pub fn id_at(&self, slot: usize) -> Option<NetworkId> {
        self.slot_ids.get(slot).copied()
    }

    pub fn contains(&self, id: NetworkId) -> bool {
        self.slot_of.contains_key(&id)
    }

    /// Occupied prefix of the transform buffer.
    pub fn transforms(&self) -> &[Transform] {
        &self.transforms[..self.count]
    }

    /// Occupied prefix of the color buffer.
    pub fn colors(&self) -> &[Rgba] {
        &self.colors[..self.count]
    }

    pub fn heading_at(&self, slot: usize) -> Option<f32> {
        (slot < self.count).then(|| self.headings[slot])
    }

    pub fn transform_of(&self, id: NetworkId) -> Option<&Transform> {
        self.slot_of(id).map(|slot| &self.transforms[slot])
    }

    pub fn color_of(&self, id: NetworkId) -> Option<Rgba> {
        self.slot_of(id).map(|slot| self.colors[slot])
    }

    pub fn heading_of(&self, id: NetworkId) -> Option<f32> {
        self.slot_of(id).map(|slot| self.headings[slot])
    }

    /// Instance matrices for upload, in slot order.
    pub fn matrices(&self) -> impl Iterator<Item = Mat4> + '_ {
        self.transforms().iter().map(Transform::compute_matrix)
    }

    /// Returns whether anything changed since the previous call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn on_created(&mut self, entity: &Entity) {
        if self.slot_of.contains_key(&entity.id) {
            // Duplicate create for an id already shown; treat as a move.
            self.on_updated(entity);
            return;
        }
        if self.count == self.capacity() {
            self.grow();
        }
        let slot = self.count;
        self.transforms[slot] = Transform::from_translation(map_translation(entity))
            .with_scale(Vec3::splat(self.scale));
        self.colors[slot] = self.color_for(entity);
        self.headings[slot] = 0.0;
        self.slot_of.insert(entity.id, slot);
        self.slot_ids.push(entity.id);
        self.count += 1;
        self.dirty = true;
    }

    pub fn on_updated(&mut self, entity: &Entity) {
        let Some(slot) = self.slot_of(entity.id) else {
            return;
        };
        debug_assert!(slot < self.count, "slot {slot} past count {}", self.count);
        let previous = self.transforms[slot].translation.truncate();
        let next = entity.map_position();
        if let Some(heading) = bearing(previous, next) {
            self.headings[slot] = heading;
        }
        self.transforms[slot] = Transform::from_translation(next.extend(0.0))
            .with_rotation(Quat::from_rotation_z(self.headings[slot]))
            .with_scale(Vec3::splat(self.scale));
        self.dirty = true;
    }

    pub fn on_deleted(&mut self, entity: &Entity) {
        self.remove(entity.id);
    }

    pub fn remove(&mut self, id: NetworkId) -> bool {
        let Some(victim) = self.slot_of.remove(&id) else {
            return false;
        };
        let last = self.count - 1;
        if victim != last {
            self.transforms[victim] = self.transforms[last];
            self.colors[victim] = self.colors[last];
            self.headings[victim] = self.headings[last];
            let moved = self.slot_ids[last];
            self.slot_ids[victim] = moved;
            self.slot_of.insert(moved, victim);
        }
        self.slot_ids.pop();
        self.count -= 1;
        self.dirty = true;
        true
    }

    /// Discard every slot and replay creation for the visible entities, by id.
    pub fn rebuild_all<'a>(&mut self, entities: impl IntoIterator<Item = &'a Entity>) {
        self.clear();
        let mut visible: Vec<&Entity> = entities.into_iter().filter(|e| e.visible).collect();
        visible.sort_unstable_by_key(|entity| entity.id);
        for entity in visible {
            self.on_created(entity);
        }
        self.dirty = true;
    }

    pub fn clear(&mut self) {
        self.count = 0;
        self.slot_of.clear();
        self.slot_ids.clear();
        self.dirty = true;
    }

    /// Rescale every occupied slot. Returns `false` without touching the
    /// buffer when the zoom is unchanged or unusable.
    pub fn on_zoom_changed(&mut self, zoom: f32) -> bool {
        if !zoom.is_finite() || zoom <= 0.0 {
            tracing::warn!(target: "cluster_monitor::instances", zoom, "instances.zoom_rejected");
            return false;
        }
        if zoom == self.zoom {
            return false;
        }
        self.zoom = zoom;
        self.scale = self.view.scale_for_zoom(zoom);
        let scale = Vec3::splat(self.scale);
        for transform in &mut self.transforms[..self.count] {
            transform.scale = scale;
        }
        self.dirty = true;
        true
    }

    /// Panics if the id/slot maps are not exact inverses over `[0, count)`.
    pub fn check_invariants(&self) {
        assert!(self.count <= self.capacity());
        assert_eq!(self.slot_ids.len(), self.count);
        assert_eq!(self.slot_of.len(), self.count);
        assert_eq!(self.colors.len(), self.capacity());
        assert_eq!(self.headings.len(), self.capacity());
        for (slot, id) in self.slot_ids.iter().enumerate() {
            assert_eq!(self.slot_of.get(id), Some(&slot), "id {id} not bound to slot {slot}");
        }
    }

    fn grow(&mut self) {
        let new_capacity = (self.count + self.growth_chunk).max(self.min_capacity);
        tracing::debug!(
            target: "cluster_monitor::instances",
            from = self.capacity(),
            to = new_capacity,
            "instances.grow"
        );
        self.transforms.resize(new_capacity, Transform::IDENTITY);
        self.colors.resize(new_capacity, Rgba::WHITE);
        self.headings.resize(new_capacity, 0.0);
        self.slot_ids.reserve(new_capacity - self.slot_ids.len());
    }

    fn color_for(&self, entity: &Entity) -> Rgba {
        let key = match self.color_mode {
            ColorMode::ObjectType => entity.object_type_tag as usize,
            ColorMode::AuthoritativeServer => entity.authoritative_server as usize,
        };
        self.palette.color_for(key)
    }
}

fn map_translation(entity: &Entity) -> Vec3 {
    entity.map_position().extend(0.0)
}

/// Bearing of the move from `from` to `to` in `[0, 2π)`, or `None` for a
/// zero-length move.
pub fn bearing(from: Vec2, to: Vec2) -> Option<f32> {
    let delta = to - from;
    if delta.x == 0.0 && delta.y == 0.0 {
        return None;
    }
    let angle = delta.y.atan2(delta.x).rem_euclid(TAU);
    Some(if angle >= TAU { 0.0 } else { angle })
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;
    use crate::entities::test_entity;

    fn visible_at(id: NetworkId, x: f32, z: f32) -> Entity {
        let mut entity = test_entity(id);
        entity.location = [x, 0.0, z];
        entity.visible = true;
        entity
    }

    fn small_index(capacity: usize) -> InstanceIndex {
        InstanceIndex::new(InstanceSettings {
            initial_capacity: capacity,
            growth_chunk: 2,
            min_capacity: 1,
            ..InstanceSettings::default()
        })
    }

    #[test]
    fn create_appends_and_registers_slot() {
        let mut index = small_index(4);
        index.on_created(&visible_at(10, 1.0, 2.0));
        index.on_created(&visible_at(11, 3.0, 4.0));
        assert_eq!(index.count(), 2);
        assert_eq!(index.slot_of(11), Some(1));
        assert_eq!(index.id_at(0), Some(10));
        assert_eq!(index.transforms()[1].translation, Vec3::new(3.0, 4.0, 0.0));
        assert!(index.take_dirty());
        assert!(!index.take_dirty());
        index.check_invariants();
    }

    #[test]
    fn swap_delete_keeps_other_mappings() {
        let mut index = small_index(8);
        for id in 0..5u64 {
            index.on_created(&visible_at(id, id as f32 * 10.0, 0.0));
        }
        let before: Vec<(NetworkId, Vec3)> = [0u64, 1, 3, 4]
            .iter()
            .map(|id| (*id, index.transform_of(*id).unwrap().translation))
            .collect();

        index.remove(2);

        assert_eq!(index.count(), 4);
        assert_eq!(index.slot_of(4), Some(2));
        assert_eq!(index.slot_of(2), None);
        assert_eq!(index.id_at(4), None);
        for (id, translation) in before {
            assert_eq!(index.transform_of(id).unwrap().translation, translation);
        }
        index.check_invariants();
    }

    #[test]
    fn deleting_last_slot_just_shrinks() {
        let mut index = small_index(4);
        index.on_created(&visible_at(1, 0.0, 0.0));
        index.on_created(&visible_at(2, 5.0, 0.0));
        assert!(index.remove(2));
        assert_eq!(index.count(), 1);
        assert_eq!(index.slot_of(1), Some(0));
        assert!(!index.remove(2));
        index.check_invariants();
    }

    #[test]
    fn growth_preserves_existing_attributes() {
        let mut index = small_index(3);
        for id in 0..3u64 {
            index.on_created(&visible_at(id, id as f32, -(id as f32)));
        }
        let colors: Vec<Rgba> = index.colors().to_vec();

        index.on_created(&visible_at(3, 3.0, -3.0));

        assert_eq!(index.capacity(), 5);
        for id in 0..3u64 {
            assert_eq!(index.slot_of(id), Some(id as usize));
            assert_eq!(
                index.transform_of(id).unwrap().translation,
                Vec3::new(id as f32, -(id as f32), 0.0)
            );
            assert_eq!(index.color_of(id), Some(colors[id as usize]));
        }
        index.check_invariants();
    }

    #[test]
    fn growth_respects_floor() {
        let mut index = InstanceIndex::new(InstanceSettings {
            initial_capacity: 0,
            growth_chunk: 4,
            min_capacity: 64,
            ..InstanceSettings::default()
        });
        index.on_created(&visible_at(1, 0.0, 0.0));
        assert_eq!(index.capacity(), 64);
    }

    #[test]
    fn update_sets_bearing_and_keeps_it_when_stationary() {
        let mut index = small_index(4);
        index.on_created(&visible_at(1, 0.0, 0.0));
        index.on_updated(&visible_at(1, 0.0, 5.0));
        let heading = index.heading_of(1).unwrap();
        assert!((heading - PI / 2.0).abs() < 1e-6);

        index.on_updated(&visible_at(1, 0.0, 5.0));
        assert_eq!(index.heading_of(1), Some(heading));
        assert!(index.heading_of(1).unwrap().is_finite());
    }

    #[test]
    fn opposite_moves_are_pi_apart() {
        let mut index = small_index(4);
        index.on_created(&visible_at(1, 0.0, 0.0));
        index.on_updated(&visible_at(1, 4.0, 0.0));
        let east = index.heading_of(1).unwrap();
        index.on_updated(&visible_at(1, 0.0, 0.0));
        let west = index.heading_of(1).unwrap();
        assert_eq!(west - east, PI);

        let north = bearing(Vec2::ZERO, Vec2::new(0.0, 1.0)).unwrap();
        let south = bearing(Vec2::ZERO, Vec2::new(0.0, -1.0)).unwrap();
        assert!(((south - north) - PI).abs() < 1e-5);
        assert!((0.0..TAU).contains(&south));
    }

    #[test]
    fn update_leaves_color_and_ignores_unknown_ids() {
        let mut index = small_index(4);
        let mut entity = visible_at(1, 0.0, 0.0);
        entity.object_type_tag = 3;
        index.on_created(&entity);
        let color = index.color_of(1);
        entity.object_type_tag = 4;
        entity.location = [9.0, 0.0, 9.0];
        index.on_updated(&entity);
        assert_eq!(index.color_of(1), color);

        index.on_updated(&visible_at(42, 1.0, 1.0));
        index.on_deleted(&visible_at(42, 1.0, 1.0));
        assert_eq!(index.count(), 1);
        index.check_invariants();
    }

    #[test]
    fn zoom_rescales_only_on_change() {
        let mut index = InstanceIndex::new(InstanceSettings {
            view: ViewScale {
                visible_half_extent: 4096.0,
                full_half_extent: 8192.0,
            },
            initial_zoom: 1.0,
            ..InstanceSettings::default()
        });
        index.on_created(&visible_at(1, 0.0, 0.0));
        assert_eq!(index.scale(), 50.0);

        assert!(index.on_zoom_changed(5.0));
        assert_eq!(index.scale(), 10.0);
        assert_eq!(index.transforms()[0].scale, Vec3::splat(10.0));
        assert!(!index.on_zoom_changed(5.0));
        assert!(!index.on_zoom_changed(0.0));

        assert!(index.on_zoom_changed(500.0));
        assert_eq!(index.scale(), 1.0);
    }

    #[test]
    fn rebuild_replays_only_visible() {
        let mut index = small_index(2);
        index.on_created(&visible_at(99, 0.0, 0.0));
        let mut hidden = visible_at(3, 0.0, 0.0);
        hidden.visible = false;
        let entities = [visible_at(2, 1.0, 1.0), hidden, visible_at(1, 2.0, 2.0)];

        index.rebuild_all(entities.iter());

        assert_eq!(index.count(), 2);
        assert_eq!(index.id_at(0), Some(1));
        assert_eq!(index.id_at(1), Some(2));
        assert!(!index.contains(99));
        assert_eq!(index.matrices().count(), 2);
        index.check_invariants();
    }
}
