//! One monitoring session: the stores, the views derived from them, and the
//! feed subscription for the world currently being watched.
//!
//! All mutation happens on the caller's thread. Each record is applied to its
//! store first and the resulting event is then dispatched to the instance
//! index, the aggregates, and any external listeners, in that order.

use std::collections::BTreeSet;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use monitor_proto::{ClientId, FeedMessage, NetworkId, WorldId};

use crate::aggregates::{ObjectTypeCounts, SelectionSet, ServerObjectCounts};
use crate::cells::{Cell, CellStatusStore};
use crate::config::MonitorConfig;
use crate::entities::{Entity, EntityEvent, EntityStore};
use crate::events::{ChangeEvent, ChangeListener, ChangeStream, ListenerId};
use crate::feed::{FeedError, FeedSender, FeedSource, FeedSubscription};
use crate::filter::{FilterError, FilterSpec, VisibilityFilter};
use crate::instances::InstanceIndex;
use crate::processes::{ProcessHealthStore, ServerProcess};
use crate::regions::RegionAggregator;
use crate::telemetry::FrameTelemetry;

/// Counters for what the session has consumed since the last world switch.
/// `frames_applied` and `records_applied` only count feed frames; batches
/// queued through a [`FeedSender`] are tallied in `follow_ups_applied`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_applied: u64,
    pub frames_dropped: u64,
    pub records_applied: u64,
    pub follow_ups_applied: u64,
}

pub struct MonitorSession {
    client: ClientId,
    world: Option<WorldId>,
    subscription: Option<FeedSubscription>,
    local_sender: Sender<FeedMessage>,
    local_receiver: Receiver<FeedMessage>,
    entities: EntityStore,
    cells: CellStatusStore,
    processes: ProcessHealthStore,
    frames: FrameTelemetry,
    instances: InstanceIndex,
    regions: RegionAggregator,
    server_counts: ServerObjectCounts,
    type_counts: ObjectTypeCounts,
    selection: SelectionSet,
    entity_stream: ChangeStream<Entity>,
    cell_stream: ChangeStream<Cell>,
    process_stream: ChangeStream<ServerProcess>,
    stats: SessionStats,
}

impl std::fmt::Debug for MonitorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorSession")
            .field("client", &self.client)
            .field("world", &self.world)
            .field("entities", &self.entities.len())
            .field("visible", &self.instances.count())
            .field("cells", &self.cells.len())
            .field("processes", &self.processes.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl MonitorSession {
    pub fn new(client: ClientId, config: &MonitorConfig) -> Result<Self, FilterError> {
        let filter = config.default_filter()?;
        let (local_sender, local_receiver) = unbounded();
        Ok(Self {
            client,
            world: None,
            subscription: None,
            local_sender,
            local_receiver,
            entities: EntityStore::new(filter),
            cells: CellStatusStore::default(),
            processes: ProcessHealthStore::new(config.palette()),
            frames: FrameTelemetry::new(config.telemetry.frame_history_len),
            instances: InstanceIndex::new(config.instance_settings()),
            regions: RegionAggregator::new(config.region_settings()),
            server_counts: ServerObjectCounts::by_server(),
            type_counts: ObjectTypeCounts::by_object_type(),
            selection: SelectionSet::default(),
            entity_stream: ChangeStream::default(),
            cell_stream: ChangeStream::default(),
            process_stream: ChangeStream::default(),
            stats: SessionStats::default(),
        })
    }

    pub fn client(&self) -> &ClientId {
        &self.client
    }

    pub fn world(&self) -> Option<WorldId> {
        self.world
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn cells(&self) -> &CellStatusStore {
        &self.cells
    }

    pub fn processes(&self) -> &ProcessHealthStore {
        &self.processes
    }

    pub fn frames(&self) -> &FrameTelemetry {
        &self.frames
    }

    pub fn instances(&self) -> &InstanceIndex {
        &self.instances
    }

    pub fn instances_mut(&mut self) -> &mut InstanceIndex {
        &mut self.instances
    }

    pub fn regions(&self) -> &RegionAggregator {
        &self.regions
    }

    pub fn server_counts(&self) -> &ServerObjectCounts {
        &self.server_counts
    }

    pub fn type_counts(&self) -> &ObjectTypeCounts {
        &self.type_counts
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    /// Handle listeners can use to queue follow-up records; they are applied
    /// after the frame currently being processed.
    pub fn feed_sender(&self) -> FeedSender {
        FeedSender::new(self.local_sender.clone())
    }

    pub fn subscribe_entities(&mut self, listener: Box<dyn ChangeListener<Entity>>) -> ListenerId {
        self.entity_stream.subscribe(listener)
    }

    pub fn subscribe_cells(&mut self, listener: Box<dyn ChangeListener<Cell>>) -> ListenerId {
        self.cell_stream.subscribe(listener)
    }

    pub fn subscribe_processes(
        &mut self,
        listener: Box<dyn ChangeListener<ServerProcess>>,
    ) -> ListenerId {
        self.process_stream.subscribe(listener)
    }

    pub fn unsubscribe_entities(&mut self, id: ListenerId) -> bool {
        self.entity_stream.unsubscribe(id)
    }

    /// Detach from the current world, discard all derived state, and attach to `world`.
    ///
    /// The previous subscription is dropped and any pending remesh cancelled
    /// before the new subscription is made, so no frame from the old world is
    /// applied afterwards.
    pub fn switch_world<S>(&mut self, source: &mut S, world: WorldId) -> Result<(), FeedError>
    where
        S: FeedSource + ?Sized,
    {
        tracing::info!(
            target: "cluster_monitor::session",
            client = %self.client,
            from = ?self.world,
            to = %world,
            "session.switch_world"
        );
        self.subscription = None;
        self.regions.reset();
        while self.local_receiver.try_recv().is_ok() {}

        self.world = Some(world);
        self.entities.reset(world);
        self.cells.reset(world);
        self.processes.reset(world);
        self.frames.clear();
        self.instances.rebuild_all(self.entities.iter());
        self.server_counts.on_reset();
        self.type_counts.on_reset();
        self.selection.on_reset();
        self.entity_stream.publish_reset();
        self.cell_stream.publish_reset();
        self.process_stream.publish_reset();
        self.stats = SessionStats::default();

        self.subscription = Some(source.subscribe(&self.client, world)?);
        Ok(())
    }

    /// Detach from the feed without attaching elsewhere. Stored state is kept.
    pub fn detach(&mut self) {
        self.subscription = None;
        self.regions.cancel_pending();
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    /// Apply every queued frame, then any follow-up records, then poll the
    /// region debounce. Returns the number of frames applied.
    pub fn pump(&mut self, now: Duration) -> usize {
        let mut applied = 0;
        loop {
            let frame = self.subscription.as_ref().and_then(FeedSubscription::try_next);
            let Some(frame) = frame else {
                break;
            };
            if Some(frame.world) != self.world {
                self.stats.frames_dropped += 1;
                tracing::trace!(
                    target: "cluster_monitor::session",
                    frame_world = %frame.world,
                    "session.frame_dropped"
                );
                continue;
            }
            self.ingest(&frame.message, now);
            self.stats.frames_applied += 1;
            self.stats.records_applied += frame.message.len() as u64;
            applied += 1;
            self.drain_local(now);
        }
        self.drain_local(now);
        self.regions.poll(now);
        applied
    }

    /// Apply one batch from any of the four streams. Does not touch [`SessionStats`].
    pub fn ingest(&mut self, message: &FeedMessage, now: Duration) {
        match message {
            FeedMessage::Entities(batch) => {
                for update in batch {
                    if let Some(event) = self.entities.apply(update) {
                        self.dispatch_entity(&event);
                    }
                }
            }
            FeedMessage::Cells(batch) => {
                for update in batch {
                    if let Some(event) = self.cells.apply(update) {
                        self.regions.on_cell_event(&event, now);
                        self.cell_stream.publish(&event);
                    }
                }
            }
            FeedMessage::Processes(batch) => {
                for update in batch {
                    if let Some(event) = self.processes.apply(update) {
                        self.process_stream.publish(&event);
                    }
                }
            }
            FeedMessage::Frames(batch) => self.frames.push_batch(batch),
        }
    }

    /// Replace the filter; entities that flip visibility are dispatched as
    /// created or deleted exactly like live updates.
    pub fn set_filter(&mut self, filter: VisibilityFilter) -> usize {
        let events = self.entities.set_filter(filter);
        for event in &events {
            self.dispatch_entity(event);
        }
        events.len()
    }

    pub fn set_filter_spec(&mut self, spec: &FilterSpec) -> Result<usize, FilterError> {
        let filter = VisibilityFilter::try_from(spec)?;
        Ok(self.set_filter(filter))
    }

    /// Forward a zoom change to the instance index; unchanged zoom is a no-op.
    pub fn set_zoom(&mut self, zoom: f32) -> bool {
        self.instances.on_zoom_changed(zoom)
    }

    pub fn poll_regions(&mut self, now: Duration) -> bool {
        self.regions.poll(now)
    }

    /// Replace the selection with the picked ids still visible.
    pub fn select(&mut self, ids: impl IntoIterator<Item = NetworkId>) {
        self.selection.select(ids, &self.entities);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Rebuild every derived view from the stores, for hosts that lost their buffers.
    pub fn rebuild_views(&mut self, now: Duration) {
        self.instances.rebuild_all(self.entities.iter());
        self.server_counts.on_reset();
        self.type_counts.on_reset();
        let visible: Vec<Entity> = self.entities.visible().copied().collect();
        for entity in visible {
            let event = ChangeEvent::Created(entity);
            self.server_counts.on_change(&event);
            self.type_counts.on_change(&event);
        }
        self.regions.rebuild_from(self.cells.iter(), now);
    }

    /// Panics unless the visible entity ids are exactly the ids holding a slot.
    pub fn check_consistency(&self) {
        self.instances.check_invariants();
        let visible: BTreeSet<NetworkId> = self.entities.visible().map(|e| e.id).collect();
        let slotted: BTreeSet<NetworkId> = (0..self.instances.count())
            .filter_map(|slot| self.instances.id_at(slot))
            .collect();
        assert_eq!(visible, slotted, "visible set diverged from instance slots");
        assert_eq!(self.entities.visible_count(), self.instances.count());
        assert_eq!(self.server_counts.total(), self.instances.count());
    }

    fn drain_local(&mut self, now: Duration) {
        while let Ok(message) = self.local_receiver.try_recv() {
            self.ingest(&message, now);
            self.stats.follow_ups_applied += 1;
        }
    }

    fn dispatch_entity(&mut self, event: &EntityEvent) {
        match event {
            ChangeEvent::Created(entity) => self.instances.on_created(entity),
            ChangeEvent::Updated { current, .. } => self.instances.on_updated(current),
            ChangeEvent::Deleted(entity) => self.instances.on_deleted(entity),
        }
        self.server_counts.on_change(event);
        self.type_counts.on_change(event);
        self.selection.on_change(event);
        self.entity_stream.publish(event);
    }
}
