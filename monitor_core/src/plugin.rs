//! Bevy integration: [`MonitorPlugin`] runs a [`MonitorSession`] inside an
//! app's `Update` schedule and exposes the instance buffers as a resource for rendering.
//!
//! The session holds boxed listeners that are not `Sync`, so it lives in the
//! world as a non-send resource and every system touching it runs on the main
//! thread.

use bevy::prelude::*;

use crate::filter::VisibilityFilter;
use crate::palette::Rgba;
use crate::session::MonitorSession;

/// Map zoom requested by the host. The session only rescales when this changes.
#[derive(Resource, Debug, Clone, Copy, PartialEq)]
pub struct MapZoom(pub f32);

/// Filter waiting to be applied on the next update.
#[derive(Resource, Debug, Clone, Default)]
pub struct PendingFilter(pub Option<VisibilityFilter>);

/// Copy of the instance attribute arrays, refreshed whenever the index changes.
#[derive(Resource, Debug, Clone, Default)]
pub struct InstanceBuffers {
    pub count: usize,
    pub matrices: Vec<Mat4>,
    pub colors: Vec<Rgba>,
    pub generation: u64,
}

/// Per-update counts for overlays and tests.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorSummary {
    pub entities: usize,
    pub visible: usize,
    pub cells: usize,
    pub processes: usize,
    pub regions: usize,
    pub frames_applied: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, SystemSet)]
pub enum MonitorSet {
    Control,
    Ingest,
    Publish,
}

/// Registers the monitor resources and systems. The systems idle until a
/// [`MonitorSession`] is inserted with [`install_monitor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MonitorPlugin;

impl Plugin for MonitorPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<PendingFilter>()
            .init_resource::<InstanceBuffers>()
            .init_resource::<MonitorSummary>()
            .configure_sets(
                Update,
                (MonitorSet::Control, MonitorSet::Ingest, MonitorSet::Publish).chain(),
            )
            .add_systems(
                Update,
                (
                    (apply_pending_filter, apply_map_zoom)
                        .chain()
                        .in_set(MonitorSet::Control),
                    pump_feed.in_set(MonitorSet::Ingest),
                    (publish_instance_buffers, refresh_summary)
                        .chain()
                        .in_set(MonitorSet::Publish),
                ),
            );
    }
}

/// Insert `session` into `app`, adding [`MonitorPlugin`] if it is missing.
pub fn install_monitor(app: &mut App, session: MonitorSession) {
    if !app.is_plugin_added::<MonitorPlugin>() {
        app.add_plugins(MonitorPlugin);
    }
    let zoom = session.instances().zoom();
    app.insert_non_send_resource(session)
        .insert_resource(MapZoom(zoom));
}

/// Construct a headless Bevy [`App`] driving `session` on `MinimalPlugins`.
pub fn build_headless_monitor(session: MonitorSession) -> App {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    install_monitor(&mut app, session);
    app
}

fn apply_pending_filter(
    mut pending: ResMut<PendingFilter>,
    session: Option<NonSendMut<MonitorSession>>,
) {
    let Some(mut session) = session else {
        return;
    };
    if let Some(filter) = pending.0.take() {
        let flipped = session.set_filter(filter);
        tracing::debug!(target: "cluster_monitor::plugin", flipped, "plugin.filter_applied");
    }
}

fn apply_map_zoom(zoom: Option<Res<MapZoom>>, session: Option<NonSendMut<MonitorSession>>) {
    let (Some(zoom), Some(mut session)) = (zoom, session) else {
        return;
    };
    if zoom.is_changed() {
        session.set_zoom(zoom.0);
    }
}

fn pump_feed(time: Res<Time>, session: Option<NonSendMut<MonitorSession>>) {
    if let Some(mut session) = session {
        session.pump(time.elapsed());
    }
}

fn publish_instance_buffers(
    session: Option<NonSendMut<MonitorSession>>,
    mut buffers: ResMut<InstanceBuffers>,
) {
    let Some(mut session) = session else {
        return;
    };
    if !session.instances_mut().take_dirty() {
        return;
    }
    let instances = session.instances();
    buffers.count = instances.count();
    buffers.matrices.clear();
    buffers.matrices.extend(instances.matrices());
    buffers.colors.clear();
    buffers.colors.extend_from_slice(instances.colors());
    buffers.generation += 1;
}

fn refresh_summary(session: Option<NonSend<MonitorSession>>, mut summary: ResMut<MonitorSummary>) {
    let Some(session) = session else {
        return;
    };
    let next = MonitorSummary {
        entities: session.entities().len(),
        visible: session.instances().count(),
        cells: session.cells().len(),
        processes: session.processes().len(),
        regions: session.regions().regions().len(),
        frames_applied: session.stats().frames_applied,
    };
    if *summary != next {
        *summary = next;
    }
}
