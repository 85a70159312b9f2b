//! Client-side core of the cluster monitor.
//!
//! Consumes the per-world entity, cell, process, and frame-time feeds and
//! keeps the derived views a map renderer needs: a dense instance buffer of
//! visible entities, per-server region meshes, and incremental counts.
//! Everything is driven through [`MonitorSession`], either directly or from a
//! Bevy app via [`plugin::install_monitor`].

pub mod aggregates;
pub mod cells;
pub mod config;
pub mod entities;
pub mod events;
pub mod feed;
pub mod filter;
pub mod instances;
pub mod palette;
pub mod plugin;
pub mod processes;
pub mod regions;
pub mod session;
pub mod telemetry;

pub use aggregates::{ObjectTypeCounts, SelectionSet, ServerObjectCounts, VisibleCounts};
pub use cells::{Cell, CellEvent, CellStatusStore};
pub use config::{
    load_monitor_config, load_monitor_config_from_env, MonitorConfig, MonitorConfigError,
    MonitorConfigMetadata, BUILTIN_MONITOR_CONFIG, MONITOR_CONFIG_ENV,
};
pub use entities::{Entity, EntityEvent, EntityStore};
pub use events::{ChangeEvent, ChangeKind, ChangeListener, ChangeStream, ListenerId, StreamMessage};
pub use feed::{ChannelFeed, FeedError, FeedSender, FeedSource, FeedSubscription};
pub use filter::{is_visible, FilterError, FilterSpec, VisibilityFilter};
pub use instances::{bearing, ColorMode, InstanceIndex, InstanceSettings, ViewScale};
pub use palette::{Palette, Rgba};
pub use plugin::{
    build_headless_monitor, install_monitor, InstanceBuffers, MapZoom, MonitorPlugin,
    MonitorSet, MonitorSummary, PendingFilter,
};
pub use processes::{ProcessEvent, ProcessHealthStore, ServerProcess};
pub use regions::{RegionAggregator, RegionMesh, RegionSettings};
pub use session::{MonitorSession, SessionStats};
pub use telemetry::{FrameSample, FrameTelemetry};
