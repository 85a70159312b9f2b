#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Once;

use monitor_core::{load_monitor_config_from_env, MonitorConfig, MonitorSession};
use monitor_proto::{
    AiActivity, CellKey, CellStatusUpdate, ClientId, EntityUpdate, FeedFrame, NetworkId,
    ServerId,
};

static INIT: Once = Once::new();

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = fixture("test_monitor_config.json");

        debug_assert!(
            config_path.exists(),
            "missing test monitor config at {}",
            config_path.display()
        );

        std::env::set_var("MONITOR_CONFIG_PATH", &config_path);
    });
}

pub fn test_config() -> MonitorConfig {
    ensure_test_config();
    let (config, metadata) = load_monitor_config_from_env();
    assert!(metadata.path().is_some(), "test config should load from file");
    (*config).clone()
}

pub fn session() -> MonitorSession {
    MonitorSession::new(ClientId::new("integration"), &test_config())
        .expect("test config filter is valid")
}

pub fn load_feed_sample() -> anyhow::Result<Vec<FeedFrame>> {
    let text = std::fs::read_to_string(fixture("feed_sample.json"))?;
    Ok(serde_json::from_str(&text)?)
}

pub fn entity(id: NetworkId, location: [f32; 3], level: i32, server: ServerId) -> EntityUpdate {
    EntityUpdate {
        id,
        delete: false,
        location,
        object_type_tag: 5,
        template_crc: 0,
        interest_radius: 0.0,
        authoritative_server: server,
        level,
        hibernating_counter: 0,
        ai_activity: AiActivity::Wander,
        creation_type: 0,
    }
}

pub fn cell(x: i32, z: i32, servers: &[ServerId]) -> CellStatusUpdate {
    CellStatusUpdate {
        cell: CellKey::new(x, z),
        controlling_servers: servers.to_vec(),
        is_loaded: true,
        subscriber_count: 0,
    }
}

/// Deterministic xorshift for generating update sequences.
pub struct Xorshift(u64);

impl Xorshift {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}
