//! Wire contracts for the cluster monitor feed.
//!
//! The backend publishes four independent per-world streams (entities, cell
//! status, process health, frame telemetry). Each message is a batch of zero or
//! more records that consumers apply in array order.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Network id of a simulated entity.
pub type NetworkId = u64;

/// Id of a simulation server process within the cluster.
pub type ServerId = u32;

/// Upper bound on a single length-prefixed frame accepted from the transport.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorldId(pub u32);

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "world-{}", self.0)
    }
}

/// Session identity used when subscribing to a world's feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// AI behaviour an entity is currently running.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum AiActivity {
    #[default]
    Idle = 0,
    Loiter = 1,
    Wander = 2,
    Follow = 3,
    Flee = 4,
    Move = 5,
    Patrol = 6,
    Face = 7,
    Swarm = 8,
    Combat = 9,
    Invalid = 255,
}

impl AiActivity {
    pub const ALL: [AiActivity; 10] = [
        AiActivity::Idle,
        AiActivity::Loiter,
        AiActivity::Wander,
        AiActivity::Follow,
        AiActivity::Flee,
        AiActivity::Move,
        AiActivity::Patrol,
        AiActivity::Face,
        AiActivity::Swarm,
        AiActivity::Combat,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Convert from u8, mapping unknown values to `Invalid`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Loiter,
            2 => Self::Wander,
            3 => Self::Follow,
            4 => Self::Flee,
            5 => Self::Move,
            6 => Self::Patrol,
            7 => Self::Face,
            8 => Self::Swarm,
            9 => Self::Combat,
            _ => Self::Invalid,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loiter => "loiter",
            Self::Wander => "wander",
            Self::Follow => "follow",
            Self::Flee => "flee",
            Self::Move => "move",
            Self::Patrol => "patrol",
            Self::Face => "face",
            Self::Swarm => "swarm",
            Self::Combat => "combat",
            Self::Invalid => "invalid",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .iter()
            .copied()
            .chain(std::iter::once(Self::Invalid))
            .find(|activity| activity.name().eq_ignore_ascii_case(name))
    }
}

impl From<u8> for AiActivity {
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}

impl From<AiActivity> for u8 {
    fn from(value: AiActivity) -> Self {
        value.as_u8()
    }
}

/// Render a four-character object type tag (`CREO`, `TANO`, ...) for display.
pub fn tag_to_string(tag: u32) -> String {
    let bytes = tag.to_be_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        bytes.iter().map(|b| *b as char).collect::<String>().trim_end().to_string()
    } else {
        format!("{tag:#010x}")
    }
}

/// Pack a four-character tag into its numeric form. Shorter tags are space padded.
pub fn tag_from_str(text: &str) -> Option<u32> {
    let bytes = text.as_bytes();
    if bytes.is_empty() || bytes.len() > 4 || !bytes.iter().all(u8::is_ascii_graphic) {
        return None;
    }
    let mut packed = [b' '; 4];
    packed[..bytes.len()].copy_from_slice(bytes);
    Some(u32::from_be_bytes(packed))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub id: NetworkId,
    #[serde(default)]
    pub delete: bool,
    pub location: [f32; 3],
    pub object_type_tag: u32,
    pub template_crc: u32,
    pub interest_radius: f32,
    pub authoritative_server: ServerId,
    pub level: i32,
    pub hibernating_counter: u32,
    pub ai_activity: AiActivity,
    pub creation_type: i32,
}

impl EntityUpdate {
    /// A delete record only needs the id; the remaining fields are ignored.
    pub fn deletion(id: NetworkId) -> Self {
        Self {
            id,
            delete: true,
            location: [0.0; 3],
            object_type_tag: 0,
            template_crc: 0,
            interest_radius: 0.0,
            authoritative_server: 0,
            level: 0,
            hibernating_counter: 0,
            ai_activity: AiActivity::Idle,
            creation_type: 0,
        }
    }
}

/// Grid cell address in world units. Ordering is (x, z) lexicographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub x: i32,
    pub z: i32,
}

impl CellKey {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellStatusUpdate {
    pub cell: CellKey,
    pub controlling_servers: Vec<ServerId>,
    pub is_loaded: bool,
    pub subscriber_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHealthUpdate {
    pub server_id: ServerId,
    pub address: String,
    pub is_online: bool,
    pub scene_id: String,
    pub pid: u32,
    pub host_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameTelemetryUpdate {
    pub server_id: ServerId,
    pub frame_duration_ms: f32,
}

/// One batch from one of the four per-world streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedMessage {
    Entities(Vec<EntityUpdate>),
    Cells(Vec<CellStatusUpdate>),
    Processes(Vec<ProcessHealthUpdate>),
    Frames(Vec<FrameTelemetryUpdate>),
}

impl FeedMessage {
    pub fn len(&self) -> usize {
        match self {
            Self::Entities(batch) => batch.len(),
            Self::Cells(batch) => batch.len(),
            Self::Processes(batch) => batch.len(),
            Self::Frames(batch) => batch.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stream(&self) -> FeedStream {
        match self {
            Self::Entities(_) => FeedStream::Entities,
            Self::Cells(_) => FeedStream::Cells,
            Self::Processes(_) => FeedStream::Processes,
            Self::Frames(_) => FeedStream::Frames,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedStream {
    Entities,
    Cells,
    Processes,
    Frames,
}

impl FeedStream {
    pub const ALL: [FeedStream; 4] = [
        FeedStream::Entities,
        FeedStream::Cells,
        FeedStream::Processes,
        FeedStream::Frames,
    ];
}

/// A feed batch tagged with the world it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedFrame {
    pub world: WorldId,
    pub message: FeedMessage,
}

impl FeedFrame {
    pub fn new(world: WorldId, message: FeedMessage) -> Self {
        Self { world, message }
    }
}

#[derive(Debug, Error)]
pub enum FrameCodecError {
    #[error("bincode frame codec failed: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("json frame codec failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame length {0} exceeds limit of {MAX_FRAME_LEN} bytes")]
    TooLarge(usize),
}

pub fn encode_frame(frame: &FeedFrame) -> Result<Vec<u8>, FrameCodecError> {
    Ok(bincode::serialize(frame)?)
}

pub fn decode_frame(bytes: &[u8]) -> Result<FeedFrame, FrameCodecError> {
    if bytes.len() > MAX_FRAME_LEN {
        return Err(FrameCodecError::TooLarge(bytes.len()));
    }
    Ok(bincode::deserialize(bytes)?)
}

pub fn encode_frame_json(frame: &FeedFrame) -> Result<String, FrameCodecError> {
    Ok(serde_json::to_string(frame)?)
}

pub fn decode_frame_json(data: &str) -> Result<FeedFrame, FrameCodecError> {
    Ok(serde_json::from_str(data)?)
}

/// Prefix an encoded frame with its little-endian `u32` length for the stream transport.
pub fn length_prefixed(payload: &[u8]) -> Result<Vec<u8>, FrameCodecError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameCodecError::TooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    let mut buffer = Vec::with_capacity(4 + payload.len());
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(payload);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ai_activity_conversion() {
        assert_eq!(AiActivity::Combat.as_u8(), 9);
        assert_eq!(AiActivity::from_u8(4), AiActivity::Flee);
        assert_eq!(AiActivity::from_u8(200), AiActivity::Invalid);
        assert_eq!(AiActivity::from_name(" PATROL "), Some(AiActivity::Patrol));
        assert_eq!(AiActivity::from_name("dancing"), None);
    }

    #[test]
    fn tags_render_as_text() {
        let creo = tag_from_str("CREO").unwrap();
        assert_eq!(creo, 0x4352_454f);
        assert_eq!(tag_to_string(creo), "CREO");
        assert_eq!(tag_to_string(tag_from_str("TA").unwrap()), "TA");
        assert_eq!(tag_to_string(0x0000_0001), "0x00000001");
        assert_eq!(tag_from_str("TOOLONG"), None);
    }

    #[test]
    fn frame_survives_bincode_and_json() {
        let frame = FeedFrame::new(
            WorldId(3),
            FeedMessage::Cells(vec![CellStatusUpdate {
                cell: CellKey::new(-100, 200),
                controlling_servers: vec![4, 7],
                is_loaded: true,
                subscriber_count: 2,
            }]),
        );
        let bytes = encode_frame(&frame).unwrap();
        assert_eq!(decode_frame(&bytes).unwrap(), frame);

        let json = encode_frame_json(&frame).unwrap();
        assert_eq!(decode_frame_json(&json).unwrap(), frame);
    }

    #[test]
    fn delete_flag_defaults_off_in_json() {
        let json = r#"{"world":1,"message":{"Entities":[{"id":9,"location":[1.0,2.0,3.0],
            "object_type_tag":0,"template_crc":0,"interest_radius":0.0,
            "authoritative_server":1,"level":1,"hibernating_counter":0,
            "ai_activity":6,"creation_type":0}]}}"#;
        let frame = decode_frame_json(json).unwrap();
        let FeedMessage::Entities(batch) = frame.message else {
            panic!("expected entity batch");
        };
        assert!(!batch[0].delete);
        assert_eq!(batch[0].ai_activity, AiActivity::Patrol);
    }

    #[test]
    fn length_prefix_is_little_endian() {
        let framed = length_prefixed(&[1, 2, 3]).unwrap();
        assert_eq!(&framed[..4], &3u32.to_le_bytes());
        assert_eq!(&framed[4..], &[1, 2, 3]);
    }
}
