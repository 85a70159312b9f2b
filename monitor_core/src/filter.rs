//! Visibility filter applied to every entity before it reaches the map.
//!
//! [`is_visible`] is the only predicate; it is called once per entity update
//! and once per stored entity whenever the filter changes, so it never
//! allocates or validates. Raw user input is validated up front by
//! converting a [`FilterSpec`] into a [`VisibilityFilter`].

use std::collections::BTreeSet;

use monitor_proto::{tag_from_str, AiActivity, ServerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entities::Entity;

/// Validated filter configuration. Empty allowlists pass everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityFilter {
    /// Inclusive level bounds, always ordered `min <= max`.
    pub level_range: (i32, i32),
    pub object_types: BTreeSet<u32>,
    pub authoritative_servers: BTreeSet<ServerId>,
    pub ai_activities: BTreeSet<AiActivity>,
    /// Template CRC that must match exactly; zero disables the check.
    pub template_crc: u32,
    pub include_hibernating: bool,
}

impl Default for VisibilityFilter {
    fn default() -> Self {
        Self {
            level_range: (i32::MIN, i32::MAX),
            object_types: BTreeSet::new(),
            authoritative_servers: BTreeSet::new(),
            ai_activities: BTreeSet::new(),
            template_crc: 0,
            include_hibernating: true,
        }
    }
}

impl VisibilityFilter {
    pub fn with_level_range(mut self, min: i32, max: i32) -> Self {
        self.level_range = if min <= max { (min, max) } else { (max, min) };
        self
    }

    pub fn with_object_types(mut self, tags: impl IntoIterator<Item = u32>) -> Self {
        self.object_types = tags.into_iter().collect();
        self
    }

    pub fn with_servers(mut self, servers: impl IntoIterator<Item = ServerId>) -> Self {
        self.authoritative_servers = servers.into_iter().collect();
        self
    }

    pub fn with_ai_activities(mut self, activities: impl IntoIterator<Item = AiActivity>) -> Self {
        self.ai_activities = activities.into_iter().collect();
        self
    }

    pub fn with_template_crc(mut self, crc: u32) -> Self {
        self.template_crc = crc;
        self
    }

    pub fn with_hibernating(mut self, include: bool) -> Self {
        self.include_hibernating = include;
        self
    }
}

/// Whether `entity` passes every predicate of `filter`.
#[inline]
pub fn is_visible(entity: &Entity, filter: &VisibilityFilter) -> bool {
    let (min_level, max_level) = filter.level_range;
    entity.level >= min_level
        && entity.level <= max_level
        && (filter.object_types.is_empty() || filter.object_types.contains(&entity.object_type_tag))
        && (filter.authoritative_servers.is_empty()
            || filter
                .authoritative_servers
                .contains(&entity.authoritative_server))
        && (filter.ai_activities.is_empty() || filter.ai_activities.contains(&entity.ai_activity))
        && (filter.template_crc == 0 || filter.template_crc == entity.template_crc)
        && (filter.include_hibernating || !entity.hibernating)
}

/// Unvalidated filter input as typed by an operator or read from config.
///
/// Lists are comma separated. Object types accept four-character tags
/// (`CREO`) or numbers; numbers accept decimal or `0x` hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    pub level_min: String,
    pub level_max: String,
    pub object_types: String,
    pub authoritative_servers: String,
    pub ai_activities: String,
    pub template_crc: String,
    pub include_hibernating: bool,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            level_min: String::new(),
            level_max: String::new(),
            object_types: String::new(),
            authoritative_servers: String::new(),
            ai_activities: String::new(),
            template_crc: String::new(),
            include_hibernating: true,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("{field} bound {value:?} is not a number")]
    InvalidBound { field: &'static str, value: String },
    #[error("object type {0:?} is neither a tag nor a number")]
    InvalidObjectType(String),
    #[error("server id {0:?} is not a number")]
    InvalidServer(String),
    #[error("unknown ai activity {0:?}")]
    InvalidAiActivity(String),
    #[error("template crc {0:?} is not a number")]
    InvalidTemplateCrc(String),
}

impl TryFrom<&FilterSpec> for VisibilityFilter {
    type Error = FilterError;

    fn try_from(spec: &FilterSpec) -> Result<Self, Self::Error> {
        let min = parse_bound("level_min", &spec.level_min)?.unwrap_or(i32::MIN);
        let max = parse_bound("level_max", &spec.level_max)?.unwrap_or(i32::MAX);

        let object_types = split_list(&spec.object_types)
            .map(|item| {
                parse_number(item)
                    .or_else(|| tag_from_str(item))
                    .ok_or_else(|| FilterError::InvalidObjectType(item.to_string()))
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        let authoritative_servers = split_list(&spec.authoritative_servers)
            .map(|item| parse_number(item).ok_or_else(|| FilterError::InvalidServer(item.to_string())))
            .collect::<Result<BTreeSet<_>, _>>()?;

        let ai_activities = split_list(&spec.ai_activities)
            .map(|item| {
                AiActivity::from_name(item)
                    .or_else(|| {
                        item.parse::<u8>()
                            .ok()
                            .map(AiActivity::from_u8)
                            .filter(|activity| *activity != AiActivity::Invalid)
                    })
                    .ok_or_else(|| FilterError::InvalidAiActivity(item.to_string()))
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        let template_crc = match spec.template_crc.trim() {
            "" => 0,
            text => parse_number(text)
                .ok_or_else(|| FilterError::InvalidTemplateCrc(text.to_string()))?,
        };

        Ok(VisibilityFilter {
            level_range: (0, 0),
            object_types,
            authoritative_servers,
            ai_activities,
            template_crc,
            include_hibernating: spec.include_hibernating,
        }
        .with_level_range(min, max))
    }
}

impl TryFrom<FilterSpec> for VisibilityFilter {
    type Error = FilterError;

    fn try_from(spec: FilterSpec) -> Result<Self, Self::Error> {
        VisibilityFilter::try_from(&spec)
    }
}

fn split_list(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn parse_number(text: &str) -> Option<u32> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Empty means unbounded; fractional input is rounded to the nearest level.
fn parse_bound(field: &'static str, text: &str) -> Result<Option<i32>, FilterError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if let Ok(value) = text.parse::<i32>() {
        return Ok(Some(value));
    }
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => {
            Ok(Some(value.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32))
        }
        _ => Err(FilterError::InvalidBound {
            field,
            value: text.to_string(),
        }),
    }
}
