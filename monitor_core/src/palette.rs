//! Fixed color palettes cycled by ordinal.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Linear RGBA color written into instance and region buffers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgba(pub [f32; 4]);

impl Rgba {
    pub const WHITE: Rgba = Rgba([1.0, 1.0, 1.0, 1.0]);

    pub fn from_hex(text: &str) -> Result<Self, ColorParseError> {
        let digits = text.trim().trim_start_matches('#');
        if digits.len() != 6 && digits.len() != 8 {
            return Err(ColorParseError(text.to_string()));
        }
        let mut channels = [1.0f32; 4];
        for (idx, chunk) in digits.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| ColorParseError(text.to_string()))?;
            let value =
                u8::from_str_radix(pair, 16).map_err(|_| ColorParseError(text.to_string()))?;
            channels[idx] = value as f32 / 255.0;
        }
        Ok(Self(channels))
    }

    pub fn to_hex(self) -> String {
        let [r, g, b, a] = self.0.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        if a == u8::MAX {
            format!("#{r:02x}{g:02x}{b:02x}")
        } else {
            format!("#{r:02x}{g:02x}{b:02x}{a:02x}")
        }
    }

    /// 8-bit RGB triple, used by the terminal inspector.
    pub fn to_rgb8(self) -> (u8, u8, u8) {
        let [r, g, b, _] = self.0.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        (r, g, b)
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Rgba {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Rgba::from_hex(&value)
    }
}

impl From<Rgba> for String {
    fn from(value: Rgba) -> Self {
        value.to_hex()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid hex color {0:?}")]
pub struct ColorParseError(pub String);

/// Finite palette indexed modulo its length.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    colors: Vec<Rgba>,
}

impl Palette {
    /// An empty list falls back to a single white entry so lookups never fail.
    pub fn new(colors: Vec<Rgba>) -> Self {
        if colors.is_empty() {
            return Self {
                colors: vec![Rgba::WHITE],
            };
        }
        Self { colors }
    }

    pub fn color_for(&self, ordinal: usize) -> Rgba {
        self.colors[ordinal % self.colors.len()]
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::new(default_palette())
    }
}

pub(crate) fn default_palette() -> Vec<Rgba> {
    [
        "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
        "#bcf60c", "#fabebe", "#008080", "#e6beff",
    ]
    .iter()
    .filter_map(|hex| Rgba::from_hex(hex).ok())
    .collect()
}
