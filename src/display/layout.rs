use crate::core::SpatialKey;
use serde::{Deserialize, Serialize};

/// World position a display line is spawned at.
#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub collection: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Vertical stacking of display lines above a sign.
///
/// Line `i` sits at `base_offset - i * line_spacing` above the block, centred
/// on it horizontally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineLayout {
    pub base_offset: f64,
    pub line_spacing: f64,
}

impl Default for LineLayout {
    fn default() -> Self {
        Self {
            base_offset: 1.0,
            line_spacing: 0.25,
        }
    }
}

impl LineLayout {
    pub fn anchor(&self, key: &SpatialKey, line_index: usize) -> Anchor {
        let y_offset = self.base_offset - line_index as f64 * self.line_spacing;
        Anchor {
            collection: key.collection().to_string(),
            x: f64::from(key.x()) + 0.5,
            y: f64::from(key.y()) + y_offset,
            z: f64::from(key.z()) + 0.5,
        }
    }
}
