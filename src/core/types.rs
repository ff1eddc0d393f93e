use super::error::{Result, SignError};
use std::fmt;
use std::str::FromStr;

/// Edge length of a region, in blocks. Regions are square in x/z.
pub const REGION_SIZE: i32 = 32;

/// Identifies exactly one sign slot: a block position inside a collection.
///
/// The textual form is `"<collection>:<x>:<y>:<z>"`. Collection names may
/// themselves contain `:`, the coordinates are always the last three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpatialKey {
    collection: String,
    x: i32,
    y: i32,
    z: i32,
}

impl SpatialKey {
    pub fn new(collection: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            collection: collection.into(),
            x,
            y,
            z,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn z(&self) -> i32 {
        self.z
    }

    /// The region this slot belongs to.
    ///
    /// This is the only place the position -> region mapping is computed;
    /// the store's region index and the reconciler's activity gating both
    /// go through it.
    pub fn region(&self) -> RegionKey {
        RegionKey::new(
            self.collection.clone(),
            self.x.div_euclid(REGION_SIZE),
            self.z.div_euclid(REGION_SIZE),
        )
    }

    /// Squared distance from `point` to the centre of this block.
    pub fn distance_sq_to(&self, point: (f64, f64, f64)) -> f64 {
        let dx = point.0 - (f64::from(self.x) + 0.5);
        let dy = point.1 - (f64::from(self.y) + 0.5);
        let dz = point.2 - (f64::from(self.z) + 0.5);
        dx * dx + dy * dy + dz * dz
    }
}

impl fmt::Display for SpatialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.collection, self.x, self.y, self.z)
    }
}

impl FromStr for SpatialKey {
    type Err = SignError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SignError::InvalidKey(s.to_string());

        let mut parts = s.rsplitn(4, ':');
        let z = parts.next().ok_or_else(invalid)?;
        let y = parts.next().ok_or_else(invalid)?;
        let x = parts.next().ok_or_else(invalid)?;
        let collection = parts.next().ok_or_else(invalid)?;

        if collection.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            collection: collection.to_string(),
            x: x.parse().map_err(|_| invalid())?,
            y: y.parse().map_err(|_| invalid())?,
            z: z.parse().map_err(|_| invalid())?,
        })
    }
}

/// Coarse square bucket of positions, used for activity gating and the
/// store's region index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionKey {
    collection: String,
    region_x: i32,
    region_z: i32,
}

impl RegionKey {
    pub fn new(collection: impl Into<String>, region_x: i32, region_z: i32) -> Self {
        Self {
            collection: collection.into(),
            region_x,
            region_z,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn region_x(&self) -> i32 {
        self.region_x
    }

    pub fn region_z(&self) -> i32 {
        self.region_z
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.collection, self.region_x, self.region_z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_and_parse() {
        let key = SpatialKey::new("world", -5, 64, 1024);
        assert_eq!(key.to_string(), "world:-5:64:1024");

        let parsed: SpatialKey = "world:-5:64:1024".parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_collection_with_colon() {
        let parsed: SpatialKey = "instance:arena:1:2:3".parse().unwrap();
        assert_eq!(parsed.collection(), "instance:arena");
        assert_eq!((parsed.x(), parsed.y(), parsed.z()), (1, 2, 3));
    }

    #[test]
    fn test_malformed_keys_rejected() {
        for bad in ["", "world", "world:1:2", ":1:2:3", "world:a:2:3", "world:1:2:3.5"] {
            assert!(bad.parse::<SpatialKey>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_region_floor_division() {
        assert_eq!(SpatialKey::new("w", 1, 2, 3).region(), RegionKey::new("w", 0, 0));
        assert_eq!(SpatialKey::new("w", 31, 0, 32).region(), RegionKey::new("w", 0, 1));
        assert_eq!(SpatialKey::new("w", -1, 0, -32).region(), RegionKey::new("w", -1, -1));
        assert_eq!(SpatialKey::new("w", -33, 0, 0).region(), RegionKey::new("w", -2, 0));
    }

    #[test]
    fn test_distance_to_block_centre() {
        let key = SpatialKey::new("w", 0, 0, 0);
        assert_eq!(key.distance_sq_to((0.5, 0.5, 0.5)), 0.0);
        assert_eq!(key.distance_sq_to((3.5, 0.5, 0.5)), 9.0);
    }
}
