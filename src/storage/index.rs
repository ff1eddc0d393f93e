use crate::core::{RegionKey, SignId, SignRecord, SpatialKey};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// A broken invariant between the primary map and one of the derived indices.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexViolation {
    #[error("{0} is stored but missing from its region bucket")]
    MissingFromRegion(SpatialKey),

    #[error("{0} is stored but missing from its collection bucket")]
    MissingFromCollection(SpatialKey),

    #[error("{key} has id '{id}' but the id index does not point at it")]
    MissingId { key: SpatialKey, id: SignId },

    #[error("region {region} lists {key}, which is not stored there")]
    StaleRegionEntry { region: RegionKey, key: SpatialKey },

    #[error("collection '{collection}' lists {key}, which is not stored there")]
    StaleCollectionEntry { collection: String, key: SpatialKey },

    #[error("id '{id}' points at {key}, which does not hold that id")]
    StaleId { id: SignId, key: SpatialKey },

    #[error("empty bucket left behind for {0}")]
    EmptyBucket(String),
}

/// Derived lookups over the primary map: by id, by region, by collection.
///
/// Nothing here is authoritative. Every mutation of the primary map must be
/// mirrored with [`StoreIndices::insert`] / [`StoreIndices::remove`] while the
/// same lock is held.
#[derive(Debug, Default, Clone)]
pub struct StoreIndices {
    by_id: HashMap<SignId, SpatialKey>,
    by_region: HashMap<RegionKey, HashSet<SpatialKey>>,
    by_collection: HashMap<String, HashSet<SpatialKey>>,
}

impl StoreIndices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &SpatialKey, record: &SignRecord) {
        if !record.id().is_empty() {
            self.by_id.insert(record.id().clone(), key.clone());
        }
        self.by_region
            .entry(key.region())
            .or_default()
            .insert(key.clone());
        self.by_collection
            .entry(key.collection().to_string())
            .or_default()
            .insert(key.clone());
    }

    pub fn remove(&mut self, key: &SpatialKey, record: &SignRecord) {
        // Only drop the id entry if it still points here; a colliding id may
        // have been re-pointed at another slot.
        if self.by_id.get(record.id()) == Some(key) {
            self.by_id.remove(record.id());
        }

        let region = key.region();
        if let Some(bucket) = self.by_region.get_mut(&region) {
            bucket.remove(key);
            if bucket.is_empty() {
                self.by_region.remove(&region);
            }
        }

        if let Some(bucket) = self.by_collection.get_mut(key.collection()) {
            bucket.remove(key);
            if bucket.is_empty() {
                self.by_collection.remove(key.collection());
            }
        }
    }

    pub fn key_for_id(&self, id: &SignId) -> Option<&SpatialKey> {
        self.by_id.get(id)
    }

    pub fn contains_id(&self, id: &SignId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn forget_id(&mut self, id: &SignId) -> Option<SpatialKey> {
        self.by_id.remove(id)
    }

    pub fn region(&self, region: &RegionKey) -> Option<&HashSet<SpatialKey>> {
        self.by_region.get(region)
    }

    pub fn collection(&self, name: &str) -> Option<&HashSet<SpatialKey>> {
        self.by_collection.get(name)
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.by_collection.keys().map(String::as_str)
    }

    pub fn id_count(&self) -> usize {
        self.by_id.len()
    }

    pub fn region_count(&self) -> usize {
        self.by_region.len()
    }

    pub fn collection_count(&self) -> usize {
        self.by_collection.len()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_region.clear();
        self.by_collection.clear();
    }

    /// Checks every index invariant against `records` and returns what is broken.
    pub fn verify(&self, records: &HashMap<SpatialKey, SignRecord>) -> Vec<IndexViolation> {
        let mut violations = Vec::new();

        for (key, record) in records {
            let in_region = self
                .by_region
                .get(&key.region())
                .is_some_and(|bucket| bucket.contains(key));
            if !in_region {
                violations.push(IndexViolation::MissingFromRegion(key.clone()));
            }

            let in_collection = self
                .by_collection
                .get(key.collection())
                .is_some_and(|bucket| bucket.contains(key));
            if !in_collection {
                violations.push(IndexViolation::MissingFromCollection(key.clone()));
            }

            if !record.id().is_empty() && self.by_id.get(record.id()) != Some(key) {
                violations.push(IndexViolation::MissingId {
                    key: key.clone(),
                    id: record.id().clone(),
                });
            }
        }

        for (region, bucket) in &self.by_region {
            if bucket.is_empty() {
                violations.push(IndexViolation::EmptyBucket(format!("region {}", region)));
            }
            for key in bucket {
                if !records.contains_key(key) || &key.region() != region {
                    violations.push(IndexViolation::StaleRegionEntry {
                        region: region.clone(),
                        key: key.clone(),
                    });
                }
            }
        }

        for (collection, bucket) in &self.by_collection {
            if bucket.is_empty() {
                violations.push(IndexViolation::EmptyBucket(format!("collection {}", collection)));
            }
            for key in bucket {
                if !records.contains_key(key) || key.collection() != collection {
                    violations.push(IndexViolation::StaleCollectionEntry {
                        collection: collection.clone(),
                        key: key.clone(),
                    });
                }
            }
        }

        for (id, key) in &self.by_id {
            let holds_id = records.get(key).is_some_and(|record| record.id() == id);
            if !holds_id {
                violations.push(IndexViolation::StaleId {
                    id: id.clone(),
                    key: key.clone(),
                });
            }
        }

        violations
    }
}
