use super::index::{IndexViolation, StoreIndices};
use super::persistence::SignFile;
use crate::core::{Owner, RegionKey, Result, Rgb, SignError, SignId, SignRecord, SpatialKey};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

/// Primary map plus its derived indices. Always locked together so no
/// caller can observe a key that is indexed but not stored, or the reverse.
#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<SpatialKey, SignRecord>,
    indices: StoreIndices,
}

impl StoreState {
    fn insert(&mut self, key: SpatialKey, record: SignRecord) -> Option<SignRecord> {
        let previous = self.remove(&key);
        self.indices.insert(&key, &record);
        self.records.insert(key, record);
        previous
    }

    fn remove(&mut self, key: &SpatialKey) -> Option<SignRecord> {
        let removed = self.records.remove(key)?;
        self.indices.remove(key, &removed);
        Some(removed)
    }

    fn fresh_id(&self) -> SignId {
        SignId::generate_unique(|candidate| self.indices.contains_id(candidate))
    }

    /// Gives `record` an id nobody else at another slot holds.
    fn ensure_unique_id(&self, key: &SpatialKey, record: &mut SignRecord) {
        let clash = record.id().is_empty()
            || self
                .indices
                .key_for_id(record.id())
                .is_some_and(|holder| holder != key);
        if clash {
            let id = self.fresh_id();
            if !record.id().is_empty() {
                warn!(key = %key, old_id = %record.id(), new_id = %id, "Sign id collision, regenerated id");
            }
            record.set_id(id);
        }
    }

    fn rebuild_indices(&mut self) {
        self.indices.clear();
        for (key, record) in &self.records {
            self.indices.insert(key, record);
        }
    }

    /// Assigns fresh ids to records that have none or share one with another
    /// record. Returns how many were changed.
    fn repair_ids(&mut self) -> usize {
        let mut seen: HashSet<SignId> = HashSet::new();
        let mut needs_id = Vec::new();

        let mut keys: Vec<&SpatialKey> = self.records.keys().collect();
        keys.sort();
        for key in keys {
            let id = self.records[key].id();
            if id.is_empty() || !seen.insert(id.clone()) {
                needs_id.push(key.clone());
            }
        }

        for key in &needs_id {
            let id = SignId::generate_unique(|candidate| seen.contains(candidate));
            seen.insert(id.clone());
            if let Some(record) = self.records.get_mut(key) {
                debug!(key = %key, id = %id, "Assigned id to sign without a unique id");
                record.set_id(id);
            }
        }

        if !needs_id.is_empty() {
            self.rebuild_indices();
        }
        needs_id.len()
    }
}

/// Thread-safe, indexed store of every sign, backed by one JSON file.
///
/// Mutations only mark the store dirty; the file is rewritten by
/// [`RecordStore::flush_if_dirty`] / [`RecordStore::force_flush`].
#[derive(Debug)]
pub struct RecordStore {
    file: SignFile,
    state: RwLock<StoreState>,
    dirty: AtomicBool,
    write_gate: Mutex<()>,
}

impl RecordStore {
    /// Opens the store at `path`, loading it eagerly.
    ///
    /// A file that is not valid JSON is moved aside and the store starts
    /// empty. Other I/O errors are returned.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = SignFile::new(path);
        let loaded = match file.load() {
            Ok(loaded) => loaded,
            Err(SignError::Serialization(err)) => {
                let moved = file.quarantine()?;
                error!(
                    path = %file.path().display(),
                    moved_to = %moved.display(),
                    error = %err,
                    "Signs file is unreadable, starting empty"
                );
                Default::default()
            }
            Err(err) => return Err(err),
        };

        let mut state = StoreState::default();
        for (key, record) in loaded.records {
            state.records.insert(key, record);
        }
        state.rebuild_indices();
        let repaired = state.repair_ids();

        info!(
            signs = state.records.len(),
            ids = state.indices.id_count(),
            regions = state.indices.region_count(),
            skipped = loaded.skipped.len(),
            "Loaded signs"
        );

        let store = Self {
            file,
            state: RwLock::new(state),
            dirty: AtomicBool::new(false),
            write_gate: Mutex::new(()),
        };
        if repaired > 0 || !loaded.skipped.is_empty() {
            store.mark_dirty();
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn get(&self, key: &SpatialKey) -> Option<SignRecord> {
        self.read().records.get(key).cloned()
    }

    pub fn contains(&self, key: &SpatialKey) -> bool {
        self.read().records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    pub fn keys(&self) -> Vec<SpatialKey> {
        self.read().records.keys().cloned().collect()
    }

    pub fn keys_with_text(&self) -> Vec<SpatialKey> {
        self.read()
            .records
            .iter()
            .filter(|(_, record)| record.has_text())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Looks a sign up by id.
    ///
    /// An id entry pointing at a slot that no longer holds that id is pruned
    /// and reported as not found.
    pub fn find_by_id(&self, id: &SignId) -> Option<(SpatialKey, SignRecord)> {
        if id.is_empty() {
            return None;
        }

        {
            let state = self.read();
            let key = state.indices.key_for_id(id)?;
            if let Some(record) = state.records.get(key)
                && record.id() == id
            {
                return Some((key.clone(), record.clone()));
            }
        }

        let mut state = self.write();
        let key = state.indices.key_for_id(id)?.clone();
        if let Some(record) = state.records.get(&key)
            && record.id() == id
        {
            return Some((key, record.clone()));
        }
        state.indices.forget_id(id);
        warn!(id = %id, key = %key, "Pruned stale sign id index entry");
        None
    }

    pub fn keys_in_region(&self, region: &RegionKey) -> HashSet<SpatialKey> {
        self.read()
            .indices
            .region(region)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_records_in_region(&self, region: &RegionKey) -> bool {
        self.read().indices.region(region).is_some()
    }

    pub fn keys_in_collection(&self, name: &str) -> HashSet<SpatialKey> {
        self.read()
            .indices
            .collection(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Every record of a collection, ordered by position.
    pub fn records_in_collection(&self, name: &str) -> Vec<(SpatialKey, SignRecord)> {
        let state = self.read();
        let mut out: Vec<(SpatialKey, SignRecord)> = state
            .indices
            .collection(name)
            .into_iter()
            .flatten()
            .filter_map(|key| state.records.get(key).map(|rec| (key.clone(), rec.clone())))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().indices.collections().map(String::from).collect();
        names.sort();
        names
    }

    pub fn region_count(&self) -> usize {
        self.read().indices.region_count()
    }

    /// The slot in `collection` whose block centre is closest to `point`,
    /// if any lies within `radius`.
    pub fn nearest_within(
        &self,
        collection: &str,
        point: (f64, f64, f64),
        radius: f64,
    ) -> Option<SpatialKey> {
        let state = self.read();
        let limit = radius * radius;
        state
            .indices
            .collection(collection)?
            .iter()
            .map(|key| (key, key.distance_sq_to(point)))
            .filter(|(_, dist)| *dist <= limit)
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(key, _)| key.clone())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Creates an empty sign at `key` with a fresh id, replacing whatever was
    /// there.
    pub fn create_at(&self, key: &SpatialKey, owner: Option<Owner>) -> SignRecord {
        let mut state = self.write();
        let id = state.fresh_id();
        let record = match owner {
            Some(owner) => SignRecord::with_owner(id, owner),
            None => SignRecord::new(id),
        };
        state.insert(key.clone(), record.clone());
        drop(state);

        self.mark_dirty();
        debug!(key = %key, id = %record.id(), "Created sign");
        record
    }

    /// Inserts or replaces the record at `key`. Returns the replaced record.
    ///
    /// A record without an id, or with an id already held by a different
    /// slot, is given a fresh one.
    pub fn upsert(&self, key: &SpatialKey, mut record: SignRecord) -> Option<SignRecord> {
        let mut state = self.write();
        state.ensure_unique_id(key, &mut record);
        let previous = state.insert(key.clone(), record);
        drop(state);

        self.mark_dirty();
        previous
    }

    /// Applies `f` to the record at `key`. Returns the updated record, or
    /// `None` when there is no record there.
    pub fn update<F>(&self, key: &SpatialKey, f: F) -> Option<SignRecord>
    where
        F: FnOnce(&mut SignRecord),
    {
        let mut state = self.write();
        let mut record = state.records.get(key)?.clone();
        f(&mut record);
        if record.id().is_empty() {
            let id = state.fresh_id();
            record.set_id(id);
        }
        state.insert(key.clone(), record.clone());
        drop(state);

        self.mark_dirty();
        Some(record)
    }

    pub fn set_lines<I, S>(&self, key: &SpatialKey, lines: I) -> Option<SignRecord>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.update(key, |record| record.set_lines(lines))
    }

    /// Sets one line. Out-of-range indices and missing records are rejected
    /// without touching the store.
    pub fn set_line(&self, key: &SpatialKey, index: usize, text: &str) -> Result<SignRecord> {
        let mut state = self.write();
        let mut record = state
            .records
            .get(key)
            .cloned()
            .ok_or_else(|| SignError::NotFound(key.to_string()))?;
        record.set_line(index, text)?;
        state.insert(key.clone(), record.clone());
        drop(state);

        self.mark_dirty();
        Ok(record)
    }

    pub fn set_color(&self, key: &SpatialKey, color: Rgb) -> Option<SignRecord> {
        self.update(key, |record| record.set_color(color))
    }

    pub fn set_glowing(&self, key: &SpatialKey, glowing: bool) -> Option<SignRecord> {
        self.update(key, |record| record.set_glowing(glowing))
    }

    pub fn remove_at(&self, key: &SpatialKey) -> Option<SignRecord> {
        let removed = self.write().remove(key)?;
        self.mark_dirty();
        debug!(key = %key, id = %removed.id(), "Removed sign");
        Some(removed)
    }

    pub fn remove_by_id(&self, id: &SignId) -> Option<SpatialKey> {
        let (key, _) = self.find_by_id(id)?;

        let mut state = self.write();
        // The slot may have changed hands since the lookup.
        let still_there = state.records.get(&key).is_some_and(|record| record.id() == id);
        if !still_there {
            return None;
        }
        state.remove(&key);
        drop(state);

        self.mark_dirty();
        debug!(id = %id, key = %key, "Removed sign by id");
        Some(key)
    }

    // ========================================================================
    // Index maintenance
    // ========================================================================

    /// Recomputes every derived index from the primary map.
    pub fn rebuild_indices(&self) {
        let mut state = self.write();
        state.rebuild_indices();
        info!(
            ids = state.indices.id_count(),
            regions = state.indices.region_count(),
            collections = state.indices.collection_count(),
            "Rebuilt sign indices"
        );
    }

    /// Gives every record lacking a unique id a fresh one.
    pub fn regenerate_missing_ids(&self) -> usize {
        let repaired = self.write().repair_ids();
        if repaired > 0 {
            self.mark_dirty();
        }
        repaired
    }

    pub fn verify_indices(&self) -> Vec<IndexViolation> {
        let state = self.read();
        state.indices.verify(&state.records)
    }

    // ========================================================================
    // Dirty flag & flushing
    // ========================================================================

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Writes the file if anything changed since the last write.
    ///
    /// Returns `Ok(true)` when a write happened. On failure the store is
    /// marked dirty again so the next attempt retries.
    pub fn flush_if_dirty(&self) -> Result<bool> {
        if self
            .dirty
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(false);
        }
        self.write_file()?;
        Ok(true)
    }

    /// Writes the file unconditionally.
    pub fn force_flush(&self) -> Result<()> {
        self.dirty.store(false, Ordering::Release);
        self.write_file()
    }

    fn write_file(&self) -> Result<()> {
        let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.snapshot();
        match self.file.save(&snapshot) {
            Ok(()) => {
                debug!(signs = snapshot.len(), path = %self.file.path().display(), "Saved signs");
                Ok(())
            }
            Err(err) => {
                self.mark_dirty();
                warn!(error = %err, path = %self.file.path().display(), "Failed to save signs");
                Err(err)
            }
        }
    }

    /// The primary map keyed by its textual form, ready for serialization.
    pub fn snapshot(&self) -> BTreeMap<String, SignRecord> {
        self.read()
            .records
            .iter()
            .map(|(key, record)| (key.to_string(), record.clone()))
            .collect()
    }
}
