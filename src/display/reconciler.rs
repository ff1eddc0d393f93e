use super::executor::{CollectionExecutor, Job};
use super::layout::LineLayout;
use super::projection::{Plan, Projection, plan};
use super::provider::{RegionOracle, RenderProvider};
use crate::core::{RegionKey, SpatialKey};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, oneshot};
use tracing::{debug, error, info, warn};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    provider: Arc<dyn RenderProvider>,
    oracle: Arc<dyn RegionOracle>,
    executor: Arc<dyn CollectionExecutor>,
    layout: LineLayout,
    projections: Mutex<HashMap<SpatialKey, Projection>>,
    dirty: Mutex<HashSet<SpatialKey>>,
    deferred: Mutex<HashMap<RegionKey, HashSet<SpatialKey>>>,
    collections: Mutex<HashSet<String>>,
    wakeup: Notify,
}

/// Keeps the render surface in line with record text.
///
/// Bookkeeping (projections, the needs-resync set) is safe to touch from any
/// thread. Every render-handle call is queued on the executor lane of the
/// key's collection, so `materialize` and `clear` return before the surface
/// changes; use [`Reconciler::quiesce`] to wait for it.
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

impl Reconciler {
    pub fn new(
        provider: Arc<dyn RenderProvider>,
        oracle: Arc<dyn RegionOracle>,
        executor: Arc<dyn CollectionExecutor>,
        layout: LineLayout,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                oracle,
                executor,
                layout,
                projections: Mutex::new(HashMap::new()),
                dirty: Mutex::new(HashSet::new()),
                deferred: Mutex::new(HashMap::new()),
                collections: Mutex::new(HashSet::new()),
                wakeup: Notify::new(),
            }),
        }
    }

    pub fn layout(&self) -> LineLayout {
        self.inner.layout
    }

    // ========================================================================
    // Handle side
    // ========================================================================

    /// Brings the display at `key` in line with `lines`. Empty lines are
    /// ignored; no text at all clears the display.
    pub fn materialize(&self, key: &SpatialKey, lines: Vec<String>) {
        let lines: Vec<String> = lines.into_iter().filter(|line| !line.is_empty()).collect();
        if lines.is_empty() {
            self.clear(key);
            return;
        }

        let region = key.region();
        if !self.inner.oracle.is_active(&region) {
            self.inner.defer(key, region);
            return;
        }

        let inner = self.inner.clone();
        let job_key = key.clone();
        self.inner
            .dispatch(key.collection(), Box::new(move || inner.apply(&job_key, lines)));
    }

    /// Destroys the display at `key` and forgets it.
    pub fn clear(&self, key: &SpatialKey) {
        locked(&self.inner.dirty).remove(key);

        let inner = self.inner.clone();
        let job_key = key.clone();
        self.inner
            .dispatch(key.collection(), Box::new(move || inner.teardown(&job_key)));
    }

    /// Waits until every job queued before this call has run.
    pub async fn quiesce(&self) {
        let collections: Vec<String> = locked(&self.inner.collections).iter().cloned().collect();
        let barriers = collections.into_iter().map(|collection| {
            let (tx, rx) = oneshot::channel::<()>();
            self.inner.executor.execute(
                &collection,
                Box::new(move || {
                    let _ = tx.send(());
                }),
            );
            rx
        });
        join_all(barriers).await;
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    /// Forgets the projection at `key` without touching its handles.
    pub fn invalidate(&self, key: &SpatialKey) {
        locked(&self.inner.projections).remove(key);
    }

    /// Forgets every projection. Used after the render surface was torn
    /// down, when all known handles must be assumed gone.
    pub fn invalidate_all(&self) {
        let mut projections = locked(&self.inner.projections);
        let dropped = projections.len();
        projections.clear();
        info!(dropped, "Invalidated all sign displays");
    }

    pub fn has_projection(&self, key: &SpatialKey) -> bool {
        locked(&self.inner.projections).contains_key(key)
    }

    pub fn projection(&self, key: &SpatialKey) -> Option<Projection> {
        locked(&self.inner.projections).get(key).cloned()
    }

    /// Every key currently holding a projection.
    pub fn projected_keys(&self) -> Vec<SpatialKey> {
        locked(&self.inner.projections).keys().cloned().collect()
    }

    pub fn projection_count(&self) -> usize {
        locked(&self.inner.projections).len()
    }

    pub fn mark_dirty(&self, key: SpatialKey) {
        locked(&self.inner.dirty).insert(key);
    }

    pub fn mark_all_dirty<I>(&self, keys: I)
    where
        I: IntoIterator<Item = SpatialKey>,
    {
        locked(&self.inner.dirty).extend(keys);
    }

    /// Takes the whole needs-resync set, leaving an empty one behind.
    pub fn drain_dirty(&self) -> HashSet<SpatialKey> {
        mem::take(&mut *locked(&self.inner.dirty))
    }

    pub fn has_dirty(&self) -> bool {
        !locked(&self.inner.dirty).is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        locked(&self.inner.dirty).len()
    }

    pub fn is_dirty(&self, key: &SpatialKey) -> bool {
        locked(&self.inner.dirty).contains(key)
    }

    /// Keys waiting for `region` to become active.
    pub fn deferred_in(&self, region: &RegionKey) -> HashSet<SpatialKey> {
        locked(&self.inner.deferred)
            .get(region)
            .cloned()
            .unwrap_or_default()
    }

    /// Re-marks every key deferred on `region` and wakes whoever waits in
    /// [`Reconciler::wait_for_wakeup`].
    pub fn region_activated(&self, region: &RegionKey) {
        self.inner.region_activated(region);
    }

    /// Requests an immediate resync pass.
    pub fn wake(&self) {
        self.inner.wakeup.notify_one();
    }

    /// Resolves on the next [`Reconciler::wake`] or region activation. A
    /// wakeup that happened while nobody waited is not lost.
    pub async fn wait_for_wakeup(&self) {
        self.inner.wakeup.notified().await;
    }
}

impl Inner {
    fn dispatch(&self, collection: &str, job: Job) {
        {
            let mut collections = locked(&self.collections);
            if !collections.contains(collection) {
                collections.insert(collection.to_string());
            }
        }
        self.executor.execute(collection, job);
    }

    /// Parks `key` until `region` activates. Only the first key deferred on a
    /// region registers a callback with the oracle.
    fn defer(self: &Arc<Self>, key: &SpatialKey, region: RegionKey) {
        locked(&self.dirty).insert(key.clone());

        let first = {
            let mut deferred = locked(&self.deferred);
            let keys = deferred.entry(region.clone()).or_default();
            let first = keys.is_empty();
            keys.insert(key.clone());
            first
        };
        debug!(key = %key, region = %region, "Region inactive, deferring sign display");

        if first {
            let weak = Arc::downgrade(self);
            let activated = region.clone();
            self.oracle.run_when_active(
                &region,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.region_activated(&activated);
                    }
                }),
            );
        }
    }

    fn region_activated(&self, region: &RegionKey) {
        let keys = locked(&self.deferred).remove(region).unwrap_or_default();
        if !keys.is_empty() {
            info!(region = %region, signs = keys.len(), "Region active, resyncing deferred signs");
            locked(&self.dirty).extend(keys);
        }
        self.wakeup.notify_one();
    }

    // ------------------------------------------------------------------------
    // Executor-side work
    // ------------------------------------------------------------------------

    fn apply(self: &Arc<Self>, key: &SpatialKey, lines: Vec<String>) {
        // The region may have gone inactive since dispatch.
        let region = key.region();
        if !self.oracle.is_active(&region) {
            self.defer(key, region);
            return;
        }

        let current = locked(&self.projections).get(key).cloned();
        match plan(current.as_ref(), &lines, |handle| self.provider.is_live(handle)) {
            Plan::Keep => {}
            Plan::Clear => self.teardown(key),
            Plan::UpdateInPlace => match current {
                Some(current) if self.retext(key, &current, &lines) => {}
                other => self.recreate(key, other.as_ref(), lines),
            },
            Plan::Recreate => self.recreate(key, current.as_ref(), lines),
        }
    }

    /// Pushes new text into the existing handles. Returns false as soon as
    /// one refuses, leaving the caller to recreate.
    fn retext(&self, key: &SpatialKey, current: &Projection, lines: &[String]) -> bool {
        for (handle, text) in current.handles.iter().zip(lines) {
            if let Err(err) = self.provider.set_text(*handle, text) {
                debug!(key = %key, handle = ?handle, error = %err, "In-place update failed, recreating");
                return false;
            }
        }

        locked(&self.projections).insert(
            key.clone(),
            Projection {
                handles: current.handles.clone(),
                last_text: lines.to_vec(),
            },
        );
        debug!(key = %key, lines = lines.len(), "Updated sign display in place");
        true
    }

    fn recreate(&self, key: &SpatialKey, current: Option<&Projection>, lines: Vec<String>) {
        if let Some(current) = current {
            for handle in &current.handles {
                self.provider.destroy(*handle);
            }
        }

        let mut projection = Projection::default();
        let mut failed = 0usize;
        for (index, text) in lines.iter().enumerate() {
            let anchor = self.layout.anchor(key, index);
            let spawned = self.provider.spawn(&anchor, index).and_then(|handle| {
                match self.provider.set_text(handle, text) {
                    Ok(()) => Ok(handle),
                    Err(err) => {
                        self.provider.destroy(handle);
                        Err(err)
                    }
                }
            });
            match spawned {
                Ok(handle) => {
                    projection.handles.push(handle);
                    projection.last_text.push(text.clone());
                }
                Err(err) => {
                    failed += 1;
                    warn!(key = %key, line = index, error = %err, "Failed to spawn sign display line");
                }
            }
        }

        if failed == 0 {
            debug!(key = %key, lines = projection.len(), "Recreated sign display");
            locked(&self.projections).insert(key.clone(), projection);
            return;
        }

        // Lines must sit at their own offsets, so a gap means nothing is kept.
        let spawned = projection.len();
        for handle in projection.handles {
            self.provider.destroy(handle);
        }
        locked(&self.projections).remove(key);
        locked(&self.dirty).insert(key.clone());
        if spawned == 0 {
            error!(key = %key, lines = lines.len(), "No display line could be spawned, will retry");
        } else {
            warn!(key = %key, spawned, failed, "Sign display partially spawned, will retry");
        }
    }

    fn teardown(&self, key: &SpatialKey) {
        let Some(projection) = locked(&self.projections).remove(key) else {
            return;
        };
        for handle in projection.handles {
            self.provider.destroy(handle);
        }
        debug!(key = %key, "Cleared sign display");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::memory::{InMemoryRenderer, InlineExecutor, ManualRegionOracle};

    fn lines(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    fn setup(oracle: ManualRegionOracle) -> (Reconciler, Arc<InMemoryRenderer>, Arc<ManualRegionOracle>) {
        let renderer = Arc::new(InMemoryRenderer::new());
        let oracle = Arc::new(oracle);
        let reconciler = Reconciler::new(
            renderer.clone(),
            oracle.clone(),
            Arc::new(InlineExecutor),
            LineLayout::default(),
        );
        (reconciler, renderer, oracle)
    }

    #[test]
    fn test_materialize_spawns_one_handle_per_line() {
        let (reconciler, renderer, _) = setup(ManualRegionOracle::always_active());
        let key = SpatialKey::new("w", 1, 2, 3);

        reconciler.materialize(&key, lines(&["A", "", "B"]));

        let projection = reconciler.projection(&key).unwrap();
        assert_eq!(projection.last_text(), lines(&["A", "B"]).as_slice());
        assert_eq!(renderer.live_count(), 2);
        let second = renderer.line(projection.handles()[1]).unwrap();
        assert_eq!(second.line_index, 1);
        assert_eq!(second.anchor.y, 2.0 + 0.75);
    }

    #[test]
    fn test_unchanged_text_is_a_no_op() {
        let (reconciler, renderer, _) = setup(ManualRegionOracle::always_active());
        let key = SpatialKey::new("w", 0, 0, 0);

        reconciler.materialize(&key, lines(&["A"]));
        let before = renderer.calls();
        reconciler.materialize(&key, lines(&["A"]));
        assert_eq!(renderer.calls(), before);
    }

    #[test]
    fn test_clear_destroys_and_forgets() {
        let (reconciler, renderer, _) = setup(ManualRegionOracle::always_active());
        let key = SpatialKey::new("w", 0, 0, 0);

        reconciler.materialize(&key, lines(&["A", "B"]));
        reconciler.mark_dirty(key.clone());
        reconciler.materialize(&key, Vec::new());

        assert!(!reconciler.has_projection(&key));
        assert!(!reconciler.is_dirty(&key));
        assert_eq!(renderer.live_count(), 0);
        assert_eq!(renderer.calls().destroys, 2);
    }

    #[test]
    fn test_invalidate_keeps_handles() {
        let (reconciler, renderer, _) = setup(ManualRegionOracle::always_active());
        let a = SpatialKey::new("w", 0, 0, 0);
        let b = SpatialKey::new("w", 5, 0, 0);
        reconciler.materialize(&a, lines(&["A"]));
        reconciler.materialize(&b, lines(&["B"]));

        reconciler.invalidate(&a);
        assert!(!reconciler.has_projection(&a));
        assert_eq!(reconciler.projection_count(), 1);

        reconciler.invalidate_all();
        assert_eq!(reconciler.projection_count(), 0);
        assert_eq!(renderer.calls().destroys, 0);
    }

    #[test]
    fn test_drain_takes_everything_once() {
        let (reconciler, _, _) = setup(ManualRegionOracle::always_active());
        let keys: Vec<SpatialKey> = (0..5).map(|x| SpatialKey::new("w", x, 0, 0)).collect();
        reconciler.mark_all_dirty(keys.clone());
        assert_eq!(reconciler.dirty_count(), 5);

        let drained = reconciler.drain_dirty();
        assert_eq!(drained.len(), 5);
        assert!(!reconciler.has_dirty());

        reconciler.mark_dirty(keys[0].clone());
        assert_eq!(reconciler.drain_dirty().len(), 1);
    }

    #[test]
    fn test_partial_spawn_keeps_nothing_and_retry_uses_line_offsets() {
        let (reconciler, renderer, _) = setup(ManualRegionOracle::always_active());
        let key = SpatialKey::new("w", 0, 64, 0);

        renderer.fail_next_spawns(1);
        reconciler.materialize(&key, lines(&["A", "B"]));
        assert!(!reconciler.has_projection(&key));
        assert!(reconciler.is_dirty(&key));
        assert_eq!(renderer.live_count(), 0);

        renderer.heal();
        reconciler.materialize(&key, lines(&["X"]));
        let projection = reconciler.projection(&key).unwrap();
        let line = renderer.line(projection.handles()[0]).unwrap();
        assert_eq!(line.text, "X");
        assert_eq!(line.line_index, 0);
        assert_eq!(line.anchor.y, 65.0);
    }

    #[test]
    fn test_projected_keys_lists_displayed_signs() {
        let (reconciler, _, _) = setup(ManualRegionOracle::always_active());
        let a = SpatialKey::new("w", 0, 0, 0);
        let b = SpatialKey::new("w", 3, 0, 0);
        reconciler.materialize(&a, lines(&["A"]));
        reconciler.materialize(&b, lines(&["B"]));
        reconciler.clear(&a);

        assert_eq!(reconciler.projected_keys(), vec![b]);
    }

    #[test]
    fn test_one_oracle_callback_per_region() {
        let (reconciler, renderer, oracle) = setup(ManualRegionOracle::new());
        let region = RegionKey::new("w", 0, 0);
        let a = SpatialKey::new("w", 1, 0, 1);
        let b = SpatialKey::new("w", 2, 0, 2);

        reconciler.materialize(&a, lines(&["A"]));
        reconciler.materialize(&b, lines(&["B"]));
        reconciler.materialize(&a, lines(&["A2"]));

        assert_eq!(oracle.pending_callbacks(&region), 1);
        assert_eq!(reconciler.deferred_in(&region).len(), 2);
        assert_eq!(renderer.calls().spawns, 0);

        reconciler.drain_dirty();
        oracle.activate(&region);
        assert!(reconciler.is_dirty(&a));
        assert!(reconciler.is_dirty(&b));
        assert!(reconciler.deferred_in(&region).is_empty());
    }
}
