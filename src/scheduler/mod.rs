//! Periodic background work: flushing the store, draining the reconciler's
//! needs-resync set, and the slow full sweep that re-marks everything.

use crate::core::{RegionKey, Result, SignError, SpatialKey};
use crate::display::Reconciler;
use crate::storage::RecordStore;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

pub const FLUSH_TASK: &str = "flush";
pub const RESYNC_TASK: &str = "resync";
pub const FULL_SWEEP_TASK: &str = "full-sweep";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleIntervals {
    pub flush: Duration,
    pub resync: Duration,
    pub full_sweep: Duration,
}

impl Default for ScheduleIntervals {
    fn default() -> Self {
        Self {
            flush: Duration::from_secs(300),
            resync: Duration::from_secs(10),
            full_sweep: Duration::from_secs(120),
        }
    }
}

/// One named background loop.
struct PeriodicTask {
    name: &'static str,
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Sends the stop signal and hands back the join handle, if still held.
    fn signal_stop(&mut self) -> Option<JoinHandle<()>> {
        if let Some(stop_tx) = self.stop_tx.take()
            && stop_tx.send(()).is_err()
        {
            debug!(task = self.name, "Scheduler task already gone");
        }
        self.join_handle.take()
    }

    /// Stops the loop and waits for it. A cancelled task counts as stopped.
    async fn stop(mut self) -> Result<()> {
        let Some(join_handle) = self.signal_stop() else {
            return Ok(());
        };
        match join_handle.await {
            Ok(()) => Ok(()),
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => Err(SignError::Scheduler(format!("{} task panicked: {}", self.name, err))),
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(join_handle) = self.signal_stop() {
            debug!(task = self.name, "Aborting scheduler task");
            join_handle.abort();
        }
    }
}

/// Owns the three periodic tasks. Every pass can also be run by hand.
pub struct ReconcileScheduler {
    store: Arc<RecordStore>,
    reconciler: Reconciler,
    intervals: ScheduleIntervals,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl ReconcileScheduler {
    pub fn new(store: Arc<RecordStore>, reconciler: Reconciler, intervals: ScheduleIntervals) -> Self {
        Self {
            store,
            reconciler,
            intervals,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn intervals(&self) -> ScheduleIntervals {
        self.intervals
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    /// Spawns the periodic tasks on the current tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|err| SignError::NoRuntime(err.to_string()))?;
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            return Err(SignError::Scheduler("scheduler already running".into()));
        }

        let store = self.store.clone();
        tasks.push(spawn_periodic(&runtime, FLUSH_TASK, self.intervals.flush, None, move || {
            let store = store.clone();
            async move {
                let result = tokio::task::spawn_blocking(move || flush_pass(&store)).await;
                if let Err(err) = result {
                    warn!(error = %err, "Flush pass failed");
                }
            }
        }));

        let store = self.store.clone();
        let reconciler = self.reconciler.clone();
        tasks.push(spawn_periodic(
            &runtime,
            RESYNC_TASK,
            self.intervals.resync,
            Some(self.reconciler.clone()),
            move || {
                resync_pass(&store, &reconciler);
                async {}
            },
        ));

        let store = self.store.clone();
        let reconciler = self.reconciler.clone();
        tasks.push(spawn_periodic(
            &runtime,
            FULL_SWEEP_TASK,
            self.intervals.full_sweep,
            None,
            move || {
                full_sweep_pass(&store, &reconciler);
                async {}
            },
        ));

        info!(
            flush_secs = self.intervals.flush.as_secs_f64(),
            resync_secs = self.intervals.resync.as_secs_f64(),
            full_sweep_secs = self.intervals.full_sweep.as_secs_f64(),
            "Sign scheduler started"
        );
        Ok(())
    }

    /// Stops every task and waits for them. A no-op when not running.
    pub async fn stop(&self) -> Result<()> {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        if tasks.is_empty() {
            return Ok(());
        }
        for task in tasks {
            task.stop().await?;
        }
        info!("Sign scheduler stopped");
        Ok(())
    }

    // ========================================================================
    // Passes
    // ========================================================================

    /// Writes the store if it is dirty. Returns whether a write happened.
    pub fn run_flush_now(&self) -> Result<bool> {
        self.store.flush_if_dirty()
    }

    /// Materializes or clears every key in the needs-resync set. Returns how
    /// many keys were processed.
    pub fn run_resync_now(&self) -> usize {
        resync_pass(&self.store, &self.reconciler)
    }

    /// Marks every record with text, and every displayed key, for resync.
    /// Returns how many were marked.
    pub fn run_full_sweep_now(&self) -> usize {
        full_sweep_pass(&self.store, &self.reconciler)
    }

    // ========================================================================
    // Signals
    // ========================================================================

    /// A region became active: resync its records now instead of at the
    /// next full sweep.
    pub fn on_region_active(&self, region: &RegionKey) -> usize {
        let keys = self.keys_with_text(self.store.keys_in_region(region));
        let marked = keys.len();
        self.reconciler.mark_all_dirty(keys);
        self.reconciler.region_activated(region);
        debug!(region = %region, signs = marked, "Region became active");
        marked
    }

    /// A collection was (re)started: every record in it needs a display.
    pub fn on_collection_started(&self, name: &str) -> usize {
        let keys = self.keys_with_text(self.store.keys_in_collection(name));
        let marked = keys.len();
        self.reconciler.mark_all_dirty(keys);
        self.reconciler.wake();
        info!(collection = %name, signs = marked, "Collection started, resyncing signs");
        marked
    }

    fn keys_with_text<I>(&self, keys: I) -> Vec<SpatialKey>
    where
        I: IntoIterator<Item = SpatialKey>,
    {
        keys.into_iter()
            .filter(|key| self.store.get(key).is_some_and(|record| record.has_text()))
            .collect()
    }
}

fn spawn_periodic<F, Fut>(
    runtime: &Handle,
    name: &'static str,
    period: Duration,
    wake_on: Option<Reconciler>,
    mut tick: F,
) -> PeriodicTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = period.max(Duration::from_millis(1));
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let join_handle = runtime.spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => tick().await,
                _ = wait_for(&wake_on) => tick().await,
            }
        }
        debug!(task = name, "Scheduler task exited");
    });

    PeriodicTask {
        name,
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    }
}

async fn wait_for(reconciler: &Option<Reconciler>) {
    match reconciler {
        Some(reconciler) => reconciler.wait_for_wakeup().await,
        None => std::future::pending().await,
    }
}

fn flush_pass(store: &RecordStore) {
    match store.flush_if_dirty() {
        Ok(true) => debug!(signs = store.len(), "Flushed signs"),
        Ok(false) => {}
        Err(err) => warn!(error = %err, "Scheduled flush failed, will retry"),
    }
}

fn resync_pass(store: &RecordStore, reconciler: &Reconciler) -> usize {
    let keys = reconciler.drain_dirty();
    if keys.is_empty() {
        return 0;
    }

    let mut shown = 0usize;
    for key in &keys {
        match store.get(key) {
            Some(record) if record.has_text() => {
                reconciler.materialize(key, record.non_empty_lines());
                shown += 1;
            }
            _ => reconciler.clear(key),
        }
    }
    debug!(signs = keys.len(), shown, "Resynced sign displays");
    keys.len()
}

fn full_sweep_pass(store: &RecordStore, reconciler: &Reconciler) -> usize {
    // Displayed keys are swept too, so a display whose record is gone gets cleared.
    let mut keys: HashSet<SpatialKey> = store.keys_with_text().into_iter().collect();
    keys.extend(reconciler.projected_keys());
    let marked = keys.len();
    reconciler.mark_all_dirty(keys);
    if marked > 0 {
        debug!(signs = marked, "Full sweep marked signs for resync");
    }
    marked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{InMemoryRenderer, InlineExecutor, LineLayout, ManualRegionOracle};
    use tempfile::TempDir;

    fn setup(temp_dir: &TempDir) -> (ReconcileScheduler, Arc<RecordStore>, Reconciler, Arc<InMemoryRenderer>) {
        let store = Arc::new(RecordStore::open(temp_dir.path().join("signs.json")).unwrap());
        let renderer = Arc::new(InMemoryRenderer::new());
        let reconciler = Reconciler::new(
            renderer.clone(),
            Arc::new(ManualRegionOracle::always_active()),
            Arc::new(InlineExecutor),
            LineLayout::default(),
        );
        let scheduler = ReconcileScheduler::new(store.clone(), reconciler.clone(), ScheduleIntervals::default());
        (scheduler, store, reconciler, renderer)
    }

    #[test]
    fn test_resync_materializes_and_clears() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, store, reconciler, renderer) = setup(&temp_dir);

        let shown = SpatialKey::new("w", 0, 0, 0);
        let blank = SpatialKey::new("w", 1, 0, 0);
        store.create_at(&shown, None);
        store.set_lines(&shown, ["A", "B"]);
        store.create_at(&blank, None);

        reconciler.mark_dirty(shown.clone());
        reconciler.mark_dirty(blank.clone());
        assert_eq!(scheduler.run_resync_now(), 2);

        assert_eq!(renderer.live_count(), 2);
        assert!(reconciler.has_projection(&shown));
        assert!(!reconciler.has_projection(&blank));
        assert_eq!(scheduler.run_resync_now(), 0);
    }

    #[test]
    fn test_full_sweep_marks_only_signs_with_text() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, store, reconciler, _) = setup(&temp_dir);

        let key = SpatialKey::new("w", 0, 0, 0);
        store.create_at(&key, None);
        store.set_lines(&key, ["A"]);
        store.create_at(&SpatialKey::new("w", 9, 0, 0), None);

        assert_eq!(scheduler.run_full_sweep_now(), 1);
        assert!(reconciler.is_dirty(&key));
    }

    #[test]
    fn test_full_sweep_clears_display_of_removed_record() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, store, reconciler, renderer) = setup(&temp_dir);
        let key = SpatialKey::new("w", 0, 0, 0);
        store.create_at(&key, None);
        store.set_lines(&key, ["Hi"]);

        // A resync that read the record before it was removed lands afterwards.
        let stale = store.get(&key).unwrap();
        store.remove_at(&key);
        reconciler.clear(&key);
        reconciler.materialize(&key, stale.non_empty_lines());
        assert_eq!(renderer.live_count(), 1);

        assert_eq!(scheduler.run_full_sweep_now(), 1);
        scheduler.run_resync_now();
        assert!(!reconciler.has_projection(&key));
        assert_eq!(renderer.live_count(), 0);
    }

    #[test]
    fn test_flush_now_writes_when_dirty() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, store, _, _) = setup(&temp_dir);

        assert!(!scheduler.run_flush_now().unwrap());
        store.create_at(&SpatialKey::new("w", 0, 0, 0), None);
        assert!(scheduler.run_flush_now().unwrap());
        assert!(store.path().exists());
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_start_requires_runtime() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, ..) = setup(&temp_dir);
        assert!(matches!(scheduler.start(), Err(SignError::NoRuntime(_))));
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_cancelled_task_stops_cleanly() {
        let runtime = Handle::current();
        let task = spawn_periodic(&runtime, "idle", Duration::from_millis(1), None, || async {});
        task.stop().await.unwrap();

        let task = spawn_periodic(&runtime, "aborted", Duration::from_millis(1), None, || async {});
        if let Some(join_handle) = &task.join_handle {
            join_handle.abort();
        }
        task.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_fails_and_stop_joins() {
        let temp_dir = TempDir::new().unwrap();
        let (scheduler, ..) = setup(&temp_dir);

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(scheduler.start(), Err(SignError::Scheduler(_))));

        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());
        scheduler.stop().await.unwrap();
    }
}
