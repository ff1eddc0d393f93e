//! In-memory stand-ins for the render surface, the region oracle and the
//! executor. Used by tests and by the admin binary, which has no surface.

use super::executor::{CollectionExecutor, Job};
use super::layout::Anchor;
use super::provider::{ActivationCallback, RegionOracle, RenderHandle, RenderProvider};
use crate::core::{RegionKey, RenderError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

// ============================================================================
// Renderer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedLine {
    pub anchor: Anchor,
    pub line_index: usize,
    pub text: String,
}

/// Call counters of an [`InMemoryRenderer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderCalls {
    pub spawns: usize,
    pub text_updates: usize,
    pub destroys: usize,
}

#[derive(Debug, Default)]
struct RendererState {
    live: HashMap<RenderHandle, RenderedLine>,
    calls: RenderCalls,
    failing_spawns: usize,
    failing_lines: HashSet<usize>,
    failing_text_updates: bool,
}

/// A render surface that keeps every line in a map.
#[derive(Debug, Default)]
pub struct InMemoryRenderer {
    state: Mutex<RendererState>,
    next_handle: AtomicU64,
}

impl InMemoryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RendererState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> RenderCalls {
        self.state().calls
    }

    pub fn live_count(&self) -> usize {
        self.state().live.len()
    }

    pub fn line(&self, handle: RenderHandle) -> Option<RenderedLine> {
        self.state().live.get(&handle).cloned()
    }

    /// Text of every live line anchored in `collection`, top line first per
    /// anchor column.
    pub fn texts_in(&self, collection: &str) -> Vec<String> {
        let state = self.state();
        let mut lines: Vec<&RenderedLine> = state
            .live
            .values()
            .filter(|line| line.anchor.collection == collection)
            .collect();
        lines.sort_by(|a, b| {
            (a.anchor.x, a.anchor.z, -a.anchor.y)
                .partial_cmp(&(b.anchor.x, b.anchor.z, -b.anchor.y))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        lines.into_iter().map(|line| line.text.clone()).collect()
    }

    /// Makes a handle vanish without a destroy call, as an unload would.
    pub fn kill(&self, handle: RenderHandle) -> bool {
        self.state().live.remove(&handle).is_some()
    }

    pub fn kill_all(&self) {
        self.state().live.clear();
    }

    /// The next `count` spawns fail.
    pub fn fail_next_spawns(&self, count: usize) {
        self.state().failing_spawns = count;
    }

    /// Every spawn for `line_index` fails until [`InMemoryRenderer::heal`].
    pub fn fail_line(&self, line_index: usize) {
        self.state().failing_lines.insert(line_index);
    }

    pub fn fail_text_updates(&self, failing: bool) {
        self.state().failing_text_updates = failing;
    }

    pub fn heal(&self) {
        let mut state = self.state();
        state.failing_spawns = 0;
        state.failing_lines.clear();
        state.failing_text_updates = false;
    }
}

impl RenderProvider for InMemoryRenderer {
    fn spawn(&self, anchor: &Anchor, line_index: usize) -> Result<RenderHandle, RenderError> {
        let mut state = self.state();
        if state.failing_spawns > 0 {
            state.failing_spawns -= 1;
            return Err(RenderError::Rejected("injected spawn failure".into()));
        }
        if state.failing_lines.contains(&line_index) {
            return Err(RenderError::Rejected(format!("line {} is failing", line_index)));
        }

        let handle = RenderHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        state.live.insert(
            handle,
            RenderedLine {
                anchor: anchor.clone(),
                line_index,
                text: String::new(),
            },
        );
        state.calls.spawns += 1;
        Ok(handle)
    }

    fn set_text(&self, handle: RenderHandle, text: &str) -> Result<(), RenderError> {
        let mut state = self.state();
        if state.failing_text_updates {
            return Err(RenderError::Rejected("injected text failure".into()));
        }
        let line = state.live.get_mut(&handle).ok_or(RenderError::Gone)?;
        line.text = text.to_string();
        state.calls.text_updates += 1;
        Ok(())
    }

    fn is_live(&self, handle: RenderHandle) -> bool {
        self.state().live.contains_key(&handle)
    }

    fn destroy(&self, handle: RenderHandle) {
        let mut state = self.state();
        if state.live.remove(&handle).is_some() {
            state.calls.destroys += 1;
        }
    }
}

// ============================================================================
// Region oracle
// ============================================================================

#[derive(Default)]
struct OracleState {
    all_active: bool,
    active: HashSet<RegionKey>,
    waiting: HashMap<RegionKey, Vec<ActivationCallback>>,
}

/// Region oracle driven by hand.
#[derive(Default)]
pub struct ManualRegionOracle {
    state: Mutex<OracleState>,
}

impl ManualRegionOracle {
    /// Every region starts inactive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every region is active, now and forever.
    pub fn always_active() -> Self {
        let oracle = Self::default();
        oracle.state().all_active = true;
        oracle
    }

    fn state(&self) -> MutexGuard<'_, OracleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `region` active and fires its pending callbacks.
    pub fn activate(&self, region: &RegionKey) {
        let callbacks = {
            let mut state = self.state();
            state.active.insert(region.clone());
            state.waiting.remove(region).unwrap_or_default()
        };
        for callback in callbacks {
            callback();
        }
    }

    pub fn deactivate(&self, region: &RegionKey) {
        self.state().active.remove(region);
    }

    pub fn pending_callbacks(&self, region: &RegionKey) -> usize {
        self.state().waiting.get(region).map_or(0, Vec::len)
    }
}

impl RegionOracle for ManualRegionOracle {
    fn is_active(&self, region: &RegionKey) -> bool {
        let state = self.state();
        state.all_active || state.active.contains(region)
    }

    fn run_when_active(&self, region: &RegionKey, callback: ActivationCallback) {
        {
            let mut state = self.state();
            if !state.all_active && !state.active.contains(region) {
                state.waiting.entry(region.clone()).or_default().push(callback);
                return;
            }
        }
        callback();
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Runs every job on the calling thread, immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl CollectionExecutor for InlineExecutor {
    fn execute(&self, _collection: &str, job: Job) {
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn anchor() -> Anchor {
        Anchor {
            collection: "w".into(),
            x: 0.5,
            y: 1.0,
            z: 0.5,
        }
    }

    #[test]
    fn test_renderer_tracks_lines_and_calls() {
        let renderer = InMemoryRenderer::new();
        let handle = renderer.spawn(&anchor(), 0).unwrap();
        renderer.set_text(handle, "Hi").unwrap();

        assert_eq!(renderer.line(handle).unwrap().text, "Hi");
        assert_eq!(renderer.texts_in("w"), vec!["Hi".to_string()]);

        renderer.destroy(handle);
        renderer.destroy(handle);
        assert!(!renderer.is_live(handle));
        assert_eq!(
            renderer.calls(),
            RenderCalls {
                spawns: 1,
                text_updates: 1,
                destroys: 1
            }
        );
        assert_eq!(renderer.set_text(handle, "x"), Err(RenderError::Gone));
    }

    #[test]
    fn test_renderer_failure_injection() {
        let renderer = InMemoryRenderer::new();
        renderer.fail_next_spawns(1);
        assert!(renderer.spawn(&anchor(), 0).is_err());
        assert!(renderer.spawn(&anchor(), 0).is_ok());

        renderer.fail_line(2);
        assert!(renderer.spawn(&anchor(), 2).is_err());
        renderer.heal();
        assert!(renderer.spawn(&anchor(), 2).is_ok());
    }

    #[test]
    fn test_oracle_defers_callbacks_until_activation() {
        let oracle = ManualRegionOracle::new();
        let region = RegionKey::new("w", 0, 0);
        let fired = Arc::new(AtomicBool::new(false));

        let flag = fired.clone();
        oracle.run_when_active(&region, Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(oracle.pending_callbacks(&region), 1);

        oracle.activate(&region);
        assert!(fired.load(Ordering::SeqCst));
        assert!(oracle.is_active(&region));
        assert_eq!(oracle.pending_callbacks(&region), 0);
    }

    #[test]
    fn test_always_active_runs_callbacks_immediately() {
        let oracle = ManualRegionOracle::always_active();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        oracle.run_when_active(
            &RegionKey::new("w", 9, 9),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );
        assert!(fired.load(Ordering::SeqCst));
    }
}
