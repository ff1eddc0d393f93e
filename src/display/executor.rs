use crate::core::{Result, SignError};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, error, warn};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A serialized execution context per collection.
///
/// Jobs queued for the same collection run one at a time in submission
/// order. Jobs for different collections may run concurrently.
pub trait CollectionExecutor: Send + Sync {
    fn execute(&self, collection: &str, job: Job);
}

/// Tokio-backed executor: one lane (channel + worker task) per collection,
/// created on first use.
///
/// Jobs run on the blocking pool so a slow render provider never stalls the
/// async workers. A panicking job is logged and the lane keeps going.
pub struct TaskExecutor {
    runtime: Handle,
    lanes: Mutex<HashMap<String, UnboundedSender<Job>>>,
}

impl TaskExecutor {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    /// Binds to the runtime of the calling thread.
    pub fn current() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|err| SignError::NoRuntime(err.to_string()))?;
        Ok(Self::new(runtime))
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn spawn_lane(&self, collection: &str) -> UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let name = collection.to_string();
        self.runtime.spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(err) = tokio::task::spawn_blocking(job).await {
                    error!(collection = %name, error = %err, "Display job failed");
                }
            }
            debug!(collection = %name, "Display lane closed");
        });
        tx
    }
}

impl CollectionExecutor for TaskExecutor {
    fn execute(&self, collection: &str, job: Job) {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        let lane = match lanes.get(collection) {
            Some(lane) if !lane.is_closed() => lane.clone(),
            _ => {
                let lane = self.spawn_lane(collection);
                lanes.insert(collection.to_string(), lane.clone());
                lane
            }
        };
        drop(lanes);

        if lane.send(job).is_err() {
            warn!(collection = %collection, "Display lane is gone, dropping job");
        }
    }
}
