//! In-flight command tracking
//!
//! A `CommunicationTask` records the outcome of one dispatched command at each
//! addressed charge box. It becomes finished once every charge box has
//! answered (with a response or an error), and announces that on a watch
//! channel so waiters do not have to poll.
//!
//! Finished tasks stay readable for a retention window (status lookups) and
//! are then evicted from the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_TASK_RETENTION;
use crate::types::{RemoteStartParams, RequestResult, TaskId};

/// Action name of remote-start tasks
pub const REMOTE_START_ACTION: &str = "RemoteStartTransaction";

/// Execution record of one dispatched command
#[derive(Debug)]
pub struct CommunicationTask {
    task_id: TaskId,
    action: String,
    charge_box_ids: Vec<String>,
    params: Option<RemoteStartParams>,
    results: RwLock<HashMap<String, RequestResult>>,
    finished: watch::Sender<bool>,
    finished_at: Mutex<Option<Instant>>,
    created_at: DateTime<Utc>,
}

impl CommunicationTask {
    pub fn new(task_id: TaskId, action: impl Into<String>, charge_box_ids: Vec<String>) -> Self {
        let done = charge_box_ids.is_empty();
        let (finished, _) = watch::channel(done);
        Self {
            task_id,
            action: action.into(),
            charge_box_ids,
            params: None,
            results: RwLock::new(HashMap::new()),
            finished,
            finished_at: Mutex::new(done.then(Instant::now)),
            created_at: Utc::now(),
        }
    }

    /// Remote-start task addressed to the params' charge box
    pub fn remote_start(task_id: TaskId, params: &RemoteStartParams) -> Self {
        let mut task = Self::new(task_id, REMOTE_START_ACTION, vec![params.charge_box_id.clone()]);
        task.params = Some(params.clone());
        task
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn charge_box_ids(&self) -> &[String] {
        &self.charge_box_ids
    }

    /// Command parameters, for remote-start tasks
    pub fn remote_start_params(&self) -> Option<&RemoteStartParams> {
        self.params.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the last charge box answered
    pub fn finished_at(&self) -> Option<Instant> {
        *self.finished_at.lock()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Completion signal; yields `true` once every charge box has answered
    pub fn subscribe_finished(&self) -> watch::Receiver<bool> {
        self.finished.subscribe()
    }

    /// Result recorded for a charge box, if it answered yet
    pub fn result_for(&self, charge_box_id: &str) -> Option<RequestResult> {
        self.results.read().get(charge_box_id).cloned()
    }

    pub fn results(&self) -> HashMap<String, RequestResult> {
        self.results.read().clone()
    }

    /// Record a response from a charge box
    pub fn add_response(&self, charge_box_id: &str, response: impl Into<String>) {
        self.record(charge_box_id, RequestResult::response(response));
    }

    /// Record a failure for a charge box
    pub fn add_error(&self, charge_box_id: &str, message: impl Into<String>) {
        self.record(charge_box_id, RequestResult::error(message));
    }

    fn record(&self, charge_box_id: &str, result: RequestResult) {
        if !self.charge_box_ids.iter().any(|id| id == charge_box_id) {
            warn!(
                "Task {}: ignoring result for unaddressed charge box {}",
                self.task_id, charge_box_id
            );
            return;
        }

        let complete = {
            let mut results = self.results.write();
            if results.contains_key(charge_box_id) {
                warn!(
                    "Task {}: charge box {} already answered, ignoring {:?}",
                    self.task_id, charge_box_id, result
                );
                return;
            }
            results.insert(charge_box_id.to_string(), result);
            results.len() == self.charge_box_ids.len()
        };

        if complete {
            debug!("Task {} ({}) finished", self.task_id, self.action);
            *self.finished_at.lock() = Some(Instant::now());
            self.finished.send_replace(true);
        }
    }
}

/// Lookup of in-flight commands by task id
pub trait TaskStore: Send + Sync {
    fn get(&self, task_id: TaskId) -> Option<Arc<CommunicationTask>>;
}

/// Task store kept in memory
///
/// Unfinished tasks are kept until they finish; finished ones are dropped by
/// [`evict_expired`](Self::evict_expired) once the retention window passed.
#[derive(Debug)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Arc<CommunicationTask>>>,
    next_id: AtomicI32,
    retention: Duration,
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            next_id: AtomicI32::new(1),
            retention: DEFAULT_TASK_RETENTION,
        }
    }
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that keeps finished tasks for `retention`
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            retention,
            ..Self::default()
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Allocate a task id and start tracking a command
    pub fn create(
        &self,
        action: impl Into<String>,
        charge_box_ids: Vec<String>,
    ) -> Arc<CommunicationTask> {
        let task_id = self.next_task_id();
        self.track(CommunicationTask::new(task_id, action, charge_box_ids))
    }

    /// Allocate a task id and start tracking a RemoteStartTransaction
    pub fn create_remote_start(&self, params: &RemoteStartParams) -> Arc<CommunicationTask> {
        let task_id = self.next_task_id();
        self.track(CommunicationTask::remote_start(task_id, params))
    }

    fn next_task_id(&self) -> TaskId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn track(&self, task: CommunicationTask) -> Arc<CommunicationTask> {
        let task = Arc::new(task);
        self.tasks.write().insert(task.task_id(), task.clone());
        task
    }

    /// Drop tasks that finished more than the retention window ago
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let retention = self.retention;
        let mut tasks = self.tasks.write();
        let before = tasks.len();

        tasks.retain(|_, task| match task.finished_at() {
            Some(finished_at) => now.saturating_duration_since(finished_at) < retention,
            None => true,
        });

        let evicted = before - tasks.len();
        if evicted > 0 {
            debug!("Evicted {} finished task(s), {} still tracked", evicted, tasks.len());
        }
        evicted
    }

    pub fn remove(&self, task_id: TaskId) -> Option<Arc<CommunicationTask>> {
        self.tasks.write().remove(&task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn get(&self, task_id: TaskId) -> Option<Arc<CommunicationTask>> {
        self.tasks.read().get(&task_id).cloned()
    }
}

/// Evict expired tasks from the store every `period` until aborted
pub fn spawn_eviction(store: Arc<InMemoryTaskStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Task eviction every {:?}, retention {:?}",
            period,
            store.retention()
        );
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        loop {
            ticker.tick().await;
            store.evict_expired();
        }
    })
}
