//! Execution engine: drives research jobs from `pending` to a terminal state.
//!
//! `start` moves a job to `running` and spawns a tokio task that submits the
//! prompt, records the remote handle and polls at a fixed interval until the
//! remote side finishes or the job is cancelled. Every record mutation goes
//! through the shared [`JobStore`](crate::store::JobStore) lock, so the final
//! `Complete` patch (result, cost and timestamp together) is never observed
//! half-applied.
//!
//! Progress is broadcast as [`ProgressEvent`]s. Delivery is best-effort:
//! subscribers only see events sent after they subscribed, and a receiver
//! that falls too far behind skips the oldest events.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cost::PriceTable;
use crate::error::{DossierError, JobError, RemoteError, Result};
use crate::lifecycle::ResearchPatch;
use crate::remote::{RemoteStatus, ResearchPayload, ResearchService, SubmitRequest};
use crate::store::{JobStore, SharedStore};
use crate::types::{Research, ResearchCost, ResearchStatus};

const EVENT_CAPACITY: usize = 256;

/// Engine tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Wait between status queries.
    pub poll_interval: Duration,
    /// Fail jobs still running after this long. `None` waits indefinitely.
    pub max_duration: Option<Duration>,
    pub prices: PriceTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_duration: None,
            prices: PriceTable::default(),
        }
    }
}

/// A progress notification for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    /// Engine-wide, strictly increasing in generation order.
    pub sequence: u64,
    pub at: DateTime<Utc>,
    pub kind: ProgressKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressKind {
    Started,
    Submitted {
        response_id: String,
    },
    /// One status query finished.
    Polled {
        attempt: u32,
        remote_status: RemoteStatus,
        elapsed_secs: u64,
    },
    Completed {
        cost: ResearchCost,
    },
    Failed {
        message: String,
    },
    Cancelled,
}

impl ProgressKind {
    /// Whether no further events follow for this job run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressKind::Completed { .. } | ProgressKind::Failed { .. } | ProgressKind::Cancelled
        )
    }
}

impl std::fmt::Display for ProgressKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressKind::Started => write!(f, "started"),
            ProgressKind::Submitted { response_id } => write!(f, "submitted ({response_id})"),
            ProgressKind::Polled {
                attempt,
                remote_status,
                elapsed_secs,
            } => write!(f, "poll #{attempt}: {remote_status} after {elapsed_secs}s"),
            ProgressKind::Completed { cost } => {
                write!(f, "completed (${:.4})", cost.total_cost)
            }
            ProgressKind::Failed { message } => write!(f, "failed: {message}"),
            ProgressKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

struct ActiveJob {
    generation: u64,
    token: CancellationToken,
}

struct EngineInner {
    store: SharedStore,
    remote: Arc<dyn ResearchService>,
    config: EngineConfig,
    events: broadcast::Sender<ProgressEvent>,
    sequence: AtomicU64,
    generation: AtomicU64,
    active: std::sync::Mutex<HashMap<String, ActiveJob>>,
}

impl EngineInner {
    fn emit(&self, job_id: &str, kind: ProgressKind) {
        let event = ProgressEvent {
            job_id: job_id.to_string(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            at: Utc::now(),
            kind,
        };
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn active(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveJob>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Removes a job's token from the active set when its task ends.
struct ActiveGuard {
    inner: Arc<EngineInner>,
    id: String,
    generation: u64,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.inner.active();
        if active
            .get(&self.id)
            .is_some_and(|job| job.generation == self.generation)
        {
            active.remove(&self.id);
        }
    }
}

/// Runs research jobs against a remote service and records their outcome in
/// a shared store. Cheap to clone.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("config", &self.inner.config)
            .field("active", &self.inner.active().len())
            .finish()
    }
}

impl ExecutionEngine {
    pub fn new(store: SharedStore, remote: Arc<dyn ResearchService>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                store,
                remote,
                config,
                events,
                sequence: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                active: std::sync::Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Subscribe to progress events of every job run by this engine.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.events.subscribe()
    }

    /// Whether this engine has a live polling task for `id`.
    pub fn is_active(&self, id: &str) -> bool {
        self.inner.active().contains_key(id)
    }

    /// Move a pending job to `running` and start driving it.
    pub async fn start(&self, id: &str) -> Result<JobHandle> {
        let mut store = self.inner.store.lock().await;
        let research = store
            .update(id, ResearchPatch::Start)?
            .cloned()
            .ok_or_else(|| JobError::NotFound { id: id.to_string() })?;
        info!(job_id = %id, model = %research.model, "Research job started");
        self.inner.emit(id, ProgressKind::Started);
        let handle = self.spawn(research, None);
        drop(store);
        Ok(handle)
    }

    /// Re-attach polling to a job left `running` with a recorded remote handle.
    pub async fn resume(&self, id: &str) -> Result<JobHandle> {
        let store = self.inner.store.lock().await;
        let research = store
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::NotFound { id: id.to_string() })?;

        let invalid = |reason: &str| JobError::InvalidState {
            id: id.to_string(),
            status: research.status,
            reason: reason.to_string(),
        };
        if research.status != ResearchStatus::Running {
            return Err(invalid("resume requires a running job").into());
        }
        let Some(response_id) = research.response_id.clone() else {
            return Err(invalid("no remote handle was recorded").into());
        };
        if self.is_active(id) {
            return Err(invalid("job is already being polled").into());
        }

        info!(job_id = %id, response_id = %response_id, "Resuming research job");
        let handle = self.spawn(research, Some(response_id));
        drop(store);
        Ok(handle)
    }

    /// Cancel a running job. The job ends in `error`; the remote request is
    /// not stopped server-side.
    pub async fn cancel(&self, id: &str) -> Result<Research> {
        let mut store = self.inner.store.lock().await;
        let research = store
            .update(
                id,
                ResearchPatch::Cancel {
                    completed_at: Utc::now(),
                },
            )?
            .cloned()
            .ok_or_else(|| JobError::NotFound { id: id.to_string() })?;
        if let Some(job) = self.inner.active().get(id) {
            job.token.cancel();
        }
        drop(store);

        info!(job_id = %id, "Research job cancelled");
        self.inner.emit(id, ProgressKind::Cancelled);
        Ok(research)
    }

    /// Reset a failed job to `pending`. Call [`start`](Self::start) to run it again.
    pub async fn retry(&self, id: &str) -> Result<Research> {
        let mut store = self.inner.store.lock().await;
        let research = store
            .update(id, ResearchPatch::Retry)?
            .cloned()
            .ok_or_else(|| JobError::NotFound { id: id.to_string() })?;
        info!(job_id = %id, "Research job reset for retry");
        Ok(research)
    }

    fn spawn(&self, research: Research, response_id: Option<String>) -> JobHandle {
        let id = research.id.clone();
        let token = CancellationToken::new();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.active().insert(
            id.clone(),
            ActiveJob {
                generation,
                token: token.clone(),
            },
        );

        let guard = ActiveGuard {
            inner: Arc::clone(&self.inner),
            id: id.clone(),
            generation,
        };
        let run = JobRun {
            inner: Arc::clone(&self.inner),
            research,
            token,
        };
        let task = tokio::spawn(async move {
            let _guard = guard;
            run.drive(response_id).await
        });

        JobHandle {
            id,
            engine: self.clone(),
            task,
        }
    }
}

/// One execution of one job.
struct JobRun {
    inner: Arc<EngineInner>,
    research: Research,
    token: CancellationToken,
}

impl JobRun {
    fn id(&self) -> &str {
        &self.research.id
    }

    fn cancelled(&self) -> DossierError {
        JobError::Cancelled {
            id: self.id().to_string(),
        }
        .into()
    }

    async fn drive(self, resume_from: Option<String>) -> Result<Research> {
        let started = tokio::time::Instant::now();
        let response_id = match resume_from {
            Some(response_id) => response_id,
            None => self.submit().await?,
        };

        let mut attempt: u32 = 0;
        loop {
            if self.token.is_cancelled() {
                return Err(self.cancelled());
            }
            self.ensure_still_running().await?;

            if let Some(max) = self.inner.config.max_duration
                && started.elapsed() >= max
            {
                return self
                    .fail(RemoteError::TimedOut {
                        max_secs: max.as_secs(),
                    })
                    .await;
            }

            attempt += 1;
            let poll = match self.inner.remote.poll(&response_id).await {
                Ok(poll) => poll,
                Err(e) => return self.fail(e).await,
            };
            debug!(
                job_id = %self.id(),
                attempt,
                remote_status = %poll.status,
                "Polled research job"
            );
            self.inner.emit(
                self.id(),
                ProgressKind::Polled {
                    attempt,
                    remote_status: poll.status,
                    elapsed_secs: started.elapsed().as_secs(),
                },
            );

            match poll.status {
                RemoteStatus::Running => {}
                RemoteStatus::Completed => {
                    let payload = match poll.payload {
                        Some(payload) => payload,
                        None => match self.inner.remote.fetch(&response_id).await {
                            Ok(payload) => payload,
                            Err(e) => return self.fail(e).await,
                        },
                    };
                    return self.complete(payload).await;
                }
                RemoteStatus::Failed => {
                    let message = poll
                        .error
                        .unwrap_or_else(|| "Research failed".to_string());
                    return self.fail(RemoteError::JobFailed { message }).await;
                }
            }

            tokio::select! {
                _ = self.token.cancelled() => return Err(self.cancelled()),
                _ = tokio::time::sleep(self.inner.config.poll_interval) => {}
            }
        }
    }

    async fn submit(&self) -> Result<String> {
        let request = SubmitRequest {
            prompt: self.research.prompt.clone(),
            model: self.research.model.clone(),
        };
        let response_id = match self.inner.remote.submit(&request).await {
            Ok(response_id) => response_id,
            Err(e) => return self.fail(e).await,
        };

        {
            let mut store = self.inner.store.lock().await;
            if self.token.is_cancelled() {
                return Err(self.cancelled());
            }
            store.refresh();
            self.check_running(&store)?;
            store.update(
                self.id(),
                ResearchPatch::Submitted {
                    response_id: response_id.clone(),
                },
            )?;
        }
        self.inner.emit(
            self.id(),
            ProgressKind::Submitted {
                response_id: response_id.clone(),
            },
        );
        Ok(response_id)
    }

    /// Stop if the record was deleted or moved out of `running` elsewhere,
    /// including by another process sharing the snapshot file.
    async fn ensure_still_running(&self) -> Result<()> {
        let mut store = self.inner.store.lock().await;
        store.refresh();
        self.check_running(&store)
    }

    fn check_running(&self, store: &JobStore) -> Result<()> {
        match store.get(self.id()) {
            None => {
                debug!(job_id = %self.id(), "Job deleted while running, stopping");
                Err(JobError::NotFound {
                    id: self.id().to_string(),
                }
                .into())
            }
            Some(r) if r.status != ResearchStatus::Running => {
                debug!(job_id = %self.id(), status = %r.status, "Job no longer running, stopping");
                Err(self.cancelled())
            }
            Some(_) => Ok(()),
        }
    }

    async fn complete(&self, payload: ResearchPayload) -> Result<Research> {
        let (result, usage) = payload.into_result();
        let cost = self
            .inner
            .config
            .prices
            .research_cost(&usage, &self.research.model);

        let research = {
            let mut store = self.inner.store.lock().await;
            if self.token.is_cancelled() {
                return Err(self.cancelled());
            }
            store.refresh();
            self.check_running(&store)?;
            store
                .update(
                    self.id(),
                    ResearchPatch::Complete {
                        result,
                        cost,
                        completed_at: Utc::now(),
                    },
                )?
                .cloned()
                .ok_or_else(|| JobError::NotFound {
                    id: self.id().to_string(),
                })?
        };

        info!(
            job_id = %self.id(),
            input_tokens = cost.input_tokens,
            output_tokens = cost.output_tokens,
            total_cost = cost.total_cost,
            sources = research.result.as_ref().map_or(0, |r| r.sources.len()),
            "Research job completed"
        );
        self.inner
            .emit(self.id(), ProgressKind::Completed { cost });
        Ok(research)
    }

    async fn fail<T>(&self, error: RemoteError) -> Result<T> {
        let message = error.to_string();
        {
            let mut store = self.inner.store.lock().await;
            if self.token.is_cancelled() {
                return Err(self.cancelled());
            }
            store.refresh();
            self.check_running(&store)?;
            let patch = ResearchPatch::Fail {
                message: message.clone(),
                completed_at: Utc::now(),
            };
            if let Err(e) = store.update(self.id(), patch) {
                warn!(job_id = %self.id(), "Could not record failure: {}", e);
            }
        }
        warn!(job_id = %self.id(), error = %message, "Research job failed");
        self.inner
            .emit(self.id(), ProgressKind::Failed { message });
        Err(error.into())
    }
}

/// Handle to a running job.
#[derive(Debug)]
pub struct JobHandle {
    id: String,
    engine: ExecutionEngine,
    task: JoinHandle<Result<Research>>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Progress events for this job sent from now on.
    pub fn subscribe(&self) -> JobEvents {
        JobEvents {
            id: self.id.clone(),
            receiver: self.engine.subscribe(),
        }
    }

    pub async fn cancel(&self) -> Result<Research> {
        self.engine.cancel(&self.id).await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the job to reach a terminal state.
    ///
    /// Returns the completed record, or the error that ended the run.
    pub async fn wait(self) -> Result<Research> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(JobError::TaskFailed {
                id: self.id,
                message: e.to_string(),
            }
            .into()),
        }
    }
}

/// Progress events filtered to a single job.
#[derive(Debug)]
pub struct JobEvents {
    id: String,
    receiver: broadcast::Receiver<ProgressEvent>,
}

impl JobEvents {
    /// Next event for this job. `None` once the engine is gone.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.job_id == self.id => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(job_id = %self.id, skipped, "Progress subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
