//! Named job queues
//!
//! Heavy work runs in background workers pulled from named queues; queue
//! selection pins GPU-heavy tasks to the worker with the matching device.
//! One worker per queue, prefetch 1, a wall clock per task. Task state is
//! observable by id so the event stream can poll progress and terminal
//! results.

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use voicejury_core::{Error, ProgressMarker, Result};

/// Heavy separation work (shares the co-tenant GPU).
pub const QUEUE_GPU_HEAVY: &str = "gpu-heavy";
/// Pitch extraction (dedicated GPU).
pub const QUEUE_GPU: &str = "gpu";
/// CPU and I/O work.
pub const QUEUE_DEFAULT: &str = "default";

/// Per-task wall clock.
pub const TASK_TIME_LIMIT: Duration = Duration::from_secs(600);

/// Observable task lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Pending,
    Progress(ProgressMarker),
    Success(Value),
    Failure(String),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success(_) | TaskState::Failure(_))
    }
}

/// Writes progress markers into the task state. Handed to the coordinating
/// pipeline code — worker threads below it never touch progress.
#[derive(Clone)]
pub struct ProgressSink {
    states: Arc<DashMap<String, TaskState>>,
    task_id: String,
}

impl ProgressSink {
    pub fn update(&self, step: &str, progress: u8, detail: &str) {
        self.states.insert(
            self.task_id.clone(),
            TaskState::Progress(ProgressMarker::new(step, progress, detail)),
        );
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

struct Job {
    task_id: String,
    future: BoxFuture<'static, Result<Value>>,
}

/// Queue runner: one worker task per named queue.
pub struct JobRunner {
    states: Arc<DashMap<String, TaskState>>,
    senders: HashMap<&'static str, mpsc::UnboundedSender<Job>>,
    task_timeout: Duration,
}

impl JobRunner {
    pub fn new(task_timeout: Duration) -> Arc<Self> {
        let states: Arc<DashMap<String, TaskState>> = Arc::new(DashMap::new());
        let mut senders = HashMap::new();

        for queue in [QUEUE_GPU_HEAVY, QUEUE_GPU, QUEUE_DEFAULT] {
            let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
            senders.insert(queue, tx);
            let states = states.clone();
            tokio::spawn(async move {
                // Single consumer: jobs on this queue run strictly one at
                // a time (prefetch 1).
                while let Some(job) = rx.recv().await {
                    info!(queue, task_id = %job.task_id, "task started");
                    let outcome = tokio::time::timeout(task_timeout, job.future).await;
                    let state = match outcome {
                        Ok(Ok(value)) => TaskState::Success(value),
                        Ok(Err(e)) => {
                            error!(queue, task_id = %job.task_id, error = %e, "task failed");
                            TaskState::Failure(e.to_string())
                        }
                        Err(_) => {
                            error!(queue, task_id = %job.task_id, "task hit wall clock");
                            TaskState::Failure(format!(
                                "task exceeded {}s wall clock",
                                task_timeout.as_secs()
                            ))
                        }
                    };
                    states.insert(job.task_id, state);
                }
            });
        }

        Arc::new(Self {
            states,
            senders,
            task_timeout,
        })
    }

    pub fn with_default_timeout() -> Arc<Self> {
        Self::new(TASK_TIME_LIMIT)
    }

    /// Enqueue a job on a named queue. `make` receives the progress sink
    /// for the new task; the returned id can be polled with [`state`].
    ///
    /// [`state`]: JobRunner::state
    pub fn submit<F>(&self, queue: &str, make: F) -> Result<String>
    where
        F: FnOnce(ProgressSink) -> BoxFuture<'static, Result<Value>>,
    {
        let sender = self
            .senders
            .get(queue)
            .ok_or_else(|| Error::Fatal(format!("unknown queue: {}", queue)))?;

        let task_id = uuid::Uuid::new_v4().to_string();
        self.states.insert(task_id.clone(), TaskState::Pending);

        let sink = ProgressSink {
            states: self.states.clone(),
            task_id: task_id.clone(),
        };
        let job = Job {
            task_id: task_id.clone(),
            future: make(sink),
        };
        if sender.send(job).is_err() {
            warn!(queue, "queue worker is gone");
            return Err(Error::Fatal(format!("queue {} is closed", queue)));
        }
        Ok(task_id)
    }

    pub fn state(&self, task_id: &str) -> Option<TaskState> {
        self.states.get(task_id).map(|s| s.clone())
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }
}
