//! In-process task queue and result backend for prediction batches.
//!
//! The web service submits a batch and gets a [`PendingTask`] back; workers
//! (local tokio tasks or remote processes talking to the `/broker` routes)
//! take tasks off the queue and complete them by id. Delivery is
//! at-most-once: a task is handed to exactly one consumer and never
//! re-queued.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// A batch of feature rows waiting for predictions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionTask {
    pub id: Uuid,
    pub rows: Vec<Vec<f64>>,
    pub submitted_at: DateTime<Utc>,
}

/// What a worker reports back for a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success { predictions: Vec<f64> },
    Failure { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("task queue is closed")]
    Closed,
    #[error("task queue stayed full for {0:?}")]
    QueueFull(Duration),
    #[error("no prediction arrived within {0:?}")]
    Timeout(Duration),
    #[error("task {0} was dropped before a result arrived")]
    Cancelled(Uuid),
    #[error("worker failed: {0}")]
    Worker(String),
    #[error("unknown or expired task {0}")]
    UnknownTask(Uuid),
}

type ResultSlots = Mutex<HashMap<Uuid, oneshot::Sender<TaskOutcome>>>;

/// Queue plus result backend. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Broker {
    queue: mpsc::Sender<PredictionTask>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<PredictionTask>>>,
    results: Arc<ResultSlots>,
}

impl Broker {
    pub fn new(capacity: usize) -> Self {
        let (queue, receiver) = mpsc::channel(capacity.max(1));
        Self {
            queue,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            results: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Enqueue a batch, waiting at most `timeout` for queue capacity.
    pub async fn submit(
        &self,
        rows: Vec<Vec<f64>>,
        timeout: Duration,
    ) -> Result<PendingTask, BrokerError> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.results.lock().insert(id, tx);

        // Created before sending so an abandoned submit frees its slot.
        let pending = PendingTask {
            id,
            receiver: rx,
            results: self.results.clone(),
        };

        let task = PredictionTask {
            id,
            rows,
            submitted_at: Utc::now(),
        };
        match self.queue.send_timeout(task, timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!(task_id = %id, "Task queue full for {timeout:?}, rejecting batch");
                return Err(BrokerError::QueueFull(timeout));
            }
            Err(SendTimeoutError::Closed(_)) => return Err(BrokerError::Closed),
        }

        tracing::debug!(task_id = %id, "Submitted prediction task");
        Ok(pending)
    }

    /// Submit a batch and wait for its predictions. `timeout` bounds the
    /// whole call, queueing included.
    pub async fn predict(
        &self,
        rows: Vec<Vec<f64>>,
        timeout: Duration,
    ) -> Result<Vec<f64>, BrokerError> {
        let started = tokio::time::Instant::now();
        let pending = self.submit(rows, timeout).await?;
        let remaining = timeout.saturating_sub(started.elapsed());
        pending.wait(remaining).await.map_err(|err| match err {
            BrokerError::Timeout(_) => BrokerError::Timeout(timeout),
            other => other,
        })
    }

    /// Take the next live task, waiting up to `wait`. Tasks whose submitter
    /// already gave up are discarded.
    pub async fn next_task(&self, wait: Duration) -> Option<PredictionTask> {
        let claim = async {
            let mut receiver = self.receiver.lock().await;
            loop {
                let task = receiver.recv().await?;
                if self.is_pending(&task.id) {
                    return Some(task);
                }
                tracing::debug!(task_id = %task.id, "Discarding cancelled task");
            }
        };
        tokio::time::timeout(wait, claim).await.ok().flatten()
    }

    /// Deliver the outcome of a task to its submitter.
    pub fn complete(&self, id: Uuid, outcome: TaskOutcome) -> Result<(), BrokerError> {
        let sender = self
            .results
            .lock()
            .remove(&id)
            .ok_or(BrokerError::UnknownTask(id))?;
        sender
            .send(outcome)
            .map_err(|_| BrokerError::UnknownTask(id))
    }

    pub fn is_pending(&self, id: &Uuid) -> bool {
        self.results.lock().contains_key(id)
    }

    /// Tasks submitted but not yet completed or cancelled.
    pub fn pending_count(&self) -> usize {
        self.results.lock().len()
    }
}

/// Submitter-side handle to a queued task. Dropping it cancels the task.
#[derive(Debug)]
pub struct PendingTask {
    id: Uuid,
    receiver: oneshot::Receiver<TaskOutcome>,
    results: Arc<ResultSlots>,
}

impl PendingTask {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the worker's result, giving up after `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> Result<Vec<f64>, BrokerError> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(TaskOutcome::Success { predictions })) => Ok(predictions),
            Ok(Ok(TaskOutcome::Failure { message })) => Err(BrokerError::Worker(message)),
            Ok(Err(_)) => Err(BrokerError::Cancelled(self.id)),
            Err(_) => {
                tracing::warn!(task_id = %self.id, "Prediction task timed out after {timeout:?}");
                Err(BrokerError::Timeout(timeout))
            }
        }
    }
}

impl Drop for PendingTask {
    fn drop(&mut self) {
        self.results.lock().remove(&self.id);
    }
}
