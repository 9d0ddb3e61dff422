use anyhow::{Context, Result};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::{Broker, PredictionTask, TaskOutcome};
use crate::model::SharedPredictor;

/// How long an idle local worker waits on the queue before looping.
const LOCAL_IDLE_WAIT: Duration = Duration::from_secs(30);

/// Pause before re-polling after a transport error.
const REMOTE_BACKOFF: Duration = Duration::from_secs(5);

/// Run one batch through the model on the blocking pool.
pub async fn run_prediction(predictor: SharedPredictor, rows: Vec<Vec<f64>>) -> TaskOutcome {
    let expected = rows.len();
    let result = tokio::task::spawn_blocking(move || predictor.predict(&rows)).await;

    match result {
        Ok(Ok(predictions)) if predictions.len() == expected => {
            TaskOutcome::Success { predictions }
        }
        Ok(Ok(predictions)) => TaskOutcome::Failure {
            message: format!(
                "Model returned {} predictions for {expected} rows",
                predictions.len()
            ),
        },
        Ok(Err(e)) => TaskOutcome::Failure {
            message: format!("{e:#}"),
        },
        Err(e) => TaskOutcome::Failure {
            message: format!("Prediction task panicked: {e}"),
        },
    }
}

/// A fixed set of in-process workers consuming the broker queue.
/// Workers are aborted when the pool is dropped.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(count: usize, broker: Broker, predictor: SharedPredictor) -> Self {
        let handles = (0..count)
            .map(|worker_id| {
                let broker = broker.clone();
                let predictor = predictor.clone();
                tokio::spawn(local_worker(worker_id, broker, predictor))
            })
            .collect();
        tracing::info!(workers = count, "Started local prediction workers");
        Self { handles }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn local_worker(worker_id: usize, broker: Broker, predictor: SharedPredictor) {
    loop {
        let Some(task) = broker.next_task(LOCAL_IDLE_WAIT).await else {
            continue;
        };
        let PredictionTask { id, rows, .. } = task;
        tracing::debug!(worker_id, task_id = %id, rows = rows.len(), "Processing task");

        let outcome = run_prediction(predictor.clone(), rows).await;
        if let TaskOutcome::Failure { message } = &outcome {
            tracing::warn!(worker_id, task_id = %id, "Prediction failed: {message}");
        }
        if let Err(e) = broker.complete(id, outcome) {
            // The submitter timed out while we were computing.
            tracing::debug!(worker_id, task_id = %id, "Dropping result: {e}");
        }
    }
}

/// Worker process that pulls tasks from a remote broker over HTTP.
pub struct RemoteWorker {
    client: reqwest::Client,
    broker_url: String,
    predictor: SharedPredictor,
}

impl RemoteWorker {
    /// `claim_poll` is the broker's long-poll window; the HTTP timeout is
    /// set comfortably above it.
    pub fn new(broker_url: &str, predictor: SharedPredictor, claim_poll: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(claim_poll + Duration::from_secs(30))
            .build()
            .context("Failed to build broker HTTP client")?;
        Ok(Self {
            client,
            broker_url: broker_url.trim_end_matches('/').to_string(),
            predictor,
        })
    }

    /// Ask the broker for a task. `None` means the poll window passed idle.
    pub async fn claim(&self) -> Result<Option<PredictionTask>> {
        let resp = self
            .client
            .post(format!("{}/broker/tasks/claim", self.broker_url))
            .send()
            .await
            .context("Failed to reach broker")?;

        match resp.status() {
            reqwest::StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => {
                let task = resp
                    .json::<PredictionTask>()
                    .await
                    .context("Failed to decode claimed task")?;
                Ok(Some(task))
            }
            status => {
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("Broker returned {status} on claim: {body}")
            }
        }
    }

    /// Report an outcome. Returns `false` when the broker no longer knows
    /// the task (its submitter gave up).
    pub async fn report(&self, id: Uuid, outcome: &TaskOutcome) -> Result<bool> {
        let resp = self
            .client
            .post(format!("{}/broker/tasks/{id}/result", self.broker_url))
            .json(outcome)
            .send()
            .await
            .context("Failed to reach broker")?;

        match resp.status() {
            status if status.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("Broker returned {status} on result: {body}")
            }
        }
    }

    /// Claim, compute and report at most one task. Returns whether a task
    /// was processed.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(task) = self.claim().await? else {
            return Ok(false);
        };
        let PredictionTask { id, rows, .. } = task;
        tracing::info!(task_id = %id, rows = rows.len(), "Claimed task");

        let outcome = run_prediction(self.predictor.clone(), rows).await;
        if !self.report(id, &outcome).await? {
            tracing::warn!(task_id = %id, "Broker discarded result for expired task");
        }
        Ok(true)
    }

    /// Poll forever, backing off after transport errors.
    pub async fn run(&self) {
        tracing::info!(broker = %self.broker_url, "Remote worker polling for tasks");
        loop {
            if let Err(e) = self.run_once().await {
                tracing::warn!("Worker poll failed: {e:#}; retrying in {REMOTE_BACKOFF:?}");
                tokio::time::sleep(REMOTE_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;
    use crate::model::Predictor;
    use std::sync::Arc;

    /// Predicts the sum of each row; fails on empty rows.
    struct SumPredictor;

    impl Predictor for SumPredictor {
        fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
            if rows.iter().any(|r| r.is_empty()) {
                anyhow::bail!("empty row");
            }
            Ok(rows.iter().map(|r| r.iter().sum()).collect())
        }

        fn feature_count(&self) -> usize {
            2
        }
    }

    /// Always returns a single value regardless of input.
    struct ShortPredictor;

    impl Predictor for ShortPredictor {
        fn predict(&self, _rows: &[Vec<f64>]) -> Result<Vec<f64>> {
            Ok(vec![1.0])
        }

        fn feature_count(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn test_run_prediction_success() {
        let outcome = run_prediction(Arc::new(SumPredictor), vec![vec![1.0, 2.0], vec![3.0, 4.0]]).await;
        assert_eq!(
            outcome,
            TaskOutcome::Success {
                predictions: vec![3.0, 7.0]
            }
        );
    }

    #[tokio::test]
    async fn test_run_prediction_reports_model_error() {
        let outcome = run_prediction(Arc::new(SumPredictor), vec![vec![]]).await;
        assert!(matches!(outcome, TaskOutcome::Failure { message } if message.contains("empty row")));
    }

    #[tokio::test]
    async fn test_run_prediction_rejects_wrong_length() {
        let outcome = run_prediction(Arc::new(ShortPredictor), vec![vec![1.0], vec![2.0]]).await;
        assert!(matches!(outcome, TaskOutcome::Failure { message } if message.contains("1 predictions for 2 rows")));
    }

    #[tokio::test]
    async fn test_pool_serves_submitted_tasks() {
        let broker = Broker::new(8);
        let _pool = WorkerPool::spawn(2, broker.clone(), Arc::new(SumPredictor));

        let timeout = Duration::from_secs(5);
        let a = broker.submit(vec![vec![1.0, 1.0]], timeout).await.unwrap();
        let b = broker.submit(vec![vec![2.0, 2.0]], timeout).await.unwrap();
        assert_eq!(a.wait(timeout).await.unwrap(), vec![2.0]);
        assert_eq!(b.wait(timeout).await.unwrap(), vec![4.0]);
    }

    #[tokio::test]
    async fn test_pool_surfaces_model_failure() {
        let broker = Broker::new(8);
        let _pool = WorkerPool::spawn(1, broker.clone(), Arc::new(SumPredictor));

        let pending = broker.submit(vec![vec![]], Duration::from_secs(5)).await.unwrap();
        let err = pending.wait(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, BrokerError::Worker(m) if m.contains("empty row")));
    }

    #[tokio::test]
    async fn test_without_workers_submitter_times_out() {
        let broker = Broker::new(8);
        let pending = broker.submit(vec![vec![1.0, 2.0]], Duration::from_secs(5)).await.unwrap();
        let err = pending.wait(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, BrokerError::Timeout(_)));
    }
}
