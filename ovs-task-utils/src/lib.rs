// Copyright (c) 2021 Open vStorage QA. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use futures::{channel::mpsc, future::try_join_all};
use ovs_api_client::{ApiClient, ApiClientError};
use ovs_request_retry::{poll_until, FixedInterval, PollError};
pub use ovs_wire_types::{TaskId, TaskOutcome, TaskStatus};
use serde_json::Value;
use std::{io, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Waiting for task {task_id} has timed out after {elapsed:?}")]
    Timeout { task_id: TaskId, elapsed: Duration },
    #[error(transparent)]
    Client(#[from] ApiClientError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Task {task_id} failed: {result}")]
    Failed { task_id: TaskId, result: Value },
    #[error("{} task(s) failed: {:?}", .0.len(), .0)]
    FailedMany(Vec<(TaskId, Value)>),
}

impl From<Vec<(TaskId, Value)>> for TaskError {
    fn from(xs: Vec<(TaskId, Value)>) -> Self {
        TaskError::FailedMany(xs)
    }
}

/// Somewhere task state can be read from.
#[async_trait::async_trait]
pub trait TaskSource: Sync {
    type Error: Into<TaskError> + Send;

    /// Read the task as it is now. Must not change it.
    async fn task_status(&self, id: &TaskId) -> Result<TaskStatus, Self::Error>;

    /// Delay between two reads of the same task
    fn poll_interval(&self) -> Duration {
        Duration::from_secs(1)
    }
}

#[async_trait::async_trait]
impl TaskSource for ApiClient {
    type Error = ApiClientError;

    async fn task_status(&self, id: &TaskId) -> Result<TaskStatus, Self::Error> {
        self.get_task(id).await
    }

    fn poll_interval(&self) -> Duration {
        self.config().poll_interval
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    Pending(TaskId),
    Complete(TaskId, TaskOutcome),
}

async fn wait_for_task_progress<S: TaskSource>(
    source: &S,
    id: &TaskId,
    timeout: Option<Duration>,
    tx: Option<&mpsc::UnboundedSender<Progress>>,
) -> Result<TaskOutcome, TaskError> {
    let r = poll_until(
        |_| async move {
            let status = source
                .task_status(id)
                .await
                .map_err(Into::<TaskError>::into)?;

            let outcome = status.outcome();

            if let Some(tx) = tx {
                let _ = tx.unbounded_send(match &outcome {
                    Some(x) => Progress::Complete(id.clone(), x.clone()),
                    None => Progress::Pending(id.clone()),
                });
            }

            Ok::<_, TaskError>(outcome)
        },
        FixedInterval(source.poll_interval()),
        timeout,
    )
    .await;

    match r {
        Ok(x) => {
            tracing::debug!("Task {} finished, successful: {}", id, x.successful);

            Ok(x)
        }
        Err(PollError::Timeout { elapsed, .. }) => Err(TaskError::Timeout {
            task_id: id.clone(),
            elapsed,
        }),
        Err(PollError::Inner(e)) => Err(e),
    }
}

/// Polls the task until it is ready and returns how it ended.
///
/// A task that finished unsuccessfully is *not* an error here, check `successful`.
/// Errors reading the task are returned as-is, without retrying.
/// `timeout` of `None` waits for as long as it takes.
pub async fn wait_for_task<S: TaskSource>(
    source: &S,
    id: &TaskId,
    timeout: Option<Duration>,
) -> Result<TaskOutcome, TaskError> {
    wait_for_task_progress(source, id, timeout, None).await
}

/// Like `wait_for_task`, but an unsuccessful task is turned into `TaskError::Failed`
/// carrying the task result as diagnostic.
pub async fn wait_for_task_success<S: TaskSource>(
    source: &S,
    id: &TaskId,
    timeout: Option<Duration>,
) -> Result<Value, TaskError> {
    let outcome = wait_for_task(source, id, timeout).await?;

    if outcome.successful {
        Ok(outcome.result)
    } else {
        tracing::warn!("Task {} failed: {}", id, outcome.message());

        Err(TaskError::Failed {
            task_id: id.clone(),
            result: outcome.result,
        })
    }
}

/// Waits for all given tasks concurrently, optionally reporting progress on `tx`.
///
/// Outcomes come back in the order of `ids`.
/// This *does not* error on task failure, it only tracks completion.
pub async fn wait_for_tasks<S: TaskSource>(
    source: &S,
    ids: &[TaskId],
    timeout: Option<Duration>,
    tx: Option<mpsc::UnboundedSender<Progress>>,
) -> Result<Vec<(TaskId, TaskOutcome)>, TaskError> {
    let tx = tx.as_ref();

    let xs = try_join_all(ids.iter().map(|id| async move {
        let outcome = wait_for_task_progress(source, id, timeout, tx).await?;

        Ok::<_, TaskError>((id.clone(), outcome))
    }))
    .await?;

    tracing::debug!("All tasks complete. Returning");

    Ok(xs)
}

/// Waits for all given tasks.
/// This will error on task failure and list every failed task in the error.
pub async fn wait_for_tasks_success<S: TaskSource>(
    source: &S,
    ids: &[TaskId],
    timeout: Option<Duration>,
    tx: Option<mpsc::UnboundedSender<Progress>>,
) -> Result<Vec<(TaskId, Value)>, TaskError> {
    let xs = wait_for_tasks(source, ids, timeout, tx).await?;

    let (failed, passed): (Vec<_>, Vec<_>) = xs.into_iter().partition(|(_, x)| !x.successful);

    if !failed.is_empty() {
        Err(failed
            .into_iter()
            .map(|(id, x)| (id, x.result))
            .collect::<Vec<_>>()
            .into())
    } else {
        Ok(passed.into_iter().map(|(id, x)| (id, x.result)).collect())
    }
}

/// Kick off asynchronous work with a POST and wait for it to succeed.
pub async fn submit_and_wait(
    client: &ApiClient,
    path: impl ToString,
    body: impl serde::Serialize,
    timeout: Option<Duration>,
) -> Result<Value, TaskError> {
    let path = path.to_string();

    let id = client.post_task(&path, body).await?;

    tracing::info!("POST to {} spawned task {}", path, id);

    wait_for_task_success(client, &id, timeout).await
}
