// Copyright (c) 2021 Open vStorage QA. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use futures::{channel::mpsc, StreamExt};
use ovs_task_utils::{
    wait_for_task, wait_for_task_success, wait_for_tasks, wait_for_tasks_success, Progress,
    TaskError, TaskId, TaskOutcome, TaskSource, TaskStatus,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::{collections::HashMap, io, time::Duration};
use tokio::time::Instant;

fn pending() -> TaskStatus {
    serde_json::from_value(json!({"ready": false})).unwrap()
}

fn ready(successful: bool, result: serde_json::Value) -> TaskStatus {
    serde_json::from_value(json!({
        "ready": true,
        "successful": successful,
        "failed": !successful,
        "result": result,
    }))
    .unwrap()
}

fn id(x: &str) -> TaskId {
    TaskId::new(x).unwrap()
}

/// Serves a scripted sequence of states per task.
/// The last state of a script is repeated forever.
#[derive(Default)]
struct FakeTasks {
    scripts: Mutex<HashMap<TaskId, Vec<TaskStatus>>>,
    reads: Mutex<HashMap<TaskId, usize>>,
}

impl FakeTasks {
    fn with(self, task: &str, script: Vec<TaskStatus>) -> Self {
        self.scripts.lock().insert(id(task), script);

        self
    }

    fn reads(&self, task: &str) -> usize {
        self.reads.lock().get(&id(task)).cloned().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl TaskSource for FakeTasks {
    type Error = io::Error;

    async fn task_status(&self, task: &TaskId) -> Result<TaskStatus, io::Error> {
        let mut reads = self.reads.lock();
        let n = reads.entry(task.clone()).or_insert(0);

        *n += 1;

        let scripts = self.scripts.lock();

        let script = scripts
            .get(task)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such task"))?;

        Ok(script[usize::min(*n, script.len()) - 1].clone())
    }
}

#[tokio::test(start_paused = true)]
async fn test_ready_after_three_pending_reads() {
    ovs_tracing::init();

    let tasks = FakeTasks::default().with(
        "abc",
        vec![pending(), pending(), pending(), ready(true, json!("done"))],
    );

    let outcome = wait_for_task(&tasks, &id("abc"), Some(Duration::from_secs(30)))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TaskOutcome {
            successful: true,
            result: json!("done")
        }
    );
    assert_eq!(tasks.reads("abc"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_read_is_idempotent() {
    let tasks = FakeTasks::default().with("abc", vec![pending(), ready(false, json!("boom"))]);

    let first = wait_for_task(&tasks, &id("abc"), None).await.unwrap();
    let second = wait_for_task(&tasks, &id("abc"), None).await.unwrap();

    assert_eq!(first, second);
    assert!(!first.successful);
    assert_eq!(tasks.reads("abc"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_within_one_interval() {
    let tasks = FakeTasks::default().with("stuck", vec![pending()]);
    let timeout = Duration::from_secs(10);

    let start = Instant::now();

    let err = wait_for_task(&tasks, &id("stuck"), Some(timeout))
        .await
        .unwrap_err();

    let took = start.elapsed();

    match err {
        TaskError::Timeout { task_id, elapsed } => {
            assert_eq!(task_id, id("stuck"));
            assert!(elapsed >= timeout);
        }
        x => panic!("Expected a timeout, got {:?}", x),
    }

    assert!(took >= timeout);
    assert!(took <= timeout + Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_no_timeout_waits_as_long_as_needed() {
    let mut script = vec![pending(); 500];
    script.push(ready(true, json!({"vpool": "myvpool01"})));

    let tasks = FakeTasks::default().with("slow", script);

    let start = Instant::now();

    let outcome = wait_for_task(&tasks, &id("slow"), None).await.unwrap();

    assert!(outcome.successful);
    assert_eq!(tasks.reads("slow"), 501);
    assert_eq!(start.elapsed(), Duration::from_secs(500));
}

#[tokio::test(start_paused = true)]
async fn test_read_errors_are_not_retried() {
    let tasks = FakeTasks::default();

    let err = wait_for_task(&tasks, &id("ghost"), Some(Duration::from_secs(30)))
        .await
        .unwrap_err();

    assert!(matches!(err, TaskError::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
    assert_eq!(tasks.reads("ghost"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_success_helper_reports_result() {
    let tasks = FakeTasks::default()
        .with("ok", vec![ready(true, json!(42))])
        .with("bad", vec![pending(), ready(false, json!("Disk sdb is already claimed"))]);

    assert_eq!(
        wait_for_task_success(&tasks, &id("ok"), None).await.unwrap(),
        json!(42)
    );

    let err = wait_for_task_success(&tasks, &id("bad"), None)
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        r#"Task bad failed: "Disk sdb is already claimed""#
    );
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_tasks_keeps_order_and_reports_progress() {
    let tasks = FakeTasks::default()
        .with("a", vec![pending(), pending(), ready(true, json!("a"))])
        .with("b", vec![ready(false, json!("b"))]);

    let (tx, rx) = mpsc::unbounded();

    let xs = wait_for_tasks(&tasks, &[id("a"), id("b")], None, Some(tx))
        .await
        .unwrap();

    assert_eq!(
        xs.iter().map(|(x, _)| x.as_str()).collect::<Vec<_>>(),
        vec!["a", "b"]
    );
    assert!(xs[0].1.successful);
    assert!(!xs[1].1.successful);

    let progress: Vec<_> = rx.collect().await;

    let pending_a = progress
        .iter()
        .filter(|x| **x == Progress::Pending(id("a")))
        .count();

    assert_eq!(pending_a, 2);
    assert!(progress.contains(&Progress::Complete(
        id("b"),
        TaskOutcome {
            successful: false,
            result: json!("b")
        }
    )));
    assert_eq!(
        progress
            .iter()
            .filter(|x| matches!(x, Progress::Complete(..)))
            .count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_tasks_success_lists_failures() {
    let tasks = FakeTasks::default()
        .with("a", vec![ready(true, json!("a"))])
        .with("b", vec![ready(false, json!("b broke"))])
        .with("c", vec![pending(), ready(false, json!("c broke"))]);

    let err = wait_for_tasks_success(&tasks, &[id("a"), id("b"), id("c")], None, None)
        .await
        .unwrap_err();

    match err {
        TaskError::FailedMany(xs) => assert_eq!(
            xs,
            vec![(id("b"), json!("b broke")), (id("c"), json!("c broke"))]
        ),
        x => panic!("Expected failed tasks, got {:?}", x),
    }
}
