// Copyright (c) 2021 Open vStorage QA. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use std::{convert::TryFrom, fmt};

pub trait EndpointName {
    fn endpoint_name() -> &'static str;
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("Task id must not be empty")]
pub struct EmptyTaskId;

/// Opaque identifier the API hands out for an asynchronous task.
#[derive(Eq, PartialEq, Hash, Debug, Clone, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Result<Self, EmptyTaskId> {
        let id = id.into();

        if id.trim().is_empty() {
            Err(EmptyTaskId)
        } else {
            Ok(TaskId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TaskId {
    type Error = EmptyTaskId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        TaskId::new(s)
    }
}

impl TryFrom<&str> for TaskId {
    type Error = EmptyTaskId;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        TaskId::new(s)
    }
}

impl From<TaskId> for String {
    fn from(TaskId(s): TaskId) -> String {
        s
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a POST that kicks off asynchronous work responds with.
///
/// Most endpoints return the task id as a bare JSON string,
/// a few wrap it in an object.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(untagged)]
pub enum SubmittedTask {
    Id(TaskId),
    Object {
        #[serde(alias = "task_id")]
        id: TaskId,
    },
}

impl From<SubmittedTask> for TaskId {
    fn from(x: SubmittedTask) -> Self {
        match x {
            SubmittedTask::Id(id) | SubmittedTask::Object { id } => id,
        }
    }
}

/// A snapshot of a task as reported by `GET tasks/{id}/`.
///
/// `successful` and `result` only carry meaning once `ready` is true.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaskStatus {
    #[serde(default)]
    pub id: Option<TaskId>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub successful: bool,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub result: serde_json::Value,
}

impl TaskStatus {
    /// The terminal outcome, or `None` while the task is still running.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        if self.ready {
            Some(TaskOutcome {
                successful: self.successful,
                result: self.result.clone(),
            })
        } else {
            None
        }
    }
}

impl EndpointName for TaskStatus {
    fn endpoint_name() -> &'static str {
        "tasks"
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaskOutcome {
    pub successful: bool,
    pub result: serde_json::Value,
}

impl TaskOutcome {
    /// Human readable form of `result`, used in error messages.
    pub fn message(&self) -> String {
        match &self.result {
            serde_json::Value::String(s) => s.clone(),
            x => x.to_string(),
        }
    }
}

/// OAuth2 token as returned by `oauth2/token/`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds
    pub expires_in: u64,
}

fn default_token_type() -> String {
    "Bearer".into()
}

/// Envelope for list endpoints
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ApiList<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StorageRouter {
    pub guid: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl EndpointName for StorageRouter {
    fn endpoint_name() -> &'static str {
        "storagerouters"
    }
}
