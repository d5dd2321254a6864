//! Operation Recorder
//!
//! Sink notified after every command that ran to completion. Recording is
//! best-effort: the gateway hands records off on a background task and a
//! failing or slow recorder never affects the caller.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GatewaySettings;
use crate::ssh::CommandOutput;

/// Maximum characters of stdout/stderr kept per record
pub const MAX_RECORDED_OUTPUT_CHARS: usize = 30_000;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Recorder unavailable: {0}")]
    Unavailable(String),
}

/// One executed command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub job_id: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requesting_user: Option<String>,
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub recorded_at: DateTime<Utc>,
}

impl OperationRecord {
    pub fn new(
        target: impl Into<String>,
        requesting_user: Option<String>,
        command: impl Into<String>,
        output: &CommandOutput,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            target: target.into(),
            requesting_user,
            command: command.into(),
            exit_code: output.exit_code,
            stdout: truncate_chars(&output.stdout, MAX_RECORDED_OUTPUT_CHARS),
            stderr: truncate_chars(&output.stderr, MAX_RECORDED_OUTPUT_CHARS),
            recorded_at: Utc::now(),
        }
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

#[async_trait]
pub trait OperationRecorder: Send + Sync {
    async fn record(&self, record: &OperationRecord) -> Result<(), RecorderError>;
}

/// Emits one structured log event per operation
#[derive(Debug, Default, Clone)]
pub struct TracingRecorder;

#[async_trait]
impl OperationRecorder for TracingRecorder {
    async fn record(&self, record: &OperationRecord) -> Result<(), RecorderError> {
        info!(
            job_id = %record.job_id,
            target = %record.target,
            user = record.requesting_user.as_deref().unwrap_or("-"),
            exit_code = record.exit_code,
            stdout_chars = record.stdout.chars().count(),
            stderr_chars = record.stderr.chars().count(),
            "[recorder] {}",
            record.command
        );
        Ok(())
    }
}

/// Bounded in-memory history, oldest entries evicted first
pub struct MemoryRecorder {
    capacity: usize,
    records: Mutex<VecDeque<OperationRecord>>,
}

impl MemoryRecorder {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self::new(settings.recorder_capacity)
    }

    /// Up to `limit` records, newest first
    pub fn recent(&self, limit: usize) -> Vec<OperationRecord> {
        self.records.lock().iter().rev().take(limit).cloned().collect()
    }

    /// All retained records for a target, oldest first
    pub fn for_target(&self, target: &str) -> Vec<OperationRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.target == target)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl OperationRecorder for MemoryRecorder {
    async fn record(&self, record: &OperationRecord) -> Result<(), RecorderError> {
        let mut records = self.records.lock();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());
        Ok(())
    }
}

/// Hand a record to the recorder on a background task.
///
/// Errors are logged and dropped.
pub fn dispatch(recorder: Arc<dyn OperationRecorder>, record: OperationRecord) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = recorder.record(&record).await {
            warn!(
                "[recorder] Failed to record job {} on {}: {}",
                record.job_id, record.target, e
            );
        }
    })
}
