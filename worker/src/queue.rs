// ==============================================================================
// queue.rs - Redis Job Queue Management (Worker Side)
// ==============================================================================
// Description: Consumes analysis submissions and rerun requests from Redis
//              and publishes job progress on per-job pub/sub channels
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-10-16
// Version: 2.1.0
// ==============================================================================

use anyhow::{Context, Result};
use nutrigen_processor::PipelineStage;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::job::AnalysisJob;

pub const QUEUE_KEY: &str = "nutrigen:job_queue";

/// Submission payload pushed by the upload front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    /// Id the front end already handed to the user; generated when absent
    #[serde(default)]
    pub job_id: Option<Uuid>,
    pub owner_id: String,
    pub genome_path: String,
}

/// Request to re-run a finished job from a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerunPayload {
    pub job_id: Uuid,
    pub from_stage: PipelineStage,
}

/// One queue message; messages without an `action` are submissions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum QueueRequest {
    Submit(JobPayload),
    Rerun(RerunPayload),
}

/// Job queue manager
pub struct JobQueue {
    conn: ConnectionManager,
}

impl JobQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Dequeue a submission (blocking pop with timeout)
    pub async fn dequeue(&mut self) -> Result<Option<QueueRequest>> {
        // BRPOP with 1 second timeout
        let result: Option<(String, String)> = self
            .conn
            .brpop(QUEUE_KEY, 1.0)
            .await
            .context("Failed to pop from queue")?;

        match result {
            Some((_, payload_json)) => Ok(Some(parse_request(&payload_json)?)),
            None => Ok(None),
        }
    }
}

pub fn parse_request(raw: &str) -> Result<QueueRequest> {
    let mut value: Value =
        serde_json::from_str(raw).context("Failed to deserialize job payload")?;
    if let Some(fields) = value.as_object_mut() {
        fields
            .entry("action")
            .or_insert_with(|| Value::from("submit"));
    }
    let request: QueueRequest =
        serde_json::from_value(value).context("Failed to deserialize job payload")?;

    if let QueueRequest::Submit(payload) = &request {
        if payload.owner_id.trim().is_empty() {
            anyhow::bail!("Job payload has an empty owner_id");
        }
        if payload.genome_path.trim().is_empty() {
            anyhow::bail!("Job payload has an empty genome_path");
        }
    }
    Ok(request)
}

pub fn progress_channel(job_id: Uuid) -> String {
    format!("nutrigen:progress:{}", job_id)
}

/// Publishes persisted job snapshots for live progress displays
#[derive(Clone)]
pub struct ProgressPublisher {
    conn: ConnectionManager,
}

impl ProgressPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn publish(&self, job: &AnalysisJob) -> Result<()> {
        self.send(job.job_id, snapshot_message(job)).await
    }

    /// Tell the submitter a request for `job_id` was not accepted
    pub async fn publish_rejection(&self, job_id: Uuid, reason: &str) -> Result<()> {
        self.send(job_id, rejection_message(job_id, reason)).await
    }

    async fn send(&self, job_id: Uuid, message: Value) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(progress_channel(job_id), message.to_string())
            .await
            .context("Failed to publish progress update")?;

        Ok(())
    }
}

fn snapshot_message(job: &AnalysisJob) -> Value {
    serde_json::json!({
        "job_id": job.job_id,
        "status": job.status.as_str(),
        "current_step": job.current_step.as_str(),
        "progress_pct": job.progress_percent,
        "error_message": job.error_message,
    })
}

fn rejection_message(job_id: Uuid, reason: &str) -> Value {
    serde_json::json!({
        "job_id": job_id,
        "status": "rejected",
        "error_message": reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submission() {
        let request =
            parse_request(r#"{"owner_id": "alice", "genome_path": "/data/uploads/a.txt"}"#).unwrap();
        assert_eq!(
            request,
            QueueRequest::Submit(JobPayload {
                job_id: None,
                owner_id: "alice".to_string(),
                genome_path: "/data/uploads/a.txt".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_submission_with_job_id() {
        let request = parse_request(
            r#"{"action": "submit", "job_id": "6f1c9a52-3e0b-4d5e-9a57-0c1b2d3e4f50",
                "owner_id": "alice", "genome_path": "/a.txt"}"#,
        )
        .unwrap();
        let QueueRequest::Submit(payload) = request else {
            panic!("expected a submission");
        };
        assert_eq!(
            payload.job_id,
            Some(Uuid::parse_str("6f1c9a52-3e0b-4d5e-9a57-0c1b2d3e4f50").unwrap())
        );
    }

    #[test]
    fn test_parse_rerun() {
        let request = parse_request(
            r#"{"action": "rerun", "job_id": "6f1c9a52-3e0b-4d5e-9a57-0c1b2d3e4f50",
                "from_stage": "enriching"}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            QueueRequest::Rerun(RerunPayload {
                job_id: Uuid::parse_str("6f1c9a52-3e0b-4d5e-9a57-0c1b2d3e4f50").unwrap(),
                from_stage: PipelineStage::Enriching,
            })
        );

        assert!(parse_request(
            r#"{"action": "rerun", "job_id": "6f1c9a52-3e0b-4d5e-9a57-0c1b2d3e4f50",
                "from_stage": "imputing"}"#
        )
        .is_err());
    }

    #[test]
    fn test_parse_payload_rejects_incomplete() {
        assert!(parse_request(r#"{"owner_id": "alice"}"#).is_err());
        assert!(parse_request(r#"{"owner_id": " ", "genome_path": "/a"}"#).is_err());
        assert!(parse_request(r#"{"action": "rerun", "from_stage": "ranking"}"#).is_err());
        assert!(parse_request(r#"{"action": "delete", "job_id": "x"}"#).is_err());
        assert!(parse_request("not json").is_err());
    }

    #[test]
    fn test_rejection_message() {
        let job_id = Uuid::new_v4();
        let message = rejection_message(job_id, "owner 'alice' already has an analysis in progress");

        assert_eq!(message["job_id"], job_id.to_string());
        assert_eq!(message["status"], "rejected");
        assert_eq!(
            message["error_message"],
            "owner 'alice' already has an analysis in progress"
        );
    }
}
