// ==============================================================================
// progress.rs - Per-Job Progress Recorder
// ==============================================================================
// Description: Single writer of a job record. Pipeline stages send progress
//              events over a channel; each event is persisted before it is
//              acknowledged.
// Author: Matt Barham
// Created: 2026-09-26
// Modified: 2026-10-12
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use nutrigen_processor::{PipelineError, PipelineStage, StageObserver};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::job::AnalysisJob;
use crate::queue::ProgressPublisher;
use crate::store::{JobStore, StoreError};

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    StageStarted(PipelineStage),
    StageCompleted { stage: PipelineStage, artifact: String },
    Completed,
    Failed(String),
}

struct ProgressCommand {
    event: ProgressEvent,
    ack: oneshot::Sender<Result<(), StoreError>>,
}

/// Sending half handed to the pipeline
#[derive(Clone)]
pub struct ProgressReporter {
    tx: mpsc::Sender<ProgressCommand>,
}

impl ProgressReporter {
    /// Send an event and wait until it is persisted
    pub async fn send(&self, event: ProgressEvent) -> Result<(), PipelineError> {
        let (ack, ack_rx) = oneshot::channel();
        self.tx
            .send(ProgressCommand { event, ack })
            .await
            .map_err(|_| PipelineError::Persistence("progress recorder stopped".to_string()))?;

        match ack_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PipelineError::Persistence(e.to_string())),
            Err(_) => Err(PipelineError::Persistence(
                "progress recorder dropped the update".to_string(),
            )),
        }
    }
}

#[async_trait]
impl StageObserver for ProgressReporter {
    async fn stage_started(&mut self, stage: PipelineStage) -> Result<(), PipelineError> {
        self.send(ProgressEvent::StageStarted(stage)).await
    }

    async fn stage_completed(
        &mut self,
        stage: PipelineStage,
        artifact: &Path,
    ) -> Result<(), PipelineError> {
        self.send(ProgressEvent::StageCompleted {
            stage,
            artifact: artifact.to_string_lossy().into_owned(),
        })
        .await
    }
}

fn apply(job: &mut AnalysisJob, event: ProgressEvent) {
    match event {
        ProgressEvent::StageStarted(stage) => job.stage_started(stage),
        ProgressEvent::StageCompleted { stage, artifact } => job.stage_completed(stage, artifact),
        ProgressEvent::Completed => job.complete(),
        ProgressEvent::Failed(message) => job.fail(message),
    }
}

/// Start the recorder task for `job`
///
/// The task ends once every reporter is dropped and returns the last
/// persisted record.
pub fn spawn_recorder(
    store: Arc<dyn JobStore>,
    job: AnalysisJob,
    publisher: Option<ProgressPublisher>,
) -> (ProgressReporter, JoinHandle<AnalysisJob>) {
    let (tx, mut rx) = mpsc::channel::<ProgressCommand>(CHANNEL_CAPACITY);

    let handle = tokio::spawn(async move {
        let mut job = job;

        while let Some(command) = rx.recv().await {
            let mut next = job.clone();
            apply(&mut next, command.event);

            let result = store.update(&next).await;
            match &result {
                Ok(()) => {
                    debug!(
                        "Job {}: {} {}% ({})",
                        next.job_id, next.current_step, next.progress_percent, next.status
                    );
                    job = next;
                    if let Some(publisher) = &publisher {
                        if let Err(e) = publisher.publish(&job).await {
                            warn!("Failed to publish progress for job {}: {}", job.job_id, e);
                        }
                    }
                }
                Err(e) => warn!("Failed to persist progress for job {}: {}", job.job_id, e),
            }

            // Sender may have given up waiting
            let _ = command.ack.send(result);
        }

        job
    });

    (ProgressReporter { tx }, handle)
}
