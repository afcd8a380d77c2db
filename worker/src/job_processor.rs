// ==============================================================================
// job_processor.rs - Analysis Job Execution
// ==============================================================================
// Description: Runs the analysis pipeline for one job, routing progress
//              through the job's recorder and converting every failure,
//              panics included, into a failed job record
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-10-12
// Version: 2.0.0
// ==============================================================================

use nutrigen_processor::output::ArtifactStore;
use nutrigen_processor::{AnalysisPipeline, PipelineError, PipelineStage, PipelineSummary};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::job::AnalysisJob;
use crate::progress::{spawn_recorder, ProgressEvent};
use crate::queue::ProgressPublisher;
use crate::store::JobStore;

/// Executes jobs against shared reference data and a shared knowledge client
pub struct JobProcessor {
    pipeline: Arc<AnalysisPipeline>,
    store: Arc<dyn JobStore>,
    data_dir: PathBuf,
    publisher: Option<ProgressPublisher>,
}

impl JobProcessor {
    pub fn new(
        pipeline: Arc<AnalysisPipeline>,
        store: Arc<dyn JobStore>,
        data_dir: PathBuf,
        publisher: Option<ProgressPublisher>,
    ) -> Self {
        Self {
            pipeline,
            store,
            data_dir,
            publisher,
        }
    }

    /// Run `job` from `from` to a terminal state and return the final record
    ///
    /// The job must already be persisted with status processing.
    pub async fn run(&self, job: AnalysisJob, from: PipelineStage) -> AnalysisJob {
        let job_id = job.job_id;
        info!("Processing job {} for owner {} from {}", job_id, job.owner_id, from);

        let (reporter, recorder) =
            spawn_recorder(Arc::clone(&self.store), job.clone(), self.publisher.clone());

        let outcome = match ArtifactStore::for_job(&self.data_dir, &job.owner_id, &job_id.to_string()) {
            Ok(artifacts) => {
                let pipeline = Arc::clone(&self.pipeline);
                let mut stage_reporter = reporter.clone();
                let genome_path = PathBuf::from(&job.genome_path);

                // Separate task so a panic surfaces as a JoinError
                let handle = tokio::spawn(async move {
                    pipeline
                        .execute(Some(&genome_path), &artifacts, from, &mut stage_reporter)
                        .await
                });

                match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(PipelineError::Internal(format!("job task failed: {}", e))),
                }
            }
            Err(e) => Err(PipelineError::from(e)),
        };

        let final_event = completion_event(job_id, &outcome);
        if let Err(e) = reporter.send(final_event).await {
            error!("Failed to record final state of job {}: {}", job_id, e);
        }
        drop(reporter);

        match recorder.await {
            Ok(last) => last,
            Err(e) => {
                error!("Progress recorder for job {} failed: {}", job_id, e);
                job
            }
        }
    }
}

fn completion_event(
    job_id: uuid::Uuid,
    outcome: &Result<PipelineSummary, PipelineError>,
) -> ProgressEvent {
    match outcome {
        Ok(summary) => {
            if summary.degraded_lookups.unwrap_or(0) > 0 {
                warn!(
                    "Job {} completed with {} degraded knowledge lookups",
                    job_id,
                    summary.degraded_lookups.unwrap_or(0)
                );
            }
            info!(
                "Job {} completed: {} recommendations",
                job_id, summary.recommendations
            );
            ProgressEvent::Completed
        }
        Err(e) => {
            error!("Job {} failed: {}", job_id, e);
            ProgressEvent::Failed(e.to_string())
        }
    }
}
