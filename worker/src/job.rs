// ==============================================================================
// job.rs - Analysis Job Record
// ==============================================================================
// Description: Job state machine, progress milestones and artifact paths
// Author: Matt Barham
// Created: 2026-09-25
// Modified: 2026-10-11
// Version: 1.0.0
// ==============================================================================
// Steps: created → matching → estimating → ranking → enriching → aggregating
//        → completed. Status `failed` may be entered from any in-progress
//        step; current_step then keeps the step that failed.
// ==============================================================================

use chrono::{DateTime, Utc};
use nutrigen_processor::output::ArtifactKind;
use nutrigen_processor::PipelineStage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStep {
    Created,
    Stage(PipelineStage),
    Completed,
}

impl JobStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStep::Created => "created",
            JobStep::Stage(stage) => stage.as_str(),
            JobStep::Completed => "completed",
        }
    }
}

impl FromStr for JobStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStep::Created),
            "completed" => Ok(JobStep::Completed),
            other => other.parse::<PipelineStage>().map(JobStep::Stage),
        }
    }
}

impl fmt::Display for JobStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress percentages at the start and end of a stage
pub fn milestones(stage: PipelineStage) -> (u8, u8) {
    match stage {
        PipelineStage::Matching => (10, 30),
        PipelineStage::Estimating => (35, 50),
        PipelineStage::Ranking => (55, 65),
        PipelineStage::Enriching => (70, 85),
        PipelineStage::Aggregating => (90, 100),
    }
}

/// Paths of the artifacts written so far
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageArtifacts {
    pub matched_variants: Option<String>,
    pub disease_candidates: Option<String>,
    pub ranked_diseases: Option<String>,
    pub enriched_associations: Option<String>,
    pub recommendations: Option<String>,
}

impl StageArtifacts {
    pub fn set(&mut self, kind: ArtifactKind, path: String) {
        let slot = match kind {
            ArtifactKind::MatchedVariants => &mut self.matched_variants,
            ArtifactKind::DiseaseCandidates => &mut self.disease_candidates,
            ArtifactKind::RankedDiseases => &mut self.ranked_diseases,
            ArtifactKind::EnrichedAssociations => &mut self.enriched_associations,
            ArtifactKind::Recommendations => &mut self.recommendations,
        };
        *slot = Some(path);
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&str> {
        match kind {
            ArtifactKind::MatchedVariants => self.matched_variants.as_deref(),
            ArtifactKind::DiseaseCandidates => self.disease_candidates.as_deref(),
            ArtifactKind::RankedDiseases => self.ranked_diseases.as_deref(),
            ArtifactKind::EnrichedAssociations => self.enriched_associations.as_deref(),
            ArtifactKind::Recommendations => self.recommendations.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub job_id: Uuid,
    pub owner_id: String,
    pub genome_path: String,
    pub status: JobStatus,
    pub current_step: JobStep,
    pub progress_percent: u8,
    pub error_message: Option<String>,
    pub artifacts: StageArtifacts,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    pub fn new(owner_id: impl Into<String>, genome_path: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), owner_id, genome_path)
    }

    /// New job under an id chosen by the submitter
    pub fn with_id(
        job_id: Uuid,
        owner_id: impl Into<String>,
        genome_path: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            owner_id: owner_id.into(),
            genome_path: genome_path.into(),
            status: JobStatus::Processing,
            current_step: JobStep::Created,
            progress_percent: 0,
            error_message: None,
            artifacts: StageArtifacts::default(),
            created_at: now,
            started_at: Some(now),
            completed_at: None,
        }
    }

    /// Raise progress; never lowers it
    pub fn advance_progress(&mut self, percent: u8) {
        self.progress_percent = self.progress_percent.max(percent.min(100));
    }

    pub fn stage_started(&mut self, stage: PipelineStage) {
        self.current_step = JobStep::Stage(stage);
        self.advance_progress(milestones(stage).0);
    }

    pub fn stage_completed(&mut self, stage: PipelineStage, artifact: String) {
        self.artifacts.set(stage.artifact(), artifact);
        self.advance_progress(milestones(stage).1);
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.current_step = JobStep::Completed;
        self.progress_percent = 100;
        self.error_message = None;
        self.completed_at = Some(Utc::now());
    }

    /// Mark failed; progress and current step keep their last values
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(message.into());
        self.completed_at = Some(Utc::now());
    }

    /// Reopen a terminal job for a run starting at `stage`
    ///
    /// Progress restarts from the stage's opening milestone; artifacts of
    /// earlier stages are kept.
    pub fn reopen(&mut self, stage: PipelineStage) {
        self.status = JobStatus::Processing;
        self.current_step = JobStep::Stage(stage);
        self.progress_percent = milestones(stage).0;
        self.error_message = None;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
    }
}
