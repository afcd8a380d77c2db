// ==============================================================================
// error.rs - Pipeline Error Classes
// ==============================================================================
// Description: Errors that escalate out of a pipeline stage and fail the job
// Author: Matt Barham
// Created: 2026-09-15
// Modified: 2026-10-02
// Version: 1.1.0
// ==============================================================================
// Only InputFormat and Persistence escalate from the stages themselves.
// Sparse data, computation and knowledge-service problems are absorbed
// inside the stage that hits them. Internal covers panics and join failures
// caught by the job runner.
// ==============================================================================

use thiserror::Error;

use crate::output::ArtifactError;
use crate::parsers::GenomeParseError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("InputFormatError: {0}")]
    InputFormat(String),

    #[error("PersistenceError: {0}")]
    Persistence(String),

    #[error("InternalError: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Short class name recorded alongside the message
    pub fn class(&self) -> &'static str {
        match self {
            PipelineError::InputFormat(_) => "InputFormatError",
            PipelineError::Persistence(_) => "PersistenceError",
            PipelineError::Internal(_) => "InternalError",
        }
    }
}

impl From<GenomeParseError> for PipelineError {
    fn from(e: GenomeParseError) -> Self {
        match e {
            GenomeParseError::IoError(io) => {
                PipelineError::Persistence(format!("failed to read genotype file: {}", io))
            }
            other => PipelineError::InputFormat(other.to_string()),
        }
    }
}

impl From<ArtifactError> for PipelineError {
    fn from(e: ArtifactError) -> Self {
        PipelineError::Persistence(e.to_string())
    }
}
