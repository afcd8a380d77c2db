// ==============================================================================
// lib.rs - Nutrigen Processor Library
// ==============================================================================
// Description: Genotype-to-recommendation analysis stages shared by the CLI
//              and the job worker
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2026-10-16
// Version: 2.1.0
// ==============================================================================

pub mod parsers;
pub mod genotype_converter;
pub mod models;
pub mod config;
pub mod error;
pub mod reference;
pub mod matcher;
pub mod estimator;
pub mod ranker;
pub mod knowledge;
pub mod enricher;
pub mod aggregator;
pub mod recipes;
pub mod output;
pub mod processor;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use processor::{AnalysisPipeline, PipelineStage, PipelineSummary, StageObserver};
