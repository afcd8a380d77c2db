// ==============================================================================
// config.rs - Pipeline Configuration
// ==============================================================================
// Description: Tunables for the five analysis stages and recipe suggestions
// Author: Matt Barham
// Created: 2026-09-18
// Modified: 2026-10-16
// Version: 1.3.0
// ==============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::parsers::EffectScale;

/// How a disease base-rate prior turns a percentile into a probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorScaling {
    /// percentile × prior
    #[default]
    Linear,
    /// Logistic posterior: prior odds × exp(raw score)
    Odds,
}

/// Per-disease weight applied when summing association confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiseaseWeighting {
    #[default]
    Uniform,
    /// Weight each disease by its ranked absolute probability
    AbsoluteProbability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Fewer parsed genotype calls than this fails the job
    pub min_viable_calls: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { min_viable_calls: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub simulation_count: usize,
    pub seed: u64,
    /// Diseases with fewer matched variants are excluded
    pub min_variants_per_disease: usize,
    pub prior_scaling: PriorScaling,
    /// Number of strongest variants kept on each candidate
    pub top_variants: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            simulation_count: 2000,
            seed: 42,
            min_variants_per_disease: 1,
            prior_scaling: PriorScaling::Linear,
            top_variants: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankerConfig {
    /// Minimum absolute probability to be selected
    pub threshold: f64,
    pub top_n: usize,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            threshold: 0.05,
            top_n: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnricherConfig {
    pub request_timeout_ms: u64,
    /// Total attempts per disease, first try included
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Pause between successive distinct lookups; unset means the retry delay
    pub request_delay_ms: Option<u64>,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            max_attempts: 3,
            retry_delay_ms: 1_000,
            request_delay_ms: None,
        }
    }
}

impl EnricherConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms.unwrap_or(self.retry_delay_ms))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub weighting: DiseaseWeighting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeConfig {
    /// Below this share of matching recipes the whole catalog is listed
    pub min_match_share: f64,
}

impl Default for RecipeConfig {
    fn default() -> Self {
        Self {
            min_match_share: 0.1,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub effect_scale: EffectScale,
    pub matcher: MatcherConfig,
    pub estimator: EstimatorConfig,
    pub ranker: RankerConfig,
    pub enricher: EnricherConfig,
    pub aggregator: AggregatorConfig,
    pub recipes: RecipeConfig,
}

impl PipelineConfig {
    /// Load configuration from a JSON file; omitted fields keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read pipeline config {:?}", path.as_ref()))?;
        let config: PipelineConfig =
            serde_json::from_str(&raw).context("Failed to parse pipeline config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.estimator.simulation_count == 0 {
            anyhow::bail!("estimator.simulation_count must be at least 1");
        }
        if self.estimator.min_variants_per_disease == 0 {
            anyhow::bail!("estimator.min_variants_per_disease must be at least 1");
        }
        if !self.ranker.threshold.is_finite() || !(0.0..=1.0).contains(&self.ranker.threshold) {
            anyhow::bail!(
                "ranker.threshold must be within [0, 1], got {}",
                self.ranker.threshold
            );
        }
        if self.enricher.max_attempts == 0 {
            anyhow::bail!("enricher.max_attempts must be at least 1");
        }
        if self.enricher.request_timeout_ms == 0 {
            anyhow::bail!("enricher.request_timeout_ms must be positive");
        }
        if !(0.0..=1.0).contains(&self.recipes.min_match_share) {
            anyhow::bail!(
                "recipes.min_match_share must be within [0, 1], got {}",
                self.recipes.min_match_share
            );
        }
        Ok(())
    }
}
