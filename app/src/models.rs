// ==============================================================================
// models.rs - Pipeline Data Models
// ==============================================================================
// Description: Data structures flowing between the five analysis stages
// Author: Matt Barham
// Created: 2026-09-14
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Single genotype call from an uploaded raw data file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenotypeCall {
    /// SNP identifier (e.g., "rs548049170")
    pub variant_id: String,
    /// Chromosome ("1"-"22", "X", "Y", "MT")
    pub chromosome: String,
    /// Base pair position
    pub position: u64,
    /// Two-letter genotype (e.g., "TT", "AG", "--" for no-call)
    pub genotype: String,
}

/// Static variant-to-trait association from the reference table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantAssociation {
    pub variant_id: String,
    pub trait_name: String,
    /// Single-letter risk allele (e.g., "A")
    pub risk_allele: String,
    /// Per-allele effect on the log-odds / beta scale
    pub effect_size: f64,
    /// Risk allele frequency in the reference population
    pub population_frequency: Option<f64>,
    pub nutrition_relevant: bool,
}

/// Genotype call joined with a nutrition-relevant reference association
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedVariant {
    pub variant_id: String,
    pub chromosome: String,
    pub position: u64,
    pub genotype: String,
    /// Disease or trait this variant contributes to
    pub trait_name: String,
    pub risk_allele: String,
    /// Copies of the risk allele (None for no-calls)
    pub dosage: Option<u8>,
    pub effect_size: f64,
    pub population_frequency: Option<f64>,
}

/// Matcher output with the counts needed for progress reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchOutput {
    pub calls_parsed: usize,
    pub rows_skipped: usize,
    pub variants: Vec<MatchedVariant>,
}

/// How well-founded a risk estimate is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Coarse reading of a candidate's risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpretation {
    HighAbsoluteRisk,
    ModerateAbsoluteRisk,
    LowAbsoluteRisk,
    HighPercentileRisk,
    ModeratePercentileRisk,
    LowPercentileRisk,
}

/// Matched variant summary kept on a candidate for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSummary {
    pub variant_id: String,
    pub genotype: String,
    pub risk_allele: String,
    pub effect_size: f64,
}

/// Per-disease risk estimate produced by the Risk Estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseCandidate {
    pub disease_id: String,
    /// Polygenic risk score: sum of effect_size × dosage
    pub raw_score: f64,
    /// Share of the simulated null distribution strictly below raw_score (0.0-1.0)
    pub percentile: f64,
    pub absolute_probability: f64,
    pub n_variants: usize,
    pub n_genotyped: usize,
    pub n_simulated: usize,
    pub null_mean: f64,
    pub null_sd: f64,
    pub z_score: Option<f64>,
    pub prior_used: Option<f64>,
    pub interpretation: Interpretation,
    pub confidence: Confidence,
    pub confidence_reasons: Vec<String>,
    pub top_variants: Vec<VariantSummary>,
}

/// Candidate that survived the ranker's threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDisease {
    /// 1-based position in the ranking
    pub rank: usize,
    #[serde(flatten)]
    pub candidate: DiseaseCandidate,
}

impl RankedDisease {
    pub fn disease_id(&self) -> &str {
        &self.candidate.disease_id
    }
}

/// Dietary direction for an ingredient
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Prefer,
    Avoid,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Prefer => "prefer",
            Direction::Avoid => "avoid",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    /// Accepts both the prefer/avoid vocabulary and the positive/negative
    /// association vocabulary used by literature-mined sources
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "prefer" | "positive" => Ok(Direction::Prefer),
            "avoid" | "negative" => Ok(Direction::Avoid),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// Where an association came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociationSource {
    Service,
    Fallback,
}

/// Disease-to-ingredient association
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientAssociation {
    pub disease_id: String,
    /// Normalized (trimmed, lowercase) ingredient name
    pub ingredient_name: String,
    pub direction: Direction,
    pub source_confidence: f64,
    pub evidence_id: Option<String>,
    pub source: AssociationSource,
}

/// Result of enriching a single disease
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnrichmentOutcome {
    Fetched,
    NotFound,
    Fallback { error: String, attempts: u32 },
}

/// Enricher output for a single ranked disease
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseEnrichment {
    pub disease_id: String,
    pub outcome: EnrichmentOutcome,
    pub associations: Vec<IngredientAssociation>,
}

/// Final consolidated recommendation for one ingredient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientRecommendation {
    pub ingredient_name: String,
    pub direction: Direction,
    pub aggregate_score: f64,
    pub supporting_disease_count: usize,
    pub supporting_diseases: Vec<String>,
    /// Summed confidence for the losing direction
    pub opposing_score: f64,
    pub opposing_disease_count: usize,
}

/// Aggregator output split by direction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSet {
    pub prefer: Vec<IngredientRecommendation>,
    pub avoid: Vec<IngredientRecommendation>,
}

impl RecommendationSet {
    pub fn len(&self) -> usize {
        self.prefer.len() + self.avoid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefer.is_empty() && self.avoid.is_empty()
    }

    pub fn find(&self, ingredient: &str) -> Option<&IngredientRecommendation> {
        self.prefer
            .iter()
            .chain(self.avoid.iter())
            .find(|r| r.ingredient_name == ingredient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parsing() {
        assert_eq!("prefer".parse::<Direction>().unwrap(), Direction::Prefer);
        assert_eq!("Positive".parse::<Direction>().unwrap(), Direction::Prefer);
        assert_eq!(" avoid ".parse::<Direction>().unwrap(), Direction::Avoid);
        assert_eq!("negative".parse::<Direction>().unwrap(), Direction::Avoid);
        assert!("neutral".parse::<Direction>().is_err());
    }

    #[test]
    fn test_direction_serializes_lowercase() {
        let json = serde_json::to_string(&Direction::Avoid).unwrap();
        assert_eq!(json, "\"avoid\"");
        assert_eq!(Direction::Prefer.to_string(), "prefer");
    }

    #[test]
    fn test_enrichment_outcome_tagging() {
        let outcome = EnrichmentOutcome::Fallback {
            error: "timeout".to_string(),
            attempts: 3,
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "fallback");
        assert_eq!(value["attempts"], 3);
    }
}
