// ==============================================================================
// estimator.rs - Risk Estimator
// ==============================================================================
// Description: Polygenic risk scores per disease with Monte Carlo percentiles
// Author: Matt Barham
// Created: 2026-09-20
// Modified: 2026-10-08
// Version: 1.3.0
// ==============================================================================
// Algorithm:
//   raw score   = Σ effect_size × dosage over the disease's matched variants
//   null        = N simulated scores, dosages drawn under Hardy–Weinberg
//                 {(1-p)², 2p(1-p), p²} from each variant's frequency p
//   percentile  = share of the null strictly below the raw score
//   probability = percentile scaled by the disease prior when one exists
// Each disease draws from its own StdRng seeded by SHA-256(seed, disease), so
// a disease's percentile does not depend on the other diseases in the file.
// ==============================================================================

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{EstimatorConfig, PriorScaling};
use crate::models::{Confidence, DiseaseCandidate, Interpretation, MatchedVariant, VariantSummary};
use crate::reference::DiseasePriors;

const ABS_PROB_HIGH: f64 = 0.20;
const ABS_PROB_MODERATE: f64 = 0.05;
const PERCENTILE_HIGH: f64 = 0.90;
const PERCENTILE_MODERATE: f64 = 0.75;
const FEW_VARIANTS: usize = 5;

/// Degenerate statistics that exclude a disease from the candidates
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputationError {
    #[error("no matched variant has a usable population frequency")]
    NoSimulableVariants,

    #[error("simulated null distribution is empty")]
    EmptyDistribution,

    #[error("raw score is not finite")]
    NonFiniteScore,

    #[error("absolute probability is not finite")]
    NonFiniteProbability,
}

/// Why a disease was left out of the candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    SparseData { found: usize, required: usize },
    Computation { detail: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedDisease {
    pub disease_id: String,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

/// Estimator output: candidates sorted by disease id plus the exclusions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimationOutput {
    pub candidates: Vec<DiseaseCandidate>,
    pub excluded: Vec<ExcludedDisease>,
}

/// Variant as seen by the simulation: effect and risk allele frequency
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationVariant {
    pub effect_size: f64,
    pub frequency: f64,
}

/// Draw `count` scores under Hardy–Weinberg dosages
///
/// # Arguments
/// * `variants` - Effect sizes and frequencies (0 < p < 1)
/// * `count` - Number of simulated individuals
/// * `rng` - Random source; pass a seeded generator for reproducible output
pub fn simulate_null_distribution<R: Rng + ?Sized>(
    variants: &[SimulationVariant],
    count: usize,
    rng: &mut R,
) -> Result<Vec<f64>, ComputationError> {
    if variants.is_empty() {
        return Err(ComputationError::NoSimulableVariants);
    }
    if count == 0 {
        return Err(ComputationError::EmptyDistribution);
    }

    let mut scores = vec![0.0f64; count];

    for variant in variants {
        let p = variant.frequency;
        let p_hom_ref = (1.0 - p) * (1.0 - p);
        let p_het = 2.0 * p * (1.0 - p);

        for score in scores.iter_mut() {
            let u: f64 = rng.gen();
            let dosage = if u < p_hom_ref {
                0.0
            } else if u < p_hom_ref + p_het {
                1.0
            } else {
                2.0
            };
            *score += dosage * variant.effect_size;
        }
    }

    Ok(scores)
}

/// Share of `sorted_null` strictly below `score`
///
/// `sorted_null` must be sorted ascending. Non-decreasing in `score`.
pub fn percentile_in(sorted_null: &[f64], score: f64) -> f64 {
    if sorted_null.is_empty() {
        return 0.0;
    }
    let below = sorted_null.partition_point(|&x| x < score);
    below as f64 / sorted_null.len() as f64
}

/// Seed for one disease's generator, derived from the run seed
pub fn disease_seed(seed: u64, disease_id: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(disease_id.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

pub struct RiskEstimator<'a> {
    config: &'a EstimatorConfig,
    priors: &'a DiseasePriors,
}

impl<'a> RiskEstimator<'a> {
    pub fn new(config: &'a EstimatorConfig, priors: &'a DiseasePriors) -> Self {
        Self { config, priors }
    }

    /// Score every disease represented among the matched variants
    pub fn estimate(&self, variants: &[MatchedVariant]) -> EstimationOutput {
        let mut by_disease: BTreeMap<&str, Vec<&MatchedVariant>> = BTreeMap::new();
        for variant in variants {
            by_disease
                .entry(variant.trait_name.as_str())
                .or_default()
                .push(variant);
        }

        let mut output = EstimationOutput::default();

        for (disease, disease_variants) in by_disease {
            if disease_variants.len() < self.config.min_variants_per_disease {
                warn!(
                    "SparseDataWarning: '{}' has {} matched variants, {} required; excluded",
                    disease,
                    disease_variants.len(),
                    self.config.min_variants_per_disease
                );
                output.excluded.push(ExcludedDisease {
                    disease_id: disease.to_string(),
                    reason: ExclusionReason::SparseData {
                        found: disease_variants.len(),
                        required: self.config.min_variants_per_disease,
                    },
                });
                continue;
            }

            match self.estimate_disease(disease, &disease_variants) {
                Ok(candidate) => output.candidates.push(candidate),
                Err(e) => {
                    warn!("ComputationError for '{}': {}; excluded", disease, e);
                    output.excluded.push(ExcludedDisease {
                        disease_id: disease.to_string(),
                        reason: ExclusionReason::Computation {
                            detail: e.to_string(),
                        },
                    });
                }
            }
        }

        info!(
            "Estimated risk for {} diseases ({} excluded)",
            output.candidates.len(),
            output.excluded.len()
        );

        output
    }

    fn estimate_disease(
        &self,
        disease: &str,
        variants: &[&MatchedVariant],
    ) -> Result<DiseaseCandidate, ComputationError> {
        let raw_score: f64 = variants
            .iter()
            .map(|v| v.effect_size * f64::from(v.dosage.unwrap_or(0)))
            .sum();
        if !raw_score.is_finite() {
            return Err(ComputationError::NonFiniteScore);
        }

        let simulation_variants: Vec<SimulationVariant> = variants
            .iter()
            .filter_map(|v| {
                v.population_frequency
                    .filter(|p| *p > 0.0 && *p < 1.0)
                    .map(|frequency| SimulationVariant {
                        effect_size: v.effect_size,
                        frequency,
                    })
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(disease_seed(self.config.seed, disease));
        let mut null = simulate_null_distribution(
            &simulation_variants,
            self.config.simulation_count,
            &mut rng,
        )?;
        null.sort_by(|a, b| a.total_cmp(b));

        let percentile = percentile_in(&null, raw_score);
        let (null_mean, null_sd) = mean_and_sd(&null);
        let z_score = (null_sd > 0.0).then(|| (raw_score - null_mean) / null_sd);

        let prior_used = self.priors.get(disease);
        let absolute_probability = match prior_used {
            Some(prior) => scale_by_prior(percentile, raw_score, prior, self.config.prior_scaling),
            None => percentile,
        };
        if !absolute_probability.is_finite() {
            return Err(ComputationError::NonFiniteProbability);
        }

        let n_variants = variants.len();
        let n_simulated = simulation_variants.len();
        let (confidence, confidence_reasons) =
            assess_confidence(n_variants, n_simulated, prior_used.is_some());

        debug!(
            "'{}': raw={:.4}, percentile={:.3}, probability={:.4}, n={}, simulated={}",
            disease, raw_score, percentile, absolute_probability, n_variants, n_simulated
        );

        Ok(DiseaseCandidate {
            disease_id: disease.to_string(),
            raw_score,
            percentile,
            absolute_probability,
            n_variants,
            n_genotyped: variants.iter().filter(|v| v.dosage.is_some()).count(),
            n_simulated,
            null_mean,
            null_sd,
            z_score,
            prior_used,
            interpretation: interpret(percentile, absolute_probability, prior_used.is_some()),
            confidence,
            confidence_reasons,
            top_variants: top_variants(variants, self.config.top_variants),
        })
    }
}

fn scale_by_prior(percentile: f64, raw_score: f64, prior: f64, scaling: PriorScaling) -> f64 {
    match scaling {
        PriorScaling::Linear => percentile * prior,
        PriorScaling::Odds => {
            let posterior_odds = prior / (1.0 - prior) * raw_score.exp();
            if posterior_odds.is_infinite() {
                1.0
            } else {
                posterior_odds / (1.0 + posterior_odds)
            }
        }
    }
}

/// Mean and sample standard deviation (0 for fewer than two values)
fn mean_and_sd(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

fn interpret(percentile: f64, absolute_probability: f64, has_prior: bool) -> Interpretation {
    if has_prior {
        if absolute_probability >= ABS_PROB_HIGH {
            Interpretation::HighAbsoluteRisk
        } else if absolute_probability >= ABS_PROB_MODERATE {
            Interpretation::ModerateAbsoluteRisk
        } else {
            Interpretation::LowAbsoluteRisk
        }
    } else if percentile >= PERCENTILE_HIGH {
        Interpretation::HighPercentileRisk
    } else if percentile >= PERCENTILE_MODERATE {
        Interpretation::ModeratePercentileRisk
    } else {
        Interpretation::LowPercentileRisk
    }
}

fn assess_confidence(n_variants: usize, n_simulated: usize, has_prior: bool) -> (Confidence, Vec<String>) {
    let mut confidence = Confidence::High;
    let mut reasons = Vec::new();

    if n_variants < FEW_VARIANTS {
        reasons.push("few_variants".to_string());
        confidence = Confidence::Low;
    }
    if n_simulated < 3.max(n_variants / 2) {
        reasons.push("few_simulated_variants".to_string());
        confidence = confidence.min(Confidence::Medium);
    }
    if !has_prior {
        reasons.push("no_prior".to_string());
        confidence = confidence.min(Confidence::Medium);
    }

    (confidence, reasons)
}

fn top_variants(variants: &[&MatchedVariant], limit: usize) -> Vec<VariantSummary> {
    let mut sorted: Vec<&&MatchedVariant> = variants.iter().collect();
    sorted.sort_by(|a, b| {
        b.effect_size
            .abs()
            .total_cmp(&a.effect_size.abs())
            .then_with(|| a.variant_id.cmp(&b.variant_id))
    });

    sorted
        .into_iter()
        .take(limit)
        .map(|v| VariantSummary {
            variant_id: v.variant_id.clone(),
            genotype: v.genotype.clone(),
            risk_allele: v.risk_allele.clone(),
            effect_size: v.effect_size,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn variant(id: &str, disease: &str, effect: f64, dosage: Option<u8>, freq: Option<f64>) -> MatchedVariant {
        MatchedVariant {
            variant_id: id.to_string(),
            chromosome: "1".to_string(),
            position: 100,
            genotype: "AG".to_string(),
            trait_name: disease.to_string(),
            risk_allele: "A".to_string(),
            dosage,
            effect_size: effect,
            population_frequency: freq,
        }
    }

    fn d1_variants() -> Vec<MatchedVariant> {
        vec![
            variant("rs1", "D1", 0.2, Some(2), Some(0.3)),
            variant("rs2", "D1", 0.3, Some(1), Some(0.4)),
            variant("rs3", "D1", 0.1, Some(0), Some(0.2)),
        ]
    }

    #[test]
    fn test_single_disease_raw_score() {
        let config = EstimatorConfig::default();
        let priors = DiseasePriors::default();
        let output = RiskEstimator::new(&config, &priors).estimate(&d1_variants());

        assert_eq!(output.candidates.len(), 1);
        assert!(output.excluded.is_empty());
        let d1 = &output.candidates[0];
        assert_eq!(d1.disease_id, "D1");
        assert!((d1.raw_score - 0.7).abs() < 1e-12);
        assert!((0.0..=1.0).contains(&d1.percentile));
        // No prior: probability is the percentile
        assert_eq!(d1.absolute_probability, d1.percentile);
        assert_eq!(d1.n_variants, 3);
        assert_eq!(d1.n_simulated, 3);
        assert_eq!(d1.top_variants[0].variant_id, "rs2");
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let config = EstimatorConfig::default();
        let priors = DiseasePriors::default();
        let estimator = RiskEstimator::new(&config, &priors);

        let first = estimator.estimate(&d1_variants());
        let second = estimator.estimate(&d1_variants());
        assert_eq!(first, second);
    }

    #[test]
    fn test_disease_result_independent_of_other_diseases() {
        let config = EstimatorConfig::default();
        let priors = DiseasePriors::default();
        let estimator = RiskEstimator::new(&config, &priors);

        let alone = estimator.estimate(&d1_variants());

        let mut with_other = vec![variant("rs9", "A0", 0.5, Some(1), Some(0.5))];
        with_other.extend(d1_variants());
        let together = estimator.estimate(&with_other);

        let d1 = together.candidates.iter().find(|c| c.disease_id == "D1").unwrap();
        assert_eq!(d1.percentile, alone.candidates[0].percentile);
    }

    #[test]
    fn test_percentile_monotone_in_score() {
        let variants = [
            SimulationVariant { effect_size: 0.2, frequency: 0.3 },
            SimulationVariant { effect_size: -0.1, frequency: 0.6 },
        ];
        let mut rng = StdRng::seed_from_u64(7);
        let mut null = simulate_null_distribution(&variants, 1000, &mut rng).unwrap();
        null.sort_by(|a, b| a.total_cmp(b));

        let mut previous = 0.0;
        for step in 0..=60 {
            let score = -0.3 + step as f64 * 0.01;
            let p = percentile_in(&null, score);
            assert!(p >= previous);
            previous = p;
        }
        assert_eq!(percentile_in(&null, -10.0), 0.0);
        assert_eq!(percentile_in(&null, 10.0), 1.0);
    }

    #[test]
    fn test_simulation_uses_injected_rng() {
        let variants = [SimulationVariant { effect_size: 1.0, frequency: 0.5 }];
        let a = simulate_null_distribution(&variants, 200, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = simulate_null_distribution(&variants, 200, &mut StdRng::seed_from_u64(1)).unwrap();
        let c = simulate_null_distribution(&variants, 200, &mut StdRng::seed_from_u64(2)).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|s| [0.0, 1.0, 2.0].contains(s)));
    }

    #[test]
    fn test_sparse_disease_excluded() {
        let config = EstimatorConfig {
            min_variants_per_disease: 2,
            ..EstimatorConfig::default()
        };
        let priors = DiseasePriors::default();
        let mut variants = d1_variants();
        variants.push(variant("rs7", "D2", 0.4, Some(1), Some(0.3)));

        let output = RiskEstimator::new(&config, &priors).estimate(&variants);

        assert_eq!(output.candidates.len(), 1);
        assert_eq!(output.excluded.len(), 1);
        assert_eq!(output.excluded[0].disease_id, "D2");
        assert_eq!(
            output.excluded[0].reason,
            ExclusionReason::SparseData { found: 1, required: 2 }
        );
    }

    #[test]
    fn test_disease_without_frequencies_excluded() {
        let config = EstimatorConfig::default();
        let priors = DiseasePriors::default();
        let variants = vec![variant("rs1", "D3", 0.2, Some(1), None)];

        let output = RiskEstimator::new(&config, &priors).estimate(&variants);

        assert!(output.candidates.is_empty());
        assert!(matches!(
            output.excluded[0].reason,
            ExclusionReason::Computation { .. }
        ));
    }

    #[test]
    fn test_prior_scaling() {
        let config = EstimatorConfig::default();
        let mut map = BTreeMap::new();
        map.insert("D1".to_string(), 0.1);
        let priors = DiseasePriors::from_map(map);

        let output = RiskEstimator::new(&config, &priors).estimate(&d1_variants());
        let d1 = &output.candidates[0];

        assert_eq!(d1.prior_used, Some(0.1));
        assert!((d1.absolute_probability - d1.percentile * 0.1).abs() < 1e-12);

        let odds_config = EstimatorConfig {
            prior_scaling: PriorScaling::Odds,
            ..EstimatorConfig::default()
        };
        let output = RiskEstimator::new(&odds_config, &priors).estimate(&d1_variants());
        let odds = 0.1 / 0.9 * 0.7f64.exp();
        assert!((output.candidates[0].absolute_probability - odds / (1.0 + odds)).abs() < 1e-12);
    }

    #[test]
    fn test_no_call_counts_as_zero_dosage() {
        let config = EstimatorConfig::default();
        let priors = DiseasePriors::default();
        let variants = vec![
            variant("rs1", "D4", 0.5, None, Some(0.5)),
            variant("rs2", "D4", 0.25, Some(2), Some(0.5)),
        ];
        let output = RiskEstimator::new(&config, &priors).estimate(&variants);
        let d4 = &output.candidates[0];

        assert!((d4.raw_score - 0.5).abs() < 1e-12);
        assert_eq!(d4.n_genotyped, 1);
    }

    #[test]
    fn test_confidence_reasons() {
        let (confidence, reasons) = assess_confidence(3, 3, false);
        assert_eq!(confidence, Confidence::Low);
        assert_eq!(reasons, vec!["few_variants".to_string(), "no_prior".to_string()]);

        let (confidence, reasons) = assess_confidence(10, 10, true);
        assert_eq!(confidence, Confidence::High);
        assert!(reasons.is_empty());
    }
}
