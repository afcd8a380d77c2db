// ==============================================================================
// ranker.rs - Disease Ranker
// ==============================================================================
// Description: Threshold filter and top-N selection over risk estimates
// Author: Matt Barham
// Created: 2026-09-21
// Modified: 2026-09-30
// Version: 1.0.1
// ==============================================================================

use std::cmp::Ordering;
use tracing::info;

use crate::config::RankerConfig;
use crate::models::{DiseaseCandidate, RankedDisease};

pub struct DiseaseRanker<'a> {
    config: &'a RankerConfig,
}

impl<'a> DiseaseRanker<'a> {
    pub fn new(config: &'a RankerConfig) -> Self {
        Self { config }
    }

    /// Keep candidates at or above the threshold, highest probability first
    ///
    /// Ties are broken by disease id so the ranking is stable across runs.
    /// Non-finite probabilities never pass the threshold.
    pub fn rank(&self, candidates: &[DiseaseCandidate]) -> Vec<RankedDisease> {
        let mut passing: Vec<&DiseaseCandidate> = candidates
            .iter()
            .filter(|c| {
                c.absolute_probability.is_finite()
                    && c.absolute_probability >= self.config.threshold
            })
            .collect();

        passing.sort_by(|a, b| compare_candidates(a, b));

        let ranked: Vec<RankedDisease> = passing
            .into_iter()
            .take(self.config.top_n)
            .enumerate()
            .map(|(i, candidate)| RankedDisease {
                rank: i + 1,
                candidate: candidate.clone(),
            })
            .collect();

        info!(
            "Ranked {} of {} candidates (threshold {}, top {})",
            ranked.len(),
            candidates.len(),
            self.config.threshold,
            self.config.top_n
        );

        ranked
    }
}

fn compare_candidates(a: &DiseaseCandidate, b: &DiseaseCandidate) -> Ordering {
    b.absolute_probability
        .total_cmp(&a.absolute_probability)
        .then_with(|| a.disease_id.cmp(&b.disease_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, Interpretation};

    fn candidate(disease: &str, probability: f64) -> DiseaseCandidate {
        DiseaseCandidate {
            disease_id: disease.to_string(),
            raw_score: 0.5,
            percentile: probability,
            absolute_probability: probability,
            n_variants: 3,
            n_genotyped: 3,
            n_simulated: 3,
            null_mean: 0.2,
            null_sd: 0.1,
            z_score: Some(3.0),
            prior_used: None,
            interpretation: Interpretation::LowPercentileRisk,
            confidence: Confidence::Medium,
            confidence_reasons: vec![],
            top_variants: vec![],
        }
    }

    #[test]
    fn test_threshold_and_order() {
        let config = RankerConfig {
            threshold: 0.1,
            top_n: 10,
        };
        let candidates = vec![
            candidate("asthma", 0.3),
            candidate("gout", 0.05),
            candidate("obesity", 0.9),
            candidate("anemia", 0.1),
        ];

        let ranked = DiseaseRanker::new(&config).rank(&candidates);
        let ids: Vec<&str> = ranked.iter().map(|r| r.disease_id()).collect();

        assert_eq!(ids, vec!["obesity", "asthma", "anemia"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[2].rank, 3);
    }

    #[test]
    fn test_ties_broken_by_disease_id() {
        let config = RankerConfig::default();
        let candidates = vec![candidate("b", 0.5), candidate("c", 0.5), candidate("a", 0.5)];

        let ranked = DiseaseRanker::new(&config).rank(&candidates);
        let ids: Vec<&str> = ranked.iter().map(|r| r.disease_id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_top_n_bounds_output() {
        let config = RankerConfig {
            threshold: 0.0,
            top_n: 2,
        };
        let candidates: Vec<DiseaseCandidate> = (0..6)
            .map(|i| candidate(&format!("d{}", i), 0.1 * i as f64))
            .collect();

        let ranked = DiseaseRanker::new(&config).rank(&candidates);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].disease_id(), "d5");
        assert_eq!(ranked[1].disease_id(), "d4");
        // Every ranked entry came from the input
        assert!(ranked.iter().all(|r| candidates.contains(&r.candidate)));
    }

    #[test]
    fn test_nothing_passes_threshold() {
        let config = RankerConfig {
            threshold: 0.95,
            top_n: 10,
        };
        let candidates = vec![candidate("gout", 0.2), candidate("obesity", f64::NAN)];

        assert!(DiseaseRanker::new(&config).rank(&candidates).is_empty());
        assert!(DiseaseRanker::new(&config).rank(&[]).is_empty());
    }
}
