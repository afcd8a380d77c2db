// ==============================================================================
// aggregator.rs - Recommendation Aggregator
// ==============================================================================
// Description: Merges per-disease ingredient associations into one
//              conflict-resolved prefer/avoid recommendation set
// Author: Matt Barham
// Created: 2026-09-24
// Modified: 2026-10-04
// Version: 1.0.2
// ==============================================================================
// Conflict rule: the direction with the larger weighted confidence sum wins;
// an exact tie between two sides with evidence resolves to avoid.
// ==============================================================================

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::info;

use crate::config::{AggregatorConfig, DiseaseWeighting};
use crate::models::{
    DiseaseEnrichment, Direction, IngredientAssociation, IngredientRecommendation, RankedDisease,
    RecommendationSet,
};

#[derive(Default)]
struct Tally {
    prefer_score: f64,
    avoid_score: f64,
    prefer_diseases: BTreeSet<String>,
    avoid_diseases: BTreeSet<String>,
}

pub struct RecommendationAggregator<'a> {
    config: &'a AggregatorConfig,
}

impl<'a> RecommendationAggregator<'a> {
    pub fn new(config: &'a AggregatorConfig) -> Self {
        Self { config }
    }

    /// Consolidate enrichment output into recommendations
    ///
    /// `ranked` supplies per-disease weights when weighting by absolute
    /// probability. Output is independent of input order.
    pub fn aggregate(
        &self,
        enrichments: &[DiseaseEnrichment],
        ranked: &[RankedDisease],
    ) -> RecommendationSet {
        let weights = self.disease_weights(ranked);

        let mut associations: Vec<&IngredientAssociation> = enrichments
            .iter()
            .flat_map(|e| e.associations.iter())
            .collect();
        // Fixed summation order keeps float sums bit-identical across runs
        associations.sort_by(|a, b| canonical_order(a, b));

        let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
        for association in associations {
            let weight = weights
                .get(association.disease_id.as_str())
                .copied()
                .unwrap_or(1.0);
            let contribution = association.source_confidence * weight;

            let tally = tallies
                .entry(association.ingredient_name.trim().to_lowercase())
                .or_default();
            match association.direction {
                Direction::Prefer => {
                    tally.prefer_score += contribution;
                    tally.prefer_diseases.insert(association.disease_id.clone());
                }
                Direction::Avoid => {
                    tally.avoid_score += contribution;
                    tally.avoid_diseases.insert(association.disease_id.clone());
                }
            }
        }

        let mut set = RecommendationSet::default();
        for (ingredient_name, tally) in tallies {
            let recommendation = resolve(ingredient_name, tally);
            match recommendation.direction {
                Direction::Prefer => set.prefer.push(recommendation),
                Direction::Avoid => set.avoid.push(recommendation),
            }
        }

        set.prefer.sort_by(compare_recommendations);
        set.avoid.sort_by(compare_recommendations);

        info!(
            "Aggregated {} recommendations ({} prefer, {} avoid)",
            set.len(),
            set.prefer.len(),
            set.avoid.len()
        );

        set
    }

    fn disease_weights<'r>(&self, ranked: &'r [RankedDisease]) -> HashMap<&'r str, f64> {
        match self.config.weighting {
            DiseaseWeighting::Uniform => HashMap::new(),
            DiseaseWeighting::AbsoluteProbability => ranked
                .iter()
                .filter(|r| r.candidate.absolute_probability.is_finite())
                .map(|r| (r.disease_id(), r.candidate.absolute_probability))
                .collect(),
        }
    }
}

fn resolve(ingredient_name: String, tally: Tally) -> IngredientRecommendation {
    let direction = if tally.avoid_diseases.is_empty() {
        Direction::Prefer
    } else if tally.prefer_diseases.is_empty() {
        Direction::Avoid
    } else if tally.prefer_score > tally.avoid_score {
        Direction::Prefer
    } else {
        Direction::Avoid
    };

    let (score, supporting, opposing_score, opposing) = match direction {
        Direction::Prefer => (
            tally.prefer_score,
            tally.prefer_diseases,
            tally.avoid_score,
            tally.avoid_diseases,
        ),
        Direction::Avoid => (
            tally.avoid_score,
            tally.avoid_diseases,
            tally.prefer_score,
            tally.prefer_diseases,
        ),
    };

    IngredientRecommendation {
        ingredient_name,
        direction,
        aggregate_score: score,
        supporting_disease_count: supporting.len(),
        supporting_diseases: supporting.into_iter().collect(),
        opposing_score,
        opposing_disease_count: opposing.len(),
    }
}

fn canonical_order(a: &IngredientAssociation, b: &IngredientAssociation) -> Ordering {
    a.ingredient_name
        .cmp(&b.ingredient_name)
        .then_with(|| a.direction.cmp(&b.direction))
        .then_with(|| a.disease_id.cmp(&b.disease_id))
        .then_with(|| a.source_confidence.total_cmp(&b.source_confidence))
}

fn compare_recommendations(a: &IngredientRecommendation, b: &IngredientRecommendation) -> Ordering {
    b.aggregate_score
        .total_cmp(&a.aggregate_score)
        .then_with(|| a.ingredient_name.cmp(&b.ingredient_name))
}
