// ==============================================================================
// enricher.rs - Association Enricher
// ==============================================================================
// Description: Looks up ingredient associations for each ranked disease under
//              a timeout/retry policy, degrading to a local fallback set
// Author: Matt Barham
// Created: 2026-09-23
// Modified: 2026-10-09
// Version: 1.1.0
// ==============================================================================
// Policy per disease:
//   attempt 1..=max_attempts, each bounded by request_timeout
//   fixed retry_delay between attempts, request_delay between diseases
//   all attempts failed → fallback associations (possibly none)
// A failed disease never stops the remaining lookups.
// ==============================================================================

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EnricherConfig;
use crate::knowledge::{ExternalServiceError, KnowledgeClient, KnowledgeEntry};
use crate::models::{
    AssociationSource, DiseaseEnrichment, Direction, EnrichmentOutcome, IngredientAssociation,
    RankedDisease,
};

/// Trimmed, lowercase ingredient key
pub fn normalize_ingredient(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Deserialize)]
struct FallbackEntry {
    ingredient: String,
    direction: String,
    confidence: f64,
}

/// Local associations used when the knowledge service cannot be reached
#[derive(Debug, Clone, Default)]
pub struct FallbackAssociations {
    by_disease: HashMap<String, Vec<(String, Direction, f64)>>,
}

impl FallbackAssociations {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read fallback file {:?}", path.as_ref()))?;
        let fallback = Self::from_json_str(&raw)?;
        info!("Loaded fallback associations for {} diseases", fallback.len());
        Ok(fallback)
    }

    /// Parse a JSON object of disease → [{ingredient, direction, confidence}]
    ///
    /// Entries with an unknown direction or out-of-range confidence are
    /// skipped with a warning.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let parsed: HashMap<String, Vec<FallbackEntry>> =
            serde_json::from_str(raw).context("Failed to parse fallback associations")?;

        let mut by_disease = HashMap::new();
        for (disease, entries) in parsed {
            let mut kept = Vec::with_capacity(entries.len());
            for entry in entries {
                let direction = match entry.direction.parse::<Direction>() {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("Skipping fallback entry for '{}': {}", disease, e);
                        continue;
                    }
                };
                if !entry.confidence.is_finite() || !(0.0..=1.0).contains(&entry.confidence) {
                    warn!(
                        "Skipping fallback entry for '{}': confidence {} outside [0, 1]",
                        disease, entry.confidence
                    );
                    continue;
                }
                kept.push((normalize_ingredient(&entry.ingredient), direction, entry.confidence));
            }
            by_disease.insert(disease.trim().to_lowercase(), kept);
        }

        Ok(Self { by_disease })
    }

    pub fn associations_for(&self, disease_id: &str) -> Vec<IngredientAssociation> {
        self.by_disease
            .get(&disease_id.trim().to_lowercase())
            .map(|entries| {
                entries
                    .iter()
                    .map(|(ingredient, direction, confidence)| IngredientAssociation {
                        disease_id: disease_id.to_string(),
                        ingredient_name: ingredient.clone(),
                        direction: *direction,
                        source_confidence: *confidence,
                        evidence_id: None,
                        source: AssociationSource::Fallback,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_disease.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_disease.is_empty()
    }
}

pub struct AssociationEnricher {
    client: Arc<dyn KnowledgeClient>,
    fallback: Arc<FallbackAssociations>,
    config: EnricherConfig,
}

impl AssociationEnricher {
    pub fn new(
        client: Arc<dyn KnowledgeClient>,
        fallback: Arc<FallbackAssociations>,
        config: EnricherConfig,
    ) -> Self {
        Self {
            client,
            fallback,
            config,
        }
    }

    /// Enrich every ranked disease, in rank order
    pub async fn enrich(&self, ranked: &[RankedDisease]) -> Vec<DiseaseEnrichment> {
        let mut enrichments = Vec::with_capacity(ranked.len());

        for (i, disease) in ranked.iter().enumerate() {
            if i > 0 && !self.config.request_delay().is_zero() {
                tokio::time::sleep(self.config.request_delay()).await;
            }
            enrichments.push(self.enrich_disease(disease.disease_id()).await);
        }

        let degraded = enrichments
            .iter()
            .filter(|e| matches!(e.outcome, EnrichmentOutcome::Fallback { .. }))
            .count();
        let total: usize = enrichments.iter().map(|e| e.associations.len()).sum();
        info!(
            "Enriched {} diseases: {} associations, {} on fallback",
            enrichments.len(),
            total,
            degraded
        );

        enrichments
    }

    async fn enrich_disease(&self, disease_id: &str) -> DiseaseEnrichment {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = ExternalServiceError::Transport("no attempt made".to_string());

        for attempt in 1..=max_attempts {
            match self.lookup_once(disease_id).await {
                Ok(Some(entries)) => {
                    debug!("'{}': {} associations on attempt {}", disease_id, entries.len(), attempt);
                    return DiseaseEnrichment {
                        disease_id: disease_id.to_string(),
                        outcome: EnrichmentOutcome::Fetched,
                        associations: to_associations(disease_id, entries),
                    };
                }
                Ok(None) => {
                    debug!("'{}' unknown to the knowledge service", disease_id);
                    return DiseaseEnrichment {
                        disease_id: disease_id.to_string(),
                        outcome: EnrichmentOutcome::NotFound,
                        associations: Vec::new(),
                    };
                }
                Err(e) => {
                    warn!(
                        "ExternalServiceError for '{}' (attempt {}/{}): {}",
                        disease_id, attempt, max_attempts, e
                    );
                    last_error = e;
                }
            }

            if attempt < max_attempts && !self.config.retry_delay().is_zero() {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }

        let associations = self.fallback.associations_for(disease_id);
        warn!(
            "Using {} fallback associations for '{}' after {} attempts",
            associations.len(),
            disease_id,
            max_attempts
        );

        DiseaseEnrichment {
            disease_id: disease_id.to_string(),
            outcome: EnrichmentOutcome::Fallback {
                error: last_error.to_string(),
                attempts: max_attempts,
            },
            associations,
        }
    }

    async fn lookup_once(
        &self,
        disease_id: &str,
    ) -> Result<Option<Vec<KnowledgeEntry>>, ExternalServiceError> {
        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, self.client.lookup(disease_id)).await {
            Ok(result) => result,
            Err(_) => Err(ExternalServiceError::Timeout(timeout.as_millis() as u64)),
        }
    }
}

fn to_associations(disease_id: &str, entries: Vec<KnowledgeEntry>) -> Vec<IngredientAssociation> {
    entries
        .into_iter()
        .map(|entry| IngredientAssociation {
            disease_id: disease_id.to_string(),
            ingredient_name: normalize_ingredient(&entry.ingredient),
            direction: entry.direction,
            source_confidence: entry.confidence,
            evidence_id: entry.evidence_id,
            source: AssociationSource::Service,
        })
        .collect()
}
