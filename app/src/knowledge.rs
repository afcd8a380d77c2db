// ==============================================================================
// knowledge.rs - Knowledge Service Client
// ==============================================================================
// Description: Disease-to-ingredient lookups against the external knowledge
//              service, behind a trait so tests can substitute the source
// Author: Matt Barham
// Created: 2026-09-23
// Modified: 2026-10-16
// Version: 1.2.0
// ==============================================================================
// Contract:
//   GET {base_url}/api/disease/{name}?limit={limit}&page=1
//   200 → {"associations": [{"ingredient", "direction", "confidence", "pmid"?}]}
//   200 → {"foodDiseases": [{"food-term", "association", "pmid"?}]} (legacy)
//   404 → disease unknown to the service (no associations)
// ==============================================================================

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::Direction;

/// Failure of one knowledge-service lookup
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExternalServiceError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// One validated association returned by the service
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeEntry {
    pub ingredient: String,
    pub direction: Direction,
    pub confidence: f64,
    pub evidence_id: Option<String>,
}

/// Source of disease-to-ingredient associations
#[async_trait]
pub trait KnowledgeClient: Send + Sync {
    /// Associations for a disease; `Ok(None)` when the disease is unknown
    async fn lookup(
        &self,
        disease_id: &str,
    ) -> Result<Option<Vec<KnowledgeEntry>>, ExternalServiceError>;
}

/// Confidence given to each evidence row of a legacy response
pub const LEGACY_EVIDENCE_CONFIDENCE: f64 = 1.0;

#[derive(Debug, Deserialize)]
struct DiseaseResponse {
    associations: Option<Vec<RawEntry>>,
    #[serde(rename = "foodDiseases")]
    food_diseases: Option<Vec<LegacyEntry>>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    ingredient: Option<String>,
    direction: Option<String>,
    confidence: Option<f64>,
    #[serde(default)]
    pmid: Option<Value>,
}

/// Evidence row of the older text-mining service: no confidence, and only
/// `positive`/`negative` tags carry a direction
#[derive(Debug, Deserialize)]
struct LegacyEntry {
    #[serde(rename = "food-term", alias = "food_term")]
    food_term: Option<String>,
    association: Option<Value>,
    #[serde(default)]
    pmid: Option<Value>,
}

/// Validate a response body into knowledge entries
///
/// An `associations` body must follow the contract exactly: neutral entries
/// are dropped and anything else that does not fit rejects the whole body.
/// A legacy `foodDiseases` body is read leniently: each positive/negative row
/// counts as one piece of evidence with confidence
/// [`LEGACY_EVIDENCE_CONFIDENCE`], other rows are neutral.
pub fn parse_response(body: &[u8]) -> Result<Vec<KnowledgeEntry>, ExternalServiceError> {
    let response: DiseaseResponse = serde_json::from_slice(body)
        .map_err(|e| ExternalServiceError::Malformed(e.to_string()))?;

    match (response.associations, response.food_diseases) {
        (Some(raw), _) => parse_entries(raw),
        (None, Some(legacy)) => Ok(parse_legacy_entries(legacy)),
        (None, None) => Err(ExternalServiceError::Malformed(
            "body has no associations".to_string(),
        )),
    }
}

fn parse_entries(raw_entries: Vec<RawEntry>) -> Result<Vec<KnowledgeEntry>, ExternalServiceError> {
    let mut entries = Vec::with_capacity(raw_entries.len());

    for (i, raw) in raw_entries.into_iter().enumerate() {
        let ingredient = raw
            .ingredient
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ExternalServiceError::Malformed(format!("entry {} has no ingredient", i)))?;

        let direction_raw = raw
            .direction
            .ok_or_else(|| ExternalServiceError::Malformed(format!("entry {} has no direction", i)))?;
        if direction_raw.trim().eq_ignore_ascii_case("neutral") {
            debug!("Skipping neutral association for '{}'", ingredient);
            continue;
        }
        let direction: Direction = direction_raw
            .parse()
            .map_err(|e| ExternalServiceError::Malformed(format!("entry {}: {}", i, e)))?;

        let confidence = raw
            .confidence
            .ok_or_else(|| ExternalServiceError::Malformed(format!("entry {} has no confidence", i)))?;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(ExternalServiceError::Malformed(format!(
                "entry {} confidence {} outside [0, 1]",
                i, confidence
            )));
        }

        entries.push(KnowledgeEntry {
            ingredient,
            direction,
            confidence,
            evidence_id: evidence_id(raw.pmid),
        });
    }

    Ok(entries)
}

fn parse_legacy_entries(raw_entries: Vec<LegacyEntry>) -> Vec<KnowledgeEntry> {
    raw_entries
        .into_iter()
        .filter_map(|raw| {
            let ingredient = raw.food_term.map(|s| s.trim().to_string())?;
            if ingredient.is_empty() {
                return None;
            }

            let direction = match raw.association {
                Some(Value::String(tag)) => match tag.trim().to_lowercase().as_str() {
                    "positive" => Direction::Prefer,
                    "negative" => Direction::Avoid,
                    _ => return None,
                },
                _ => return None,
            };

            Some(KnowledgeEntry {
                ingredient,
                direction,
                confidence: LEGACY_EVIDENCE_CONFIDENCE,
                evidence_id: evidence_id(raw.pmid),
            })
        })
        .collect()
}

fn evidence_id(pmid: Option<Value>) -> Option<String> {
    match pmid {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// reqwest-backed knowledge client, shared across jobs
pub struct HttpKnowledgeClient {
    client: Client,
    base_url: Url,
    limit: usize,
    timeout: Duration,
}

impl HttpKnowledgeClient {
    pub const DEFAULT_LIMIT: usize = 100;

    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid knowledge service URL '{}': {}", base_url, e))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Knowledge service URL '{}' cannot be a base", base_url);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url,
            limit: Self::DEFAULT_LIMIT,
            timeout,
        })
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn disease_url(&self, disease_id: &str) -> Result<Url, ExternalServiceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ExternalServiceError::Transport("base URL cannot hold a path".to_string()))?
            .pop_if_empty()
            .extend(["api", "disease", disease_id]);
        Ok(url)
    }

    fn classify(&self, error: reqwest::Error) -> ExternalServiceError {
        if error.is_timeout() {
            ExternalServiceError::Timeout(self.timeout.as_millis() as u64)
        } else {
            ExternalServiceError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl KnowledgeClient for HttpKnowledgeClient {
    async fn lookup(
        &self,
        disease_id: &str,
    ) -> Result<Option<Vec<KnowledgeEntry>>, ExternalServiceError> {
        let url = self.disease_url(disease_id)?;
        debug!("Knowledge lookup: {}", url);

        let response = self
            .client
            .get(url)
            .query(&[("limit", self.limit.to_string()), ("page", "1".to_string())])
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await.map_err(|e| self.classify(e))?;
                parse_response(&body).map(Some)
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(ExternalServiceError::Status(status.as_u16())),
        }
    }
}
