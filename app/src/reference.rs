// ==============================================================================
// reference.rs - Static Reference Data
// ==============================================================================
// Description: Variant association table and disease base-rate priors, loaded
//              once at process start and shared read-only across jobs
// Author: Matt Barham
// Created: 2025-11-12
// Modified: 2026-09-18
// Version: 2.0.0
// ==============================================================================

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

use crate::models::VariantAssociation;
use crate::parsers::{AssociationTableParser, EffectScale};

/// Variant associations indexed by variant id
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    by_variant: HashMap<String, Vec<VariantAssociation>>,
    association_count: usize,
}

impl ReferenceTable {
    /// Load the reference association table from disk
    pub fn load<P: AsRef<Path>>(path: P, scale: EffectScale) -> Result<Self> {
        let associations = AssociationTableParser::parse(path.as_ref(), scale)
            .with_context(|| format!("Failed to load reference table {:?}", path.as_ref()))?;

        let table = Self::from_associations(associations);

        info!(
            "Loaded reference table: {} associations across {} variants ({} nutrition-relevant)",
            table.association_count,
            table.by_variant.len(),
            table.nutrition_relevant_count()
        );

        Ok(table)
    }

    pub fn from_associations(associations: Vec<VariantAssociation>) -> Self {
        let association_count = associations.len();
        let mut by_variant: HashMap<String, Vec<VariantAssociation>> = HashMap::new();

        for association in associations {
            by_variant
                .entry(association.variant_id.clone())
                .or_default()
                .push(association);
        }

        Self {
            by_variant,
            association_count,
        }
    }

    /// All associations for a variant, in table order
    pub fn associations_for(&self, variant_id: &str) -> &[VariantAssociation] {
        self.by_variant
            .get(variant_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.association_count
    }

    pub fn is_empty(&self) -> bool {
        self.association_count == 0
    }

    pub fn variant_count(&self) -> usize {
        self.by_variant.len()
    }

    pub fn nutrition_relevant_count(&self) -> usize {
        self.by_variant
            .values()
            .flatten()
            .filter(|a| a.nutrition_relevant)
            .count()
    }
}

/// Disease prevalence priors keyed by disease/trait name
#[derive(Debug, Clone, Default)]
pub struct DiseasePriors {
    priors: HashMap<String, f64>,
}

impl DiseasePriors {
    /// Load priors from a JSON object of disease → prevalence
    ///
    /// Values may be plain numbers or nested objects (location → year →
    /// value); the first value strictly between 0 and 1, in key order, is
    /// used. Diseases without a usable value are left out.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read priors file {:?}", path.as_ref()))?;
        let value: Value = serde_json::from_str(&raw).context("Failed to parse priors JSON")?;

        let priors = Self::from_json(&value)?;
        info!("Loaded {} disease priors", priors.len());
        Ok(priors)
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("Priors JSON must be an object keyed by disease"))?;

        let mut priors = HashMap::new();
        for (disease, entry) in object {
            match first_prevalence(entry) {
                Some(p) => {
                    priors.insert(normalize_key(disease), p);
                }
                None => debug!("No usable prevalence for '{}'", disease),
            }
        }

        Ok(Self { priors })
    }

    pub fn from_map(map: BTreeMap<String, f64>) -> Self {
        Self {
            priors: map
                .into_iter()
                .filter(|(_, p)| *p > 0.0 && *p < 1.0)
                .map(|(k, p)| (normalize_key(&k), p))
                .collect(),
        }
    }

    /// Prior for a disease, matched case-insensitively
    pub fn get(&self, disease: &str) -> Option<f64> {
        self.priors.get(&normalize_key(disease)).copied()
    }

    pub fn len(&self) -> usize {
        self.priors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priors.is_empty()
    }
}

fn normalize_key(disease: &str) -> String {
    disease.trim().to_lowercase()
}

fn first_prevalence(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|p| *p > 0.0 && *p < 1.0),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|p| *p > 0.0 && *p < 1.0),
        Value::Object(map) => map.values().find_map(first_prevalence),
        _ => None,
    }
}

/// Everything the pipeline reads but never mutates
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub table: ReferenceTable,
    pub priors: DiseasePriors,
}

impl ReferenceData {
    pub fn new(table: ReferenceTable, priors: DiseasePriors) -> Self {
        Self { table, priors }
    }
}
