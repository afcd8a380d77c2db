// ==============================================================================
// association_table.rs - Reference Association Table Parser
// ==============================================================================
// Description: Parser for the static variant-to-trait association table
// Author: Matt Barham
// Created: 2026-09-16
// Modified: 2026-10-01
// Version: 1.1.0
// ==============================================================================
// Format: Tab-delimited text with a header row
// Example:
//   variant_id  trait               risk_allele  effect_size  population_frequency
//   rs1801133   homocysteine level  rs1801133-T  0.12         0.33
//   rs4988235   lactose intolerance A            0.80         0.52
// GWAS catalog column names (SNPS, MAPPED_TRAIT, STRONGEST SNP-RISK ALLELE,
// OR or BETA, RISK ALLELE FREQUENCY) are accepted as aliases.
// ==============================================================================

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use crate::models::VariantAssociation;

/// Trait keywords that mark an association as nutrition-relevant when the
/// table carries no explicit `nutrition_relevant` column
pub const NUTRITION_KEYWORDS: &[&str] = &[
    "nutrition", "nutrient", "diet", "metabolism", "obesity", "bmi",
    "lipid", "cholesterol", "glucose", "insulin", "diabetes",
    "vitamin", "iron", "calcium", "magnesium", "zinc", "selenium",
    "caffeine", "alcohol", "lactose", "dairy", "protein",
    "fatty acid", "omega-3", "omega-6", "pufa", "fiber",
    "gut microbiome", "hypertension", "blood pressure",
];

/// Scale of the effect column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectScale {
    /// Log-odds or beta, used as-is
    #[default]
    Beta,
    /// Odds ratio, converted with ln(OR)
    OddsRatio,
}

#[derive(Error, Debug)]
pub enum AssociationTableError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Reference table contains no usable associations")]
    EmptyTable,
}

#[derive(Debug, Deserialize)]
struct RawAssociationRow {
    #[serde(alias = "SNPS", alias = "rsid")]
    variant_id: String,
    #[serde(rename = "trait", alias = "MAPPED_TRAIT", alias = "disease")]
    trait_name: String,
    #[serde(alias = "STRONGEST SNP-RISK ALLELE")]
    risk_allele: String,
    #[serde(alias = "OR or BETA")]
    effect_size: String,
    #[serde(default, alias = "RISK ALLELE FREQUENCY")]
    population_frequency: Option<String>,
    #[serde(default)]
    nutrition_relevant: Option<String>,
}

pub struct AssociationTableParser;

impl AssociationTableParser {
    /// Parse the reference table, skipping rows that cannot be used
    pub fn parse(
        path: impl AsRef<Path>,
        scale: EffectScale,
    ) -> Result<Vec<VariantAssociation>, AssociationTableError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_path(path.as_ref())?;

        let mut associations = Vec::new();
        let mut skipped = 0usize;

        for (idx, result) in reader.deserialize::<RawAssociationRow>().enumerate() {
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    warn!("Skipping unreadable reference row {}: {}", idx + 2, e);
                    skipped += 1;
                    continue;
                }
            };

            match convert_row(row, scale) {
                Some(association) => associations.push(association),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!("Skipped {} unusable reference rows", skipped);
        }

        if associations.is_empty() {
            return Err(AssociationTableError::EmptyTable);
        }

        Ok(associations)
    }
}

fn convert_row(row: RawAssociationRow, scale: EffectScale) -> Option<VariantAssociation> {
    let variant_id = row.variant_id.trim().to_string();
    let trait_name = row.trait_name.trim().to_string();
    if variant_id.is_empty() || trait_name.is_empty() {
        return None;
    }

    let risk_allele = parse_risk_allele(&row.risk_allele)?;

    let raw_effect = row.effect_size.trim().parse::<f64>().ok()?;
    let effect_size = match scale {
        EffectScale::Beta => raw_effect,
        EffectScale::OddsRatio if raw_effect > 0.0 => raw_effect.ln(),
        EffectScale::OddsRatio => return None,
    };
    if !effect_size.is_finite() {
        return None;
    }

    let population_frequency = row
        .population_frequency
        .as_deref()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|p| p.is_finite() && (0.0..=1.0).contains(p));

    let nutrition_relevant = match row.nutrition_relevant.as_deref().and_then(parse_flag) {
        Some(flag) => flag,
        None => is_nutrition_trait(&trait_name),
    };

    Some(VariantAssociation {
        variant_id,
        trait_name,
        risk_allele,
        effect_size,
        population_frequency,
        nutrition_relevant,
    })
}

/// Extract the risk allele from either a bare allele ("A") or a GWAS-style
/// "rs123-A" field
///
/// Only a single base is accepted; multi-base (indel) alleles yield None so
/// the row is skipped.
pub fn parse_risk_allele(field: &str) -> Option<String> {
    let token = field.rsplit('-').next().unwrap_or(field).trim().to_uppercase();

    match token.as_str() {
        "A" | "C" | "G" | "T" => Some(token),
        _ => None,
    }
}

/// Case-insensitive keyword match against the nutrition keyword list
pub fn is_nutrition_trait(trait_name: &str) -> bool {
    let lowered = trait_name.to_lowercase();
    NUTRITION_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_basic_table() {
        let contents = "\
variant_id\ttrait\trisk_allele\teffect_size\tpopulation_frequency
rs1801133\thomocysteine level\trs1801133-T\t0.12\t0.33
rs4988235\tlactose intolerance\tA\t0.80\t0.52
";
        let file = create_test_file(contents);
        let rows = AssociationTableParser::parse(file.path(), EffectScale::Beta).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].risk_allele, "T");
        assert_eq!(rows[0].population_frequency, Some(0.33));
        // "homocysteine level" matches no keyword
        assert!(!rows[0].nutrition_relevant);
        assert!(rows[1].nutrition_relevant);
    }

    #[test]
    fn test_explicit_relevance_column_wins() {
        let contents = "\
variant_id\ttrait\trisk_allele\teffect_size\tpopulation_frequency\tnutrition_relevant
rs1\tD1\tA\t0.2\t0.4\ttrue
rs2\ttype 2 diabetes\tG\t0.1\t0.3\tfalse
";
        let file = create_test_file(contents);
        let rows = AssociationTableParser::parse(file.path(), EffectScale::Beta).unwrap();

        assert!(rows[0].nutrition_relevant);
        assert!(!rows[1].nutrition_relevant);
    }

    #[test]
    fn test_gwas_catalog_column_aliases() {
        let contents = "\
SNPS\tMAPPED_TRAIT\tSTRONGEST SNP-RISK ALLELE\tOR or BETA\tRISK ALLELE FREQUENCY\tP-VALUE
rs7903146\ttype 2 diabetes mellitus\trs7903146-T\t1.4\tNR\t1E-50
";
        let file = create_test_file(contents);
        let rows = AssociationTableParser::parse(file.path(), EffectScale::OddsRatio).unwrap();

        assert_eq!(rows.len(), 1);
        assert!((rows[0].effect_size - 1.4f64.ln()).abs() < 1e-12);
        assert_eq!(rows[0].population_frequency, None);
    }

    #[test]
    fn test_unusable_rows_skipped() {
        let contents = "\
variant_id\ttrait\trisk_allele\teffect_size\tpopulation_frequency
rs1\tobesity\t?\t0.2\t0.4
rs2\tobesity\tC\tnot-a-number\t0.4
rs3\tobesity\tC\t0.3\t1.7
rs4\tobesity\trs4-AT\t0.2\t0.4
";
        let file = create_test_file(contents);
        let rows = AssociationTableParser::parse(file.path(), EffectScale::Beta).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].variant_id, "rs3");
        // Out-of-range frequency is dropped, the row is kept
        assert_eq!(rows[0].population_frequency, None);
    }

    #[test]
    fn test_empty_table_rejected() {
        let contents = "variant_id\ttrait\trisk_allele\teffect_size\tpopulation_frequency\n";
        let file = create_test_file(contents);
        let result = AssociationTableParser::parse(file.path(), EffectScale::Beta);
        assert!(matches!(result, Err(AssociationTableError::EmptyTable)));
    }

    #[test]
    fn test_parse_risk_allele_forms() {
        assert_eq!(parse_risk_allele("rs123-A"), Some("A".to_string()));
        assert_eq!(parse_risk_allele("g"), Some("G".to_string()));
        assert_eq!(parse_risk_allele("rs123-?"), None);
    }

    #[test]
    fn test_multi_base_risk_allele_rejected() {
        assert_eq!(parse_risk_allele("rs1-AT"), None);
        assert_eq!(parse_risk_allele("AG"), None);
        assert_eq!(parse_risk_allele(" rs9-c "), Some("C".to_string()));
    }
}
