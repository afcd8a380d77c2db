// ==============================================================================
// genotype_converter.rs - Genotype to Risk Allele Dosage Conversion
// ==============================================================================
// Description: Counts copies of a risk allele in consumer genotype calls
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-09-17
// Version: 2.0.0
// ==============================================================================
// Algorithm:
//   Given the risk allele R from the reference table:
//   - R/R (e.g., TT where R=T) → 2
//   - R/x or x/R (e.g., CT)    → 1
//   - x/x (e.g., CC)           → 0
//   - --/-- (no call)          → None
//   Separated forms ("C/T", "C|T") and haploid calls ("T") are accepted.
// ==============================================================================

use thiserror::Error;

/// Errors that can occur during genotype conversion
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenotypeConversionError {
    #[error("Invalid genotype format: '{0}' (expected one or two nucleotide alleles)")]
    InvalidFormat(String),

    #[error("Invalid risk allele: '{0}' (expected a single nucleotide)")]
    InvalidRiskAllele(String),
}

/// Count copies of `risk_allele` in a genotype call
///
/// # Arguments
/// * `genotype` - Genotype string (e.g., "TT", "AG", "A/G", "--")
/// * `risk_allele` - Single-nucleotide risk allele (e.g., "T")
///
/// # Returns
/// * `Ok(Some(dosage))` - Risk allele count (0, 1 or 2)
/// * `Ok(None)` - No-call genotype
/// * `Err(GenotypeConversionError)` - Indel or otherwise unreadable genotype
///
/// # Examples
/// ```
/// use nutrigen_processor::genotype_converter::risk_allele_dosage;
///
/// assert_eq!(risk_allele_dosage("TT", "T").unwrap(), Some(2));
/// assert_eq!(risk_allele_dosage("CT", "T").unwrap(), Some(1));
/// assert_eq!(risk_allele_dosage("C/C", "T").unwrap(), Some(0));
/// assert_eq!(risk_allele_dosage("--", "T").unwrap(), None);
/// ```
pub fn risk_allele_dosage(
    genotype: &str,
    risk_allele: &str,
) -> Result<Option<u8>, GenotypeConversionError> {
    let risk = single_nucleotide(risk_allele)
        .ok_or_else(|| GenotypeConversionError::InvalidRiskAllele(risk_allele.to_string()))?;

    let normalized: String = genotype
        .trim()
        .to_uppercase()
        .chars()
        .filter(|c| !matches!(c, '/' | '|' | ' '))
        .collect();

    if normalized.is_empty() || normalized.chars().all(|c| c == '-' || c == '0') {
        return Ok(None);
    }

    if normalized.len() > 2 || !normalized.chars().all(is_nucleotide) {
        return Err(GenotypeConversionError::InvalidFormat(genotype.to_string()));
    }

    Ok(Some(normalized.chars().filter(|&c| c == risk).count() as u8))
}

fn single_nucleotide(allele: &str) -> Option<char> {
    let mut chars = allele.trim().chars();
    let first = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() || !is_nucleotide(first) {
        return None;
    }
    Some(first)
}

fn is_nucleotide(c: char) -> bool {
    matches!(c, 'A' | 'C' | 'G' | 'T')
}
