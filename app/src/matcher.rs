// ==============================================================================
// matcher.rs - Genotype Matcher
// ==============================================================================
// Description: Joins parsed genotype calls against nutrition-relevant entries
//              of the reference association table
// Author: Matt Barham
// Created: 2026-09-19
// Modified: 2026-10-03
// Version: 1.1.0
// ==============================================================================

use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::genotype_converter::risk_allele_dosage;
use crate::models::{GenotypeCall, MatchOutput, MatchedVariant};
use crate::parsers::{Genome23Parser, GenomeParseError};
use crate::reference::ReferenceTable;

pub struct GenotypeMatcher<'a> {
    table: &'a ReferenceTable,
    parser: Genome23Parser,
}

impl<'a> GenotypeMatcher<'a> {
    pub fn new(table: &'a ReferenceTable, min_viable_calls: usize) -> Self {
        Self {
            table,
            parser: Genome23Parser::new(min_viable_calls),
        }
    }

    /// Parse a genome file and match it against the reference table
    ///
    /// Fails only when the file cannot be read or has too few parsable
    /// calls. An empty match is a valid result.
    pub fn match_file(&self, path: impl AsRef<Path>) -> Result<MatchOutput, GenomeParseError> {
        let parsed = self.parser.parse(path)?;
        let variants = self.match_calls(&parsed.calls);

        info!(
            "Matched {} nutrition-relevant variant associations from {} calls",
            variants.len(),
            parsed.calls.len()
        );

        Ok(MatchOutput {
            calls_parsed: parsed.calls.len(),
            rows_skipped: parsed.skipped_rows,
            variants,
        })
    }

    /// Join calls against the table, in genome order then table order
    pub fn match_calls(&self, calls: &[GenotypeCall]) -> Vec<MatchedVariant> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut matched = Vec::new();

        for call in calls {
            // Later duplicates of an rsid are ignored
            if !seen.insert(call.variant_id.as_str()) {
                continue;
            }

            for association in self.table.associations_for(&call.variant_id) {
                if !association.nutrition_relevant {
                    continue;
                }

                let dosage = match risk_allele_dosage(&call.genotype, &association.risk_allele) {
                    Ok(dosage) => dosage,
                    Err(e) => {
                        debug!("Treating {} as no-call: {}", call.variant_id, e);
                        None
                    }
                };

                matched.push(MatchedVariant {
                    variant_id: call.variant_id.clone(),
                    chromosome: call.chromosome.clone(),
                    position: call.position,
                    genotype: call.genotype.clone(),
                    trait_name: association.trait_name.clone(),
                    risk_allele: association.risk_allele.clone(),
                    dosage,
                    effect_size: association.effect_size,
                    population_frequency: association.population_frequency,
                });
            }
        }

        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VariantAssociation;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn association(variant: &str, trait_name: &str, allele: &str, relevant: bool) -> VariantAssociation {
        VariantAssociation {
            variant_id: variant.to_string(),
            trait_name: trait_name.to_string(),
            risk_allele: allele.to_string(),
            effect_size: 0.25,
            population_frequency: Some(0.4),
            nutrition_relevant: relevant,
        }
    }

    fn call(variant: &str, genotype: &str) -> GenotypeCall {
        GenotypeCall {
            variant_id: variant.to_string(),
            chromosome: "1".to_string(),
            position: 1000,
            genotype: genotype.to_string(),
        }
    }

    fn table() -> ReferenceTable {
        ReferenceTable::from_associations(vec![
            association("rs1", "obesity", "A", true),
            association("rs1", "type 2 diabetes", "G", true),
            association("rs2", "eye colour", "C", false),
            association("rs3", "hypertension", "T", true),
        ])
    }

    #[test]
    fn test_join_filters_irrelevant_traits() {
        let table = table();
        let matcher = GenotypeMatcher::new(&table, 1);
        let matched = matcher.match_calls(&[call("rs1", "AG"), call("rs2", "CC"), call("rs9", "AA")]);

        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].trait_name, "obesity");
        assert_eq!(matched[0].dosage, Some(1));
        assert_eq!(matched[1].trait_name, "type 2 diabetes");
        assert_eq!(matched[1].dosage, Some(1));
    }

    #[test]
    fn test_no_call_and_indel_have_no_dosage() {
        let table = table();
        let matcher = GenotypeMatcher::new(&table, 1);
        let matched = matcher.match_calls(&[call("rs3", "--"), call("rs1", "DI")]);

        assert_eq!(matched.len(), 3);
        assert!(matched.iter().all(|m| m.dosage.is_none()));
    }

    #[test]
    fn test_duplicate_calls_matched_once() {
        let table = table();
        let matcher = GenotypeMatcher::new(&table, 1);
        let matched = matcher.match_calls(&[call("rs3", "TT"), call("rs3", "CC")]);

        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].dosage, Some(2));
    }

    #[test]
    fn test_unrecognized_variants_yield_empty_match() {
        let table = table();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"# header\nrs404\t1\t100\tAA\nrs405\t2\t200\tGG\n").unwrap();

        let output = GenotypeMatcher::new(&table, 1).match_file(file.path()).unwrap();
        assert_eq!(output.calls_parsed, 2);
        assert!(output.variants.is_empty());
    }

    #[test]
    fn test_empty_file_fails() {
        let table = table();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"# only a header\n").unwrap();

        let result = GenotypeMatcher::new(&table, 1).match_file(file.path());
        assert!(matches!(result, Err(GenomeParseError::TooFewCalls { .. })));
    }
}
