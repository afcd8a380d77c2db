// ==============================================================================
// parsers/mod.rs - File parser modules
// ==============================================================================
// Description: Parsers for raw genotype uploads and the reference association table
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2026-09-16
// Version: 2.0.0
// ==============================================================================

pub mod genome23andme;
pub mod association_table;

pub use genome23andme::{Genome23Parser, GenomeParseError, ParsedGenome};
pub use association_table::{
    AssociationTableError, AssociationTableParser, EffectScale, NUTRITION_KEYWORDS,
};
