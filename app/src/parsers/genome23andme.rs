// ==============================================================================
// genome23andme.rs - Consumer Raw Genotype Parser
// ==============================================================================
// Description: Lenient parser for 23andMe-style raw genotype files
// Author: Matt Barham
// Created: 2025-11-04
// Modified: 2026-10-16
// Version: 2.1.0
// ==============================================================================
// Format: Tab-delimited text with header comments
// Example:
//   # rsid    chromosome    position    genotype
//   rs548049170    1    69869    TT
//   rs13328684    1    74792    --
//   rs9283150    1    565508    AA
// Malformed rows are skipped one at a time and counted. The file only fails
// when fewer than the minimum viable number of calls survive.
// ==============================================================================

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::GenotypeCall;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Parsed genome with the count of rows that had to be dropped
#[derive(Debug, Clone, Default)]
pub struct ParsedGenome {
    pub calls: Vec<GenotypeCall>,
    pub skipped_rows: usize,
}

/// Parser for consumer raw genome files
#[derive(Debug, Clone)]
pub struct Genome23Parser {
    /// Fewer successfully parsed calls than this fails the file
    pub min_viable_calls: usize,
}

/// Errors that can occur during genome file parsing
#[derive(Error, Debug)]
pub enum GenomeParseError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("genotype file has {parsed} parsable rows ({skipped} malformed rows skipped), at least {required} required")]
    TooFewCalls {
        parsed: usize,
        skipped: usize,
        required: usize,
    },
}

impl Default for Genome23Parser {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Genome23Parser {
    pub fn new(min_viable_calls: usize) -> Self {
        Self { min_viable_calls }
    }

    /// Parse a raw genome file, transparently decompressing gzip uploads
    ///
    /// Compression is detected from the gzip magic bytes, not the file name.
    pub fn parse(&self, path: impl AsRef<Path>) -> Result<ParsedGenome, GenomeParseError> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);

        let parsed = if is_gzip {
            debug!("Decompressing gzip genome file {:?}", path);
            self.parse_reader(GzDecoder::new(reader))?
        } else {
            self.parse_reader(reader)?
        };

        info!(
            "Parsed {} genotype calls from {:?} ({} malformed rows skipped)",
            parsed.calls.len(),
            path,
            parsed.skipped_rows
        );

        Ok(parsed)
    }

    /// Parse genome data from any reader
    ///
    /// Rows that are not valid UTF-8 count as malformed.
    pub fn parse_reader<R: Read>(&self, reader: R) -> Result<ParsedGenome, GenomeParseError> {
        let mut reader = BufReader::new(reader);
        let mut parsed = ParsedGenome::default();
        let mut buf = Vec::new();
        let mut line_no = 0usize;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;

            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim_end_matches(|c| c == '\n' || c == '\r'),
                Err(_) => {
                    debug!("Skipping non-UTF-8 genome row at line {}", line_no);
                    parsed.skipped_rows += 1;
                    continue;
                }
            };
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            match parse_line(line) {
                Some(call) => parsed.calls.push(call),
                None => {
                    debug!("Skipping malformed genome row at line {}", line_no);
                    parsed.skipped_rows += 1;
                }
            }
        }

        if parsed.calls.len() < self.min_viable_calls.max(1) {
            return Err(GenomeParseError::TooFewCalls {
                parsed: parsed.calls.len(),
                skipped: parsed.skipped_rows,
                required: self.min_viable_calls.max(1),
            });
        }

        Ok(parsed)
    }
}

/// Parse a single data row; None when the row is malformed
fn parse_line(line: &str) -> Option<GenotypeCall> {
    let fields: Vec<&str> = line.split('\t').collect();

    if fields.len() != 4 {
        return None;
    }

    let variant_id = fields[0].trim();
    if variant_id.is_empty() {
        return None;
    }

    let position = fields[2].trim().parse::<u64>().ok()?;

    Some(GenotypeCall {
        variant_id: variant_id.to_string(),
        chromosome: fields[1].trim().to_string(),
        position,
        genotype: fields[3].trim().to_uppercase(),
    })
}
