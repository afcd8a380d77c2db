// ==============================================================================
// output.rs - Stage Artifact Storage
// ==============================================================================
// Description: Per-job JSON artifacts for each pipeline stage, plus a CSV
//              export of the final recommendations
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-10-16
// Version: 2.1.0
// ==============================================================================
// Layout:
//   {data_dir}/results/{owner}/{job_id}/matched_variants.json
//                                       disease_candidates.json
//                                       ranked_diseases.json
//                                       enriched_associations.json
//                                       recommendations.json
//                                       recommendations.csv
//                                       recipe_matches.json (with a recipe catalog)
// Artifacts are written to a temporary file and renamed into place, so a
// reader never sees a partial artifact.
// ==============================================================================

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::RecommendationSet;
use crate::recipes::RecipeSelection;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize {kind} artifact: {source}")]
    Json {
        kind: ArtifactKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize {name}: {source}")]
    Export {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write CSV export: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0} artifact not found; run the earlier stages first")]
    Missing(ArtifactKind),

    #[error("invalid path component '{0}'")]
    InvalidComponent(String),
}

/// One artifact per pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    MatchedVariants,
    DiseaseCandidates,
    RankedDiseases,
    EnrichedAssociations,
    Recommendations,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::MatchedVariants,
        ArtifactKind::DiseaseCandidates,
        ArtifactKind::RankedDiseases,
        ArtifactKind::EnrichedAssociations,
        ArtifactKind::Recommendations,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactKind::MatchedVariants => "matched_variants.json",
            ArtifactKind::DiseaseCandidates => "disease_candidates.json",
            ArtifactKind::RankedDiseases => "ranked_diseases.json",
            ArtifactKind::EnrichedAssociations => "enriched_associations.json",
            ArtifactKind::Recommendations => "recommendations.json",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArtifactKind::MatchedVariants => "matched variants",
            ArtifactKind::DiseaseCandidates => "disease candidates",
            ArtifactKind::RankedDiseases => "ranked diseases",
            ArtifactKind::EnrichedAssociations => "enriched associations",
            ArtifactKind::Recommendations => "recommendations",
        };
        f.write_str(name)
    }
}

pub const RECOMMENDATIONS_CSV: &str = "recommendations.csv";
pub const RECIPE_MATCHES_JSON: &str = "recipe_matches.json";

#[derive(Debug, Serialize)]
struct RecommendationRow<'a> {
    ingredient: &'a str,
    direction: &'a str,
    aggregate_score: f64,
    supporting_disease_count: usize,
    opposing_score: f64,
    supporting_diseases: String,
}

/// Artifact directory for one job
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Store rooted at `{data_dir}/results/{owner}/{job_id}`
    pub fn for_job(data_dir: &Path, owner: &str, job_id: &str) -> Result<Self, ArtifactError> {
        let owner = safe_component(owner)?;
        let job_id = safe_component(job_id)?;
        Ok(Self {
            dir: data_dir.join("results").join(owner).join(job_id),
        })
    }

    /// Store rooted at an arbitrary directory
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: ArtifactKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn exists(&self, kind: ArtifactKind) -> bool {
        self.path(kind).is_file()
    }

    /// Serialize a stage artifact, replacing any earlier version
    pub fn write<T: Serialize>(&self, kind: ArtifactKind, value: &T) -> Result<PathBuf, ArtifactError> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|source| ArtifactError::Json { kind, source })?;
        let path = self.path(kind);
        self.write_atomic(&path, &bytes)?;

        debug!("Wrote {} artifact: {:?} ({} bytes)", kind, path, bytes.len());
        Ok(path)
    }

    /// Load a stage artifact written by an earlier run
    pub fn read<T: DeserializeOwned>(&self, kind: ArtifactKind) -> Result<T, ArtifactError> {
        let path = self.path(kind);
        if !path.is_file() {
            return Err(ArtifactError::Missing(kind));
        }
        let file = File::open(&path).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|source| ArtifactError::Json { kind, source })
    }

    /// CSV export of the final recommendations, prefer rows first
    pub fn write_recommendations_csv(&self, set: &RecommendationSet) -> Result<PathBuf, ArtifactError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for rec in set.prefer.iter().chain(set.avoid.iter()) {
            writer.serialize(RecommendationRow {
                ingredient: &rec.ingredient_name,
                direction: rec.direction.as_str(),
                aggregate_score: rec.aggregate_score,
                supporting_disease_count: rec.supporting_disease_count,
                opposing_score: rec.opposing_score,
                supporting_diseases: rec.supporting_diseases.join(";"),
            })?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| ArtifactError::Csv(e.into_error().into()))?;

        let path = self.dir.join(RECOMMENDATIONS_CSV);
        self.write_atomic(&path, &bytes)?;

        info!("Wrote recommendations CSV: {:?} ({} rows)", path, set.len());
        Ok(path)
    }

    /// Recipe suggestions derived from the final recommendations
    pub fn write_recipe_matches(&self, selection: &RecipeSelection) -> Result<PathBuf, ArtifactError> {
        let bytes = serde_json::to_vec_pretty(selection).map_err(|source| ArtifactError::Export {
            name: RECIPE_MATCHES_JSON,
            source,
        })?;
        let path = self.dir.join(RECIPE_MATCHES_JSON);
        self.write_atomic(&path, &bytes)?;

        info!(
            "Wrote recipe suggestions: {:?} ({} recipes)",
            path,
            selection.recipes.len()
        );
        Ok(path)
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
        let io_err = |source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(|source| ArtifactError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let tmp = path.with_extension("tmp");
        {
            let file = File::create(&tmp).map_err(io_err)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(bytes).map_err(io_err)?;
            writer.flush().map_err(io_err)?;
        }
        std::fs::rename(&tmp, path).map_err(io_err)
    }
}

fn safe_component(value: &str) -> Result<&str, ArtifactError> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(|c| c == '/' || c == '\\')
    {
        return Err(ArtifactError::InvalidComponent(value.to_string()));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, IngredientRecommendation};
    use tempfile::TempDir;

    fn recommendation(name: &str, direction: Direction, score: f64) -> IngredientRecommendation {
        IngredientRecommendation {
            ingredient_name: name.to_string(),
            direction,
            aggregate_score: score,
            supporting_disease_count: 2,
            supporting_diseases: vec!["asthma".to_string(), "obesity".to_string()],
            opposing_score: 0.0,
            opposing_disease_count: 0,
        }
    }

    #[test]
    fn test_job_layout() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::for_job(temp.path(), "user-7", "job-1").unwrap();

        assert_eq!(
            store.path(ArtifactKind::RankedDiseases),
            temp.path().join("results/user-7/job-1/ranked_diseases.json")
        );
    }

    #[test]
    fn test_path_traversal_rejected() {
        let temp = TempDir::new().unwrap();
        assert!(ArtifactStore::for_job(temp.path(), "../etc", "job").is_err());
        assert!(ArtifactStore::for_job(temp.path(), "..", "job").is_err());
        assert!(ArtifactStore::for_job(temp.path(), "user", "").is_err());
    }

    #[test]
    fn test_write_then_read_back() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::for_job(temp.path(), "user", "job").unwrap();
        let set = RecommendationSet {
            prefer: vec![recommendation("oats", Direction::Prefer, 0.8)],
            avoid: vec![],
        };

        store.write(ArtifactKind::Recommendations, &set).unwrap();
        let loaded: RecommendationSet = store.read(ArtifactKind::Recommendations).unwrap();

        assert_eq!(loaded, set);
        assert!(!store.dir().join("recommendations.tmp").exists());
    }

    #[test]
    fn test_missing_artifact() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::at(temp.path());
        let result: Result<RecommendationSet, _> = store.read(ArtifactKind::Recommendations);
        assert!(matches!(
            result,
            Err(ArtifactError::Missing(ArtifactKind::Recommendations))
        ));
    }

    #[test]
    fn test_recommendations_csv() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::at(temp.path());
        let set = RecommendationSet {
            prefer: vec![recommendation("oats", Direction::Prefer, 0.8)],
            avoid: vec![recommendation("salt", Direction::Avoid, 0.5)],
        };

        let path = store.write_recommendations_csv(&set).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(
            lines[0],
            "ingredient,direction,aggregate_score,supporting_disease_count,opposing_score,supporting_diseases"
        );
        assert_eq!(lines[1], "oats,prefer,0.8,2,0.0,asthma;obesity");
        assert_eq!(lines[2], "salt,avoid,0.5,2,0.0,asthma;obesity");
    }

    #[test]
    fn test_recipe_matches_export() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::at(temp.path());
        let selection = RecipeSelection {
            preferred_ingredients: vec!["oat".to_string()],
            total_recipes: 3,
            ..RecipeSelection::default()
        };

        let path = store.write_recipe_matches(&selection).unwrap();

        assert_eq!(path, temp.path().join(RECIPE_MATCHES_JSON));
        let loaded: RecipeSelection =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, selection);
        // Stage artifacts are untouched
        assert!(!store.exists(ArtifactKind::Recommendations));
    }
}
