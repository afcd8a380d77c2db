// ==============================================================================
// processor.rs - Analysis Pipeline Driver
// ==============================================================================
// Description: Runs Matcher → Estimator → Ranker → Enricher → Aggregator for
//              one genotype file, persisting each stage's artifact
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-10-16
// Version: 3.1.0
// ==============================================================================
// Re-entry: a run may start at any stage. Stages before it are not executed;
// their outputs are read back from the job's artifact directory.
// ==============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregator::RecommendationAggregator;
use crate::config::PipelineConfig;
use crate::enricher::{AssociationEnricher, FallbackAssociations};
use crate::error::PipelineError;
use crate::estimator::{EstimationOutput, RiskEstimator};
use crate::knowledge::KnowledgeClient;
use crate::matcher::GenotypeMatcher;
use crate::models::{
    DiseaseEnrichment, EnrichmentOutcome, MatchOutput, MatchedVariant, RankedDisease,
    RecommendationSet,
};
use crate::output::{ArtifactKind, ArtifactStore};
use crate::ranker::DiseaseRanker;
use crate::recipes::{RecipeCatalog, RecipeMatcher};
use crate::reference::ReferenceData;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Matching,
    Estimating,
    Ranking,
    Enriching,
    Aggregating,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 5] = [
        PipelineStage::Matching,
        PipelineStage::Estimating,
        PipelineStage::Ranking,
        PipelineStage::Enriching,
        PipelineStage::Aggregating,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Matching => "matching",
            PipelineStage::Estimating => "estimating",
            PipelineStage::Ranking => "ranking",
            PipelineStage::Enriching => "enriching",
            PipelineStage::Aggregating => "aggregating",
        }
    }

    /// Artifact this stage produces
    pub fn artifact(&self) -> ArtifactKind {
        match self {
            PipelineStage::Matching => ArtifactKind::MatchedVariants,
            PipelineStage::Estimating => ArtifactKind::DiseaseCandidates,
            PipelineStage::Ranking => ArtifactKind::RankedDiseases,
            PipelineStage::Enriching => ArtifactKind::EnrichedAssociations,
            PipelineStage::Aggregating => ArtifactKind::Recommendations,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PipelineStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown pipeline stage '{}'", s))
    }
}

/// Hooks called around every executed stage
///
/// An error returned from a hook aborts the run with that error.
#[async_trait]
pub trait StageObserver: Send {
    async fn stage_started(&mut self, stage: PipelineStage) -> Result<(), PipelineError>;

    async fn stage_completed(
        &mut self,
        stage: PipelineStage,
        artifact: &Path,
    ) -> Result<(), PipelineError>;
}

/// Observer that only logs
pub struct LoggingObserver;

#[async_trait]
impl StageObserver for LoggingObserver {
    async fn stage_started(&mut self, stage: PipelineStage) -> Result<(), PipelineError> {
        info!("Stage {} started", stage);
        Ok(())
    }

    async fn stage_completed(
        &mut self,
        stage: PipelineStage,
        artifact: &Path,
    ) -> Result<(), PipelineError> {
        info!("Stage {} completed: {:?}", stage, artifact);
        Ok(())
    }
}

/// Counts from the stages that ran in this invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub calls_parsed: Option<usize>,
    pub matched_variants: Option<usize>,
    pub candidates: Option<usize>,
    pub excluded_diseases: Option<usize>,
    pub ranked_diseases: Option<usize>,
    pub degraded_lookups: Option<usize>,
    pub recommendations: usize,
    /// Suggested recipes; `None` when no catalog is attached
    pub recipe_matches: Option<usize>,
    pub artifacts: Vec<PathBuf>,
}

/// The five analysis stages bound to shared reference data and a knowledge source
pub struct AnalysisPipeline {
    reference: Arc<ReferenceData>,
    client: Arc<dyn KnowledgeClient>,
    fallback: Arc<FallbackAssociations>,
    config: PipelineConfig,
    recipes: Option<Arc<RecipeCatalog>>,
}

impl AnalysisPipeline {
    pub fn new(
        reference: Arc<ReferenceData>,
        client: Arc<dyn KnowledgeClient>,
        fallback: Arc<FallbackAssociations>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            reference,
            client,
            fallback,
            config,
            recipes: None,
        }
    }

    /// Attach a recipe catalog; aggregation then also writes recipe suggestions
    pub fn with_recipes(mut self, catalog: Arc<RecipeCatalog>) -> Self {
        self.recipes = Some(catalog);
        self
    }

    /// Stage 3: threshold and top-N
    pub fn run_ranking(&self, estimation: &EstimationOutput) -> Vec<RankedDisease> {
        DiseaseRanker::new(&self.config.ranker).rank(&estimation.candidates)
    }

    /// Stage 4: knowledge-service lookups with fallback
    pub async fn run_enrichment(&self, ranked: &[RankedDisease]) -> Vec<DiseaseEnrichment> {
        AssociationEnricher::new(
            Arc::clone(&self.client),
            Arc::clone(&self.fallback),
            self.config.enricher.clone(),
        )
        .enrich(ranked)
        .await
    }

    /// Stage 5: conflict-resolved recommendations
    pub fn run_aggregation(
        &self,
        enrichments: &[DiseaseEnrichment],
        ranked: &[RankedDisease],
    ) -> RecommendationSet {
        RecommendationAggregator::new(&self.config.aggregator).aggregate(enrichments, ranked)
    }

    async fn match_blocking(&self, genome_path: PathBuf) -> Result<MatchOutput, PipelineError> {
        let reference = Arc::clone(&self.reference);
        let min_viable_calls = self.config.matcher.min_viable_calls;

        tokio::task::spawn_blocking(move || {
            GenotypeMatcher::new(&reference.table, min_viable_calls).match_file(&genome_path)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("matching task failed: {}", e)))?
        .map_err(PipelineError::from)
    }

    async fn estimate_blocking(
        &self,
        variants: Vec<MatchedVariant>,
    ) -> Result<EstimationOutput, PipelineError> {
        let reference = Arc::clone(&self.reference);
        let config = self.config.estimator.clone();

        tokio::task::spawn_blocking(move || {
            RiskEstimator::new(&config, &reference.priors).estimate(&variants)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("risk estimation task failed: {}", e)))
    }

    /// Run the pipeline from `from` to the end
    ///
    /// `genome_path` is required when starting at matching. Artifacts are
    /// written to `store` as each stage completes.
    pub async fn execute<O: StageObserver + ?Sized>(
        &self,
        genome_path: Option<&Path>,
        store: &ArtifactStore,
        from: PipelineStage,
        observer: &mut O,
    ) -> Result<PipelineSummary, PipelineError> {
        let mut summary = PipelineSummary::default();
        info!("Running analysis pipeline from {} into {:?}", from, store.dir());

        // 1. Matching
        let mut matched: Option<MatchOutput> = None;
        if from <= PipelineStage::Matching {
            observer.stage_started(PipelineStage::Matching).await?;
            let path = genome_path.ok_or_else(|| {
                PipelineError::InputFormat("no genotype file supplied".to_string())
            })?;
            let output = self.match_blocking(path.to_path_buf()).await?;

            summary.calls_parsed = Some(output.calls_parsed);
            summary.matched_variants = Some(output.variants.len());
            self.finish(PipelineStage::Matching, &output, store, observer, &mut summary)
                .await?;
            matched = Some(output);
        }

        // 2. Estimating
        let mut estimation: Option<EstimationOutput> = None;
        if from <= PipelineStage::Estimating {
            observer.stage_started(PipelineStage::Estimating).await?;
            let input = match matched.take() {
                Some(m) => m,
                None => store.read::<MatchOutput>(ArtifactKind::MatchedVariants)?,
            };
            let output = self.estimate_blocking(input.variants).await?;

            summary.candidates = Some(output.candidates.len());
            summary.excluded_diseases = Some(output.excluded.len());
            self.finish(PipelineStage::Estimating, &output, store, observer, &mut summary)
                .await?;
            estimation = Some(output);
        }

        // 3. Ranking
        let mut ranked: Option<Vec<RankedDisease>> = None;
        if from <= PipelineStage::Ranking {
            observer.stage_started(PipelineStage::Ranking).await?;
            let input = match estimation.take() {
                Some(e) => e,
                None => store.read::<EstimationOutput>(ArtifactKind::DiseaseCandidates)?,
            };
            let output = self.run_ranking(&input);

            summary.ranked_diseases = Some(output.len());
            self.finish(PipelineStage::Ranking, &output, store, observer, &mut summary)
                .await?;
            ranked = Some(output);
        }

        // 4. Enriching
        let mut enrichments: Option<Vec<DiseaseEnrichment>> = None;
        if from <= PipelineStage::Enriching {
            observer.stage_started(PipelineStage::Enriching).await?;
            let input = match ranked.as_ref() {
                Some(r) => r.clone(),
                None => store.read::<Vec<RankedDisease>>(ArtifactKind::RankedDiseases)?,
            };
            let output = self.run_enrichment(&input).await;

            let degraded = output
                .iter()
                .filter(|e| matches!(e.outcome, EnrichmentOutcome::Fallback { .. }))
                .count();
            if degraded > 0 {
                warn!("{} of {} disease lookups used fallback associations", degraded, output.len());
            }
            summary.degraded_lookups = Some(degraded);
            self.finish(PipelineStage::Enriching, &output, store, observer, &mut summary)
                .await?;
            ranked.get_or_insert(input);
            enrichments = Some(output);
        }

        // 5. Aggregating
        observer.stage_started(PipelineStage::Aggregating).await?;
        let ranked = match ranked {
            Some(r) => r,
            None => store.read::<Vec<RankedDisease>>(ArtifactKind::RankedDiseases)?,
        };
        let enrichments = match enrichments {
            Some(e) => e,
            None => store.read::<Vec<DiseaseEnrichment>>(ArtifactKind::EnrichedAssociations)?,
        };
        let recommendations = self.run_aggregation(&enrichments, &ranked);
        summary.recommendations = recommendations.len();
        summary
            .artifacts
            .push(store.write_recommendations_csv(&recommendations)?);
        if let Some(catalog) = &self.recipes {
            let selection = RecipeMatcher::new(&self.config.recipes).select(catalog, &recommendations);
            summary.recipe_matches = Some(selection.recipes.len());
            summary.artifacts.push(store.write_recipe_matches(&selection)?);
        }
        self.finish(
            PipelineStage::Aggregating,
            &recommendations,
            store,
            observer,
            &mut summary,
        )
        .await?;

        info!(
            "Analysis pipeline finished: {} recommendations",
            summary.recommendations
        );
        Ok(summary)
    }

    async fn finish<T: Serialize + Sync, O: StageObserver + ?Sized>(
        &self,
        stage: PipelineStage,
        output: &T,
        store: &ArtifactStore,
        observer: &mut O,
        summary: &mut PipelineSummary,
    ) -> Result<(), PipelineError> {
        let path = store.write(stage.artifact(), output)?;
        observer.stage_completed(stage, &path).await?;
        summary.artifacts.push(path);
        Ok(())
    }
}
