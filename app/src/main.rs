// ==============================================================================
// main.rs - Nutrigen Processor Entry Point
// ==============================================================================
// Description: One-shot offline analysis of a single genotype file
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-10-16
// Version: 2.1.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nutrigen_processor::enricher::FallbackAssociations;
use nutrigen_processor::knowledge::HttpKnowledgeClient;
use nutrigen_processor::output::ArtifactStore;
use nutrigen_processor::processor::LoggingObserver;
use nutrigen_processor::recipes::RecipeCatalog;
use nutrigen_processor::reference::{DiseasePriors, ReferenceData, ReferenceTable};
use nutrigen_processor::{AnalysisPipeline, PipelineConfig, PipelineStage};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Genotype file to analyse (tab-delimited, optionally gzipped)
    #[arg(short, long)]
    genome: Option<PathBuf>,

    /// Reference association table (tab-delimited)
    #[arg(short, long, env = "REFERENCE_TABLE")]
    reference: PathBuf,

    /// Disease prevalence priors (JSON)
    #[arg(long, env = "PRIORS_FILE")]
    priors: Option<PathBuf>,

    /// Fallback ingredient associations (JSON)
    #[arg(long, env = "FALLBACK_FILE")]
    fallback: Option<PathBuf>,

    /// Knowledge service base URL
    #[arg(long, env = "KNOWLEDGE_SERVICE_URL", default_value = "http://localhost:8080")]
    knowledge_url: String,

    /// Recipe catalog (CSV); enables recipe suggestions
    #[arg(long, env = "RECIPE_CATALOG")]
    recipes: Option<PathBuf>,

    /// Directory receiving the stage artifacts
    #[arg(short, long, default_value = "./nutrigen-output")]
    output_dir: PathBuf,

    /// Pipeline configuration (JSON); omitted fields use defaults
    #[arg(long)]
    pipeline_config: Option<PathBuf>,

    /// Start at this stage, reading earlier artifacts from the output directory
    #[arg(long, default_value = "matching")]
    from_stage: PipelineStage,

    /// Override the Monte Carlo seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the Monte Carlo simulation count
    #[arg(long)]
    simulations: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nutrigen_processor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Nutrigen Processor starting...");

    let args = Args::parse();

    let mut config = match &args.pipeline_config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.estimator.seed = seed;
    }
    if let Some(simulations) = args.simulations {
        config.estimator.simulation_count = simulations;
    }
    config.validate().context("Invalid pipeline configuration")?;

    if args.from_stage == PipelineStage::Matching && args.genome.is_none() {
        anyhow::bail!("--genome is required when starting at the matching stage");
    }

    let table = ReferenceTable::load(&args.reference, config.effect_scale)?;
    let priors = match &args.priors {
        Some(path) => DiseasePriors::load(path)?,
        None => DiseasePriors::default(),
    };
    let fallback = match &args.fallback {
        Some(path) => FallbackAssociations::load(path)?,
        None => FallbackAssociations::default(),
    };
    let client = HttpKnowledgeClient::new(&args.knowledge_url, config.enricher.request_timeout())?;

    let mut pipeline = AnalysisPipeline::new(
        Arc::new(ReferenceData::new(table, priors)),
        Arc::new(client),
        Arc::new(fallback),
        config,
    );
    if let Some(path) = &args.recipes {
        pipeline = pipeline.with_recipes(Arc::new(RecipeCatalog::load(path)?));
    }
    let store = ArtifactStore::at(&args.output_dir);

    match pipeline
        .execute(args.genome.as_deref(), &store, args.from_stage, &mut LoggingObserver)
        .await
    {
        Ok(summary) => {
            info!("Analysis completed successfully: {:?}", store.dir());
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(e) => {
            error!("Analysis failed: {}", e);
            Err(e.into())
        }
    }
}
