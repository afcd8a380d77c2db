// ==============================================================================
// main.rs - Nutrigen Worker Process
// ==============================================================================
// Description: Background worker that runs analysis jobs submitted through
//              the Redis queue
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-10-16
// Version: 2.1.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::Parser;
use redis::aio::ConnectionManager;
use redis::Client as RedisClient;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nutrigen_processor::enricher::FallbackAssociations;
use nutrigen_processor::knowledge::HttpKnowledgeClient;
use nutrigen_processor::recipes::RecipeCatalog;
use nutrigen_processor::reference::{DiseasePriors, ReferenceData, ReferenceTable};
use nutrigen_processor::AnalysisPipeline;

mod config;
mod job;
mod job_processor;
mod orchestrator;
mod progress;
mod queue;
mod store;

use config::{LogFormat, WorkerConfig};
use job_processor::JobProcessor;
use orchestrator::{Orchestrator, OrchestratorError};
use queue::{JobPayload, JobQueue, ProgressPublisher, QueueRequest, RerunPayload};
use store::{JobStore, PgJobStore, StoreError};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables before clap reads them
    dotenvy::dotenv().ok();

    let config = WorkerConfig::parse();
    init_tracing(config.log_format);

    info!("Starting Nutrigen Worker v{}", env!("CARGO_PKG_VERSION"));

    let pipeline_config = config.load_pipeline_config()?;

    // Initialize database connection
    let database_url = config.resolve_database_url()?;
    let db_pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    let store = PgJobStore::new(db_pool);
    store
        .ensure_schema()
        .await
        .context("Failed to prepare job table")?;
    let store: Arc<dyn JobStore> = Arc::new(store);

    info!("Connected to PostgreSQL");

    // Initialize Redis connection
    let redis_client =
        RedisClient::open(config.redis_url.as_str()).context("Failed to create Redis client")?;
    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .context("Failed to create Redis connection manager")?;

    info!("Connected to Redis");

    // Shared read-only inputs
    let table = ReferenceTable::load(&config.reference_table, pipeline_config.effect_scale)?;
    let priors = match &config.priors_file {
        Some(path) => DiseasePriors::load(path)?,
        None => DiseasePriors::default(),
    };
    let fallback = match &config.fallback_file {
        Some(path) => FallbackAssociations::load(path)?,
        None => {
            warn!("No fallback associations configured; failed lookups will yield no ingredients");
            FallbackAssociations::default()
        }
    };
    let client = HttpKnowledgeClient::new(
        &config.knowledge_service_url,
        pipeline_config.enricher.request_timeout(),
    )?;

    info!(
        "Reference data ready: {} associations, {} priors, {} fallback diseases",
        table.len(),
        priors.len(),
        fallback.len()
    );

    let mut pipeline = AnalysisPipeline::new(
        Arc::new(ReferenceData::new(table, priors)),
        Arc::new(client),
        Arc::new(fallback),
        pipeline_config,
    );
    if let Some(path) = &config.recipe_catalog {
        pipeline = pipeline.with_recipes(Arc::new(RecipeCatalog::load(path)?));
    }

    let publisher = ProgressPublisher::new(redis_conn.clone());
    let processor = JobProcessor::new(
        Arc::new(pipeline),
        Arc::clone(&store),
        config.data_dir.clone(),
        Some(publisher.clone()),
    );
    let orchestrator = Orchestrator::new(store, Arc::new(processor));

    // Recover stuck jobs from previous worker instance
    info!("Checking for stuck jobs from previous worker instance...");
    if let Err(e) = orchestrator.recover_stuck_jobs().await {
        error!("Failed to recover stuck jobs: {}", e);
    }

    info!("Worker ready, waiting for jobs...");
    run(orchestrator, JobQueue::new(redis_conn), publisher).await
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "nutrigen_worker=info,nutrigen_processor=info".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact().with_target(false))
            .init(),
    }
}

/// Main processing loop - polls the Redis queue for submissions and reruns
async fn run(
    orchestrator: Orchestrator,
    mut job_queue: JobQueue,
    publisher: ProgressPublisher,
) -> Result<()> {
    loop {
        match job_queue.dequeue().await {
            Ok(Some(QueueRequest::Submit(payload))) => {
                submit(&orchestrator, &publisher, payload).await
            }
            Ok(Some(QueueRequest::Rerun(request))) => {
                rerun(&orchestrator, &publisher, request).await
            }
            Ok(None) => {
                // BRPOP already waited; loop straight back
            }
            Err(e) => {
                error!("Failed to dequeue job: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

async fn submit(orchestrator: &Orchestrator, publisher: &ProgressPublisher, payload: JobPayload) {
    let result = orchestrator
        .submit(&payload.owner_id, &payload.genome_path, payload.job_id)
        .await;

    let reason = match result {
        Ok(job_id) => {
            info!("Received job {} for owner {}", job_id, payload.owner_id);
            return;
        }
        Err(OrchestratorError::Store(StoreError::ActiveJobExists(owner))) => {
            warn!("Rejected submission: owner {} already has an analysis in progress", owner);
            format!("owner '{}' already has an analysis in progress", owner)
        }
        Err(e) => {
            error!("Failed to submit job for owner {}: {}", payload.owner_id, e);
            e.to_string()
        }
    };

    // Without a submitter-chosen id nobody is listening for this job
    if let Some(job_id) = payload.job_id {
        if let Err(e) = publisher.publish_rejection(job_id, &reason).await {
            warn!("Failed to publish rejection for job {}: {}", job_id, e);
        }
    }
}

async fn rerun(orchestrator: &Orchestrator, publisher: &ProgressPublisher, request: RerunPayload) {
    if let Err(e) = orchestrator.rerun_from(request.job_id, request.from_stage).await {
        warn!("Rejected rerun of job {}: {}", request.job_id, e);
        if let Err(e) = publisher.publish_rejection(request.job_id, &e.to_string()).await {
            warn!("Failed to publish rejection for job {}: {}", request.job_id, e);
        }
    }
}
