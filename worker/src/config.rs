// ==============================================================================
// config.rs - Worker Configuration
// ==============================================================================
// Description: Command line and environment configuration for the worker
// Author: Matt Barham
// Created: 2026-09-28
// Modified: 2026-10-14
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use nutrigen_processor::PipelineConfig;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Nutrigen analysis worker", long_about = None)]
pub struct WorkerConfig {
    /// Database URL (or use DATABASE_URL_FILE env var)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// File holding the database URL (Docker secret)
    #[arg(long, env = "DATABASE_URL_FILE")]
    pub database_url_file: Option<PathBuf>,

    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Root directory for job results
    #[arg(long, env = "DATA_DIR", default_value = "/var/lib/nutrigen")]
    pub data_dir: PathBuf,

    /// Reference association table (tab-delimited)
    #[arg(long, env = "REFERENCE_TABLE")]
    pub reference_table: PathBuf,

    /// Disease prevalence priors (JSON)
    #[arg(long, env = "PRIORS_FILE")]
    pub priors_file: Option<PathBuf>,

    /// Fallback ingredient associations (JSON)
    #[arg(long, env = "FALLBACK_FILE")]
    pub fallback_file: Option<PathBuf>,

    /// Recipe catalog (CSV); enables recipe suggestions
    #[arg(long, env = "RECIPE_CATALOG")]
    pub recipe_catalog: Option<PathBuf>,

    #[arg(long, env = "KNOWLEDGE_SERVICE_URL", default_value = "http://localhost:8080")]
    pub knowledge_service_url: String,

    /// Pipeline configuration (JSON); omitted fields use defaults
    #[arg(long, env = "PIPELINE_CONFIG")]
    pub pipeline_config: Option<PathBuf>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,
}

impl WorkerConfig {
    /// Database URL from the flag/env, falling back to DATABASE_URL_FILE
    pub fn resolve_database_url(&self) -> Result<String> {
        if let Some(url) = &self.database_url {
            return Ok(url.clone());
        }

        match &self.database_url_file {
            Some(path) => {
                let url = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read DATABASE_URL_FILE: {:?}", path))?
                    .trim()
                    .to_string();
                if url.is_empty() {
                    anyhow::bail!("DATABASE_URL_FILE {:?} is empty", path);
                }
                Ok(url)
            }
            None => anyhow::bail!("DATABASE_URL or DATABASE_URL_FILE must be provided"),
        }
    }

    pub fn load_pipeline_config(&self) -> Result<PipelineConfig> {
        let config = match &self.pipeline_config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };
        config.validate().context("Invalid pipeline configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(extra: &[&str]) -> WorkerConfig {
        let mut args = vec!["nutrigen-worker", "--reference-table", "/ref/table.tsv"];
        args.extend_from_slice(extra);
        WorkerConfig::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_explicit_database_url_wins() {
        let config = parse(&["--database-url", "postgres://db/nutrigen"]);
        assert_eq!(config.resolve_database_url().unwrap(), "postgres://db/nutrigen");
    }

    #[test]
    fn test_database_url_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  postgres://secret/nutrigen  ").unwrap();

        let mut config = parse(&[]);
        config.database_url = None;
        config.database_url_file = Some(file.path().to_path_buf());
        assert_eq!(config.resolve_database_url().unwrap(), "postgres://secret/nutrigen");
    }

    #[test]
    fn test_missing_database_url() {
        let mut config = parse(&[]);
        config.database_url = None;
        config.database_url_file = None;
        assert!(config.resolve_database_url().is_err());
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!(parse(&["--log-format", "json"]).log_format, LogFormat::Json);
        assert!(WorkerConfig::try_parse_from([
            "nutrigen-worker",
            "--reference-table",
            "/ref/table.tsv",
            "--log-format",
            "xml",
        ])
        .is_err());
    }

    #[test]
    fn test_default_pipeline_config() {
        let mut config = parse(&[]);
        config.pipeline_config = None;
        let pipeline = config.load_pipeline_config().unwrap();
        assert_eq!(pipeline.estimator.simulation_count, 2000);
    }
}
