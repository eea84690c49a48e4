//! Shared plumbing of the `okar` binaries: flags, logging, config and the
//! run/exit contract.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use okar_core::config::LoggingConfig;
use okar_core::{
    build_stage, load_config, load_config_or_default, metrics, pipeline_stages, validate_config,
    Config, LogFormat, Pipeline, PipelineReport, SanitizedConfig, StageKind,
};

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG: &str = "okar.toml";

/// Legacy name of the document filter variable.
const LEGACY_DOC_IDS: &str = "TRANSKRIBUS_DOC_IDS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

/// Flags every binary accepts.
#[derive(Debug, Clone, Default, Args)]
pub struct CommonArgs {
    /// Configuration file (defaults to okar.toml when present)
    #[arg(long, env = "OKAR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Restrict the run to these document ids
    #[arg(long, env = "OKAR_DOC_IDS", value_delimiter = ',')]
    pub doc_ids: Vec<String>,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormatArg>,
}

impl CommonArgs {
    /// Document ids from the flag, falling back to the legacy variable.
    pub fn doc_ids(&self) -> Vec<String> {
        if !self.doc_ids.is_empty() {
            return self.doc_ids.clone();
        }
        std::env::var(LEGACY_DOC_IDS)
            .map(|value| parse_ids(&value))
            .unwrap_or_default()
    }

    /// Loads the configuration. An explicit path must exist.
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("Failed to load config from {:?}", path)),
            None => load_config_or_default(&PathBuf::from(DEFAULT_CONFIG))
                .context("Failed to load configuration"),
        }
    }
}

/// Splits a comma separated id list, dropping blanks.
pub fn parse_ids(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect()
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured filter.
pub fn init_logging(config: &LoggingConfig, format: Option<LogFormatArg>) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let format = format.map(LogFormat::from).unwrap_or(config.format);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    if result.is_err() {
        warn!("Logging was already initialized");
    }
}

/// Runs `stages` (or the full pipeline when `None`) with the loaded config.
pub async fn execute(
    common: &CommonArgs,
    config: Config,
    stages: Option<&[StageKind]>,
) -> Result<PipelineReport> {
    validate_config(&config).context("Configuration validation failed")?;
    let sanitized = serde_json::to_string(&SanitizedConfig::from(&config)).unwrap_or_default();
    info!(config = %sanitized, "Configuration loaded");

    let kinds = match stages {
        Some(kinds) => kinds.to_vec(),
        None => pipeline_stages(&config),
    };
    let mut pipeline = Pipeline::new(config.paths.clone()).with_doc_ids(common.doc_ids());
    for kind in kinds {
        let stage = build_stage(kind, &config)
            .await
            .with_context(|| format!("Failed to set up stage '{}'", kind))?;
        pipeline.push(stage);
    }

    let result = pipeline.run().await;

    if let Some(path) = &config.metrics.textfile {
        if let Err(e) = metrics::export_textfile(path).await {
            warn!(path = %path.display(), "Failed to export metrics: {}", e);
        }
    }

    let report = result?;
    summarize(&report);
    Ok(report)
}

fn summarize(report: &PipelineReport) {
    let skipped: Vec<_> = report.skipped().collect();
    for (stage, item) in &skipped {
        warn!(stage = %stage, item = %item.id, "Skipped: {}", item.reason);
    }
    info!(
        run_id = %report.run_id,
        stages = report.stages.len(),
        skipped = skipped.len(),
        "Run finished"
    );
}

/// Entry point shared by all binaries: loads config, lets `adjust` apply
/// binary specific flags, runs and exits with 0 or 1.
pub async fn main_with(
    common: CommonArgs,
    stages: Option<&[StageKind]>,
    adjust: impl FnOnce(&mut Config),
) {
    let mut config = match common.load_config() {
        Ok(config) => config,
        Err(e) => {
            init_logging(&LoggingConfig::default(), common.log_format);
            error!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    };
    adjust(&mut config);
    init_logging(&config.logging, common.log_format);

    if let Err(e) = execute(&common, config, stages).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}
