//! Builds stages and pipelines from configuration.

use std::sync::Arc;

use tracing::debug;

use crate::auth::resolve_credentials;
use crate::config::Config;
use crate::fetcher::Fetcher;
use crate::fixer::Fixer;
use crate::headers::{HeaderFiller, HeaderGenerator, HeaderTemplate};
use crate::initial_page::InitialPageStage;
use crate::metadata::BaserowClient;
use crate::normalizer::Normalizer;
use crate::platform::TranskribusClient;
use crate::renamer::{CanonicalNamer, Renamer};
use crate::retry::RetryPolicy;
use crate::transformer::{create_transformer, TransformStage};

use super::{Pipeline, Stage, StageError, StageKind};

/// Builds one stage. Credentials of remote services are resolved here, so a
/// missing secret fails before any work starts.
pub async fn build_stage(kind: StageKind, config: &Config) -> Result<Box<dyn Stage>, StageError> {
    let retry = RetryPolicy::from(&config.retry);

    let stage: Box<dyn Stage> = match kind {
        StageKind::Fetch => {
            let platform = &config.platform;
            let credentials = resolve_credentials(
                "transkribus",
                "TR_USER/TR_PW or TR_TOKEN",
                platform.username.as_deref(),
                platform.password.as_deref(),
                platform.token.as_deref(),
            )?;
            let client = TranskribusClient::new(platform, credentials, retry)?;
            Box::new(Fetcher::new(
                Arc::new(client),
                platform.clone(),
                config.retry.on_exhausted,
            )?)
        }
        StageKind::Normalize => Box::new(Normalizer::new()),
        StageKind::Transform => Box::new(TransformStage::new(create_transformer(&config.transform))),
        StageKind::Rename => {
            let namer = CanonicalNamer::new(&config.renamer.title_pattern).map_err(StageError::Config)?;
            Box::new(Renamer::new(namer))
        }
        StageKind::Fix => Box::new(Fixer::new(&config.fixer)?),
        StageKind::InitialPage => Box::new(InitialPageStage::new().with_mets_dir(config.paths.mets())),
        StageKind::Headers => {
            let template = match &config.headers.template {
                Some(path) => HeaderTemplate::load(path).await?,
                None => HeaderTemplate::builtin(&config.headers.placeholder)?,
            };
            Box::new(HeaderGenerator::new(template))
        }
        StageKind::FillHeaders => {
            let metadata = &config.metadata;
            let credentials = resolve_credentials(
                "baserow",
                "BASEROW_USER/BASEROW_PW or BASEROW_TOKEN",
                metadata.username.as_deref(),
                metadata.password.as_deref(),
                metadata.token.as_deref(),
            )?;
            let store = BaserowClient::new(metadata.clone(), credentials, retry)?;
            Box::new(
                HeaderFiller::new(Arc::new(store), config.headers.placeholder.as_str())
                    .with_required(metadata.required_fields.clone(), metadata.on_missing_required)
                    .with_exhaustion_policy(config.retry.on_exhausted),
            )
        }
    };
    debug!(stage = %kind, "Built stage");
    Ok(stage)
}

/// Stages of a full run: all of them, the initial-page stage only when enabled.
pub fn pipeline_stages(config: &Config) -> Vec<StageKind> {
    StageKind::ALL
        .into_iter()
        .filter(|kind| *kind != StageKind::InitialPage || config.initial_page.enabled)
        .collect()
}

/// Builds the full pipeline over the configured layout.
pub async fn build_pipeline(config: &Config) -> Result<Pipeline, StageError> {
    let mut pipeline = Pipeline::new(config.paths.clone());
    for kind in pipeline_stages(config) {
        pipeline.push(build_stage(kind, config).await?);
    }
    Ok(pipeline)
}
