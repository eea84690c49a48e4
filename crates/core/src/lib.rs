//! Transkribus to TEI edition pipeline.
//!
//! Raw METS exports are fetched from Transkribus, normalized, transformed to
//! TEI, renamed to canonical file names and structurally fixed. Header
//! documents are then generated from a template and filled from a Baserow
//! table. Each step is a [`Stage`]; [`build_pipeline`] wires them up from a
//! [`Config`].

pub mod auth;
pub mod config;
pub mod fetcher;
pub mod fixer;
pub mod fsutil;
pub mod headers;
pub mod initial_page;
pub mod metadata;
pub mod metrics;
pub mod normalizer;
pub mod pipeline;
pub mod platform;
pub mod renamer;
pub mod retry;
pub mod source;
pub mod testing;
pub mod transformer;
pub mod xml;

pub use auth::{resolve_credentials, AuthError, Credentials};
pub use config::{
    load_config, load_config_from_str, load_config_or_default, validate_config, Config,
    ConfigError, LogFormat, SanitizedConfig, TransformEngine,
};
pub use metadata::{BaserowClient, MetadataError, MetadataRecord, MetadataStore};
pub use pipeline::{
    build_pipeline, build_stage, pipeline_stages, Pipeline, PipelineError, PipelineReport, Stage,
    StageContext, StageError, StageKind, StageReport,
};
pub use platform::{DocumentPlatform, PlatformError, TranskribusClient};
pub use retry::{ExhaustionPolicy, RetryConfig, RetryPolicy};
