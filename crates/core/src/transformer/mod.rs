//! Transform stage: raw METS to staged TEI editions.
//!
//! Every `*_mets.xml` under the raw directory becomes
//! `<staging>/<docId>.xml`. All documents are transformed before anything is
//! written, so one structural failure leaves the staging directory as it was.

mod native;
mod saxon;

pub use native::NativeTransformer;
pub use saxon::SaxonTransformer;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::config::{TransformConfig, TransformEngine};
use crate::fetcher::{parse_image_names, raw_doc_id};
use crate::fixer;
use crate::fsutil;
use crate::pipeline::{Stage, StageContext, StageError, StageKind, StageReport};
use crate::source::SourceError;
use crate::xml::{self, XmlError};

const METS_SUFFIX: &str = "_mets.xml";
const IMAGE_NAME_SUFFIX: &str = "_image_name.xml";

/// Errors that can occur during transformation.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Malformed input: {0}")]
    Xml(#[from] XmlError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Java not found at path: {path}")]
    JavaNotFound { path: PathBuf },

    #[error("No Saxon classpath configured (set SAXON_CP or transform.saxon_classpath)")]
    MissingClasspath,

    #[error("Classpath entry does not exist: {path}")]
    ClasspathEntryMissing { path: PathBuf },

    #[error("Transformation failed: {reason}")]
    Failed {
        reason: String,
        stderr: Option<String>,
    },

    #[error("Transformation timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    #[error("Output is not a TEI document: {reason}")]
    NotTei { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransformError {
    pub fn failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            stderr,
        }
    }

    /// Errors caused by the engine setup rather than by a document.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::JavaNotFound { .. } | Self::MissingClasspath | Self::ClasspathEntryMissing { .. }
        )
    }
}

/// One document to transform.
#[derive(Debug, Clone)]
pub struct TransformJob {
    pub doc_id: String,
    pub mets_path: PathBuf,
    /// Page image names in page order, when an image-name list was fetched.
    pub image_names: Option<Vec<String>>,
}

/// An engine mapping METS to TEI.
#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    /// Checks the engine is usable before any document is touched.
    async fn validate(&self) -> Result<(), TransformError> {
        Ok(())
    }

    /// Returns the serialized TEI document.
    async fn transform(&self, job: &TransformJob) -> Result<String, TransformError>;
}

/// Creates the configured engine.
pub fn create_transformer(config: &TransformConfig) -> Arc<dyn Transformer> {
    match config.engine {
        TransformEngine::Native => Arc::new(NativeTransformer::new()),
        TransformEngine::Saxon => Arc::new(SaxonTransformer::new(config.clone())),
    }
}

/// Image names listed next to a METS file, if any.
async fn read_image_names(mets_path: &Path, doc_id: &str) -> Result<Option<Vec<String>>, StageError> {
    let path = mets_path.with_file_name(format!("{}{}", doc_id, IMAGE_NAME_SUFFIX));
    let text = match fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StageError::Io { path, source: e }),
    };
    let names = parse_image_names(&text).map_err(|e| StageError::structural(&path, e.to_string()))?;
    Ok(Some(names))
}

/// Checks the output is TEI and returns it without empty `type` attributes.
fn finish(output: &str) -> Result<String, TransformError> {
    let mut doc = xml::parse(output)?;
    if !doc.root.is("TEI") {
        return Err(TransformError::NotTei {
            reason: format!("root element is <{}>", doc.root.name),
        });
    }
    fixer::strip_empty_types(&mut doc.root);
    Ok(doc.to_xml())
}

/// The transform stage.
pub struct TransformStage {
    engine: Arc<dyn Transformer>,
}

impl TransformStage {
    pub fn new(engine: Arc<dyn Transformer>) -> Self {
        Self { engine }
    }

    async fn jobs(&self, ctx: &StageContext) -> Result<Vec<TransformJob>, StageError> {
        let dir = ctx.input();
        let mut jobs: BTreeMap<String, TransformJob> = BTreeMap::new();

        for path in fsutil::list_xml_files(dir, true)
            .await
            .map_err(StageError::io(dir))?
        {
            let name = fsutil::file_name(&path);
            if !name.ends_with(METS_SUFFIX) {
                continue;
            }
            let Some(doc_id) = raw_doc_id(&name) else {
                continue;
            };
            if !ctx.includes(doc_id) {
                continue;
            }
            if let Some(existing) = jobs.get(doc_id) {
                return Err(StageError::structural(
                    &path,
                    format!(
                        "document {} also fetched as {}",
                        doc_id,
                        existing.mets_path.display()
                    ),
                ));
            }

            let image_names = read_image_names(&path, doc_id).await?;
            jobs.insert(
                doc_id.to_string(),
                TransformJob {
                    doc_id: doc_id.to_string(),
                    mets_path: path,
                    image_names,
                },
            );
        }
        Ok(jobs.into_values().collect())
    }
}

#[async_trait]
impl Stage for TransformStage {
    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError> {
        let mut report = StageReport::new(StageKind::Transform);
        self.engine
            .validate()
            .await
            .map_err(|e| StageError::Config(e.to_string()))?;

        let jobs = self.jobs(ctx).await?;
        info!(engine = self.engine.name(), documents = jobs.len(), "Transforming");

        let mut outputs = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let tei = match self.engine.transform(job).await {
                Ok(output) => finish(&output),
                Err(e) => Err(e),
            };
            match tei {
                Ok(tei) => {
                    debug!(doc_id = %job.doc_id, "Transformed");
                    outputs.push((ctx.output_dir.join(format!("{}.xml", job.doc_id)), tei));
                }
                Err(e) if e.is_configuration() => return Err(StageError::Config(e.to_string())),
                Err(e) => return Err(StageError::structural(&job.mets_path, e.to_string())),
            }
        }

        for (path, tei) in outputs {
            let changed = fsutil::write_if_changed(&path, tei.as_bytes())
                .await
                .map_err(StageError::io(&path))?;
            report.record(changed);
        }
        Ok(report)
    }
}
