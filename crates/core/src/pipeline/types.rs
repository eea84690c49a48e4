//! Types shared by all stages.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::config::PathsConfig;

/// The stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    Fetch,
    Normalize,
    Transform,
    Rename,
    Fix,
    InitialPage,
    Headers,
    FillHeaders,
}

impl StageKind {
    pub const ALL: [StageKind; 8] = [
        StageKind::Fetch,
        StageKind::Normalize,
        StageKind::Transform,
        StageKind::Rename,
        StageKind::Fix,
        StageKind::InitialPage,
        StageKind::Headers,
        StageKind::FillHeaders,
    ];

    /// Stable name used in logs, metrics and binaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Fetch => "fetch",
            StageKind::Normalize => "normalize",
            StageKind::Transform => "transform",
            StageKind::Rename => "rename",
            StageKind::Fix => "fix",
            StageKind::InitialPage => "initial-page",
            StageKind::Headers => "headers",
            StageKind::FillHeaders => "fill-headers",
        }
    }

    /// Input and output directory of the stage.
    pub fn directories(&self, paths: &PathsConfig) -> (Option<PathBuf>, PathBuf) {
        match self {
            StageKind::Fetch => (None, paths.mets()),
            StageKind::Normalize => (Some(paths.mets()), paths.mets()),
            StageKind::Transform => (Some(paths.mets()), paths.staging()),
            StageKind::Rename => (Some(paths.staging()), paths.editions()),
            StageKind::Fix | StageKind::InitialPage => (Some(paths.editions()), paths.editions()),
            StageKind::Headers => (Some(paths.editions()), paths.headers()),
            StageKind::FillHeaders => (Some(paths.headers()), paths.headers()),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

/// Everything a stage needs to know about where it runs.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub stage: StageKind,
    /// `None` for stages that read from a remote service.
    pub input_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    /// Restricts the run to these document ids when set.
    pub doc_ids: Option<BTreeSet<String>>,
    pub run_id: Uuid,
}

impl StageContext {
    pub fn new(
        stage: StageKind,
        paths: &PathsConfig,
        doc_ids: Option<BTreeSet<String>>,
        run_id: Uuid,
    ) -> Self {
        let (input_dir, output_dir) = stage.directories(paths);
        Self {
            stage,
            input_dir,
            output_dir,
            doc_ids,
            run_id,
        }
    }

    /// Input directory, falling back to the output for in-place stages.
    pub fn input(&self) -> &PathBuf {
        self.input_dir.as_ref().unwrap_or(&self.output_dir)
    }

    /// Whether a document id passes the filter.
    pub fn includes(&self, doc_id: &str) -> bool {
        self.doc_ids
            .as_ref()
            .map(|ids| ids.contains(doc_id))
            .unwrap_or(true)
    }

    /// Whether a document whose id is unknown passes the filter.
    pub fn includes_unknown(&self) -> bool {
        self.doc_ids.is_none()
    }
}

/// An item a stage did not process, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub id: String,
    pub reason: String,
}

/// Outcome of one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: StageKind,
    pub processed: usize,
    pub unchanged: usize,
    pub skipped: Vec<SkippedItem>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl StageReport {
    pub fn new(stage: StageKind) -> Self {
        Self {
            stage,
            processed: 0,
            unchanged: 0,
            skipped: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Records a skipped item and logs it.
    pub fn skip(&mut self, id: impl Into<String>, reason: impl Into<String>) {
        let item = SkippedItem {
            id: id.into(),
            reason: reason.into(),
        };
        warn!(stage = %self.stage, item = %item.id, "Skipped: {}", item.reason);
        self.skipped.push(item);
    }

    /// Records a written (`true`) or untouched (`false`) item.
    pub fn record(&mut self, changed: bool) {
        if changed {
            self.processed += 1;
        } else {
            self.unchanged += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.processed + self.unchanged + self.skipped.len()
    }
}

/// Outcome of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    pub fn skipped(&self) -> impl Iterator<Item = (StageKind, &SkippedItem)> {
        self.stages
            .iter()
            .flat_map(|report| report.skipped.iter().map(move |item| (report.stage, item)))
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageReport> {
        self.stages.iter().find(|report| report.stage == kind)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
