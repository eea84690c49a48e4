//! Sequential, fail-fast pipeline runner.

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{error, info};
use uuid::Uuid;

use crate::config::PathsConfig;
use crate::metrics;

use super::{PipelineError, PipelineReport, Stage, StageContext, StageKind, StageReport};

/// An ordered list of stages over one directory layout.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    paths: PathsConfig,
    doc_ids: Option<BTreeSet<String>>,
    run_id: Uuid,
}

impl Pipeline {
    pub fn new(paths: PathsConfig) -> Self {
        Self {
            stages: Vec::new(),
            paths,
            doc_ids: None,
            run_id: Uuid::new_v4(),
        }
    }

    /// Restricts every stage to the given document ids. An empty set means
    /// no restriction.
    pub fn with_doc_ids(mut self, doc_ids: impl IntoIterator<Item = String>) -> Self {
        let ids: BTreeSet<String> = doc_ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        self.doc_ids = if ids.is_empty() { None } else { Some(ids) };
        self
    }

    pub fn push(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    pub fn with_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.push(stage);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn stages(&self) -> Vec<StageKind> {
        self.stages.iter().map(|stage| stage.kind()).collect()
    }

    /// Context handed to a stage of this pipeline.
    pub fn context(&self, kind: StageKind) -> StageContext {
        StageContext::new(kind, &self.paths, self.doc_ids.clone(), self.run_id)
    }

    /// Runs all stages in order, stopping at the first failure.
    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        let mut reports = Vec::with_capacity(self.stages.len());
        info!(
            run_id = %self.run_id,
            stages = ?self.stages(),
            filter = ?self.doc_ids,
            "Starting pipeline run"
        );

        for stage in &self.stages {
            let report = self.run_stage(stage.as_ref()).await?;
            reports.push(report);
        }

        Ok(PipelineReport {
            run_id: self.run_id,
            stages: reports,
        })
    }

    async fn run_stage(&self, stage: &dyn Stage) -> Result<StageReport, PipelineError> {
        let kind = stage.kind();
        let ctx = self.context(kind);
        let name = kind.as_str();

        info!(stage = name, run_id = %self.run_id, "Stage started");
        let start = Instant::now();
        let result = stage.run(&ctx).await;
        let elapsed = start.elapsed();

        metrics::STAGE_DURATION
            .with_label_values(&[name])
            .observe(elapsed.as_secs_f64());

        match result {
            Ok(mut report) => {
                report.elapsed = elapsed;
                metrics::STAGE_RUNS.with_label_values(&[name, "success"]).inc();
                for (outcome, count) in [
                    ("processed", report.processed),
                    ("unchanged", report.unchanged),
                    ("skipped", report.skipped.len()),
                ] {
                    metrics::STAGE_ITEMS
                        .with_label_values(&[name, outcome])
                        .inc_by(count as u64);
                }
                info!(
                    stage = name,
                    processed = report.processed,
                    unchanged = report.unchanged,
                    skipped = report.skipped.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Stage finished"
                );
                Ok(report)
            }
            Err(source) => {
                metrics::STAGE_RUNS.with_label_values(&[name, "failed"]).inc();
                error!(stage = name, error = %source, "Stage failed");
                Err(PipelineError { stage: kind, source })
            }
        }
    }
}
