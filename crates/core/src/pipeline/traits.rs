//! Stage trait definition.

use async_trait::async_trait;

use super::{StageContext, StageError, StageKind, StageReport};

/// One step of the pipeline.
///
/// Implementations must be idempotent: running a stage again on its own
/// output reports every item as unchanged.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, StageError>;
}
