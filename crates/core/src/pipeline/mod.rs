//! Stage orchestration.
//!
//! A run is an ordered list of [`Stage`]s executed one after another. Each
//! stage receives an explicit [`StageContext`] naming its input and output
//! directories, the optional document filter and the run id. The first stage
//! that fails stops the run; item-level problems are reported as skips.

mod builder;
mod error;
mod runner;
mod traits;
mod types;

pub use builder::{build_pipeline, build_stage, pipeline_stages};
pub use error::{PipelineError, StageError};
pub use runner::Pipeline;
pub use traits::Stage;
pub use types::*;
