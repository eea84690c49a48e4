//! Transform raw METS into staged TEI editions.

use clap::{Parser, ValueEnum};
use okar_cli::CommonArgs;
use okar_core::{StageKind, TransformEngine};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EngineArg {
    Native,
    Saxon,
}

#[derive(Debug, Parser)]
#[command(name = "okar-transform", version, about = "Transform raw METS into staged TEI editions")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Transformation engine (overrides transform.engine)
    #[arg(long, value_enum)]
    engine: Option<EngineArg>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let engine = cli.engine.map(|engine| match engine {
        EngineArg::Native => TransformEngine::Native,
        EngineArg::Saxon => TransformEngine::Saxon,
    });
    okar_cli::main_with(cli.common, Some(&[StageKind::Transform]), |config| {
        if let Some(engine) = engine {
            config.transform.engine = engine;
        }
    })
    .await;
}
