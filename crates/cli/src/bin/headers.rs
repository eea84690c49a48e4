//! Create header documents for new editions.

use clap::Parser;
use okar_cli::CommonArgs;
use okar_core::StageKind;

#[derive(Debug, Parser)]
#[command(name = "okar-headers", version, about = "Create header documents for new editions")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    okar_cli::main_with(cli.common, Some(&[StageKind::Headers]), |_| {}).await;
}
