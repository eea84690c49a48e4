//! Repair raw METS files in place.

use clap::Parser;
use okar_cli::CommonArgs;
use okar_core::StageKind;

#[derive(Debug, Parser)]
#[command(name = "okar-normalize", version, about = "Repair raw METS files in place")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    okar_cli::main_with(cli.common, Some(&[StageKind::Normalize]), |_| {}).await;
}
