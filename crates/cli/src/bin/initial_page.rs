//! Insert the missing leading page image into editions.

use clap::Parser;
use okar_cli::CommonArgs;
use okar_core::StageKind;

#[derive(Debug, Parser)]
#[command(name = "okar-initial-page", version, about = "Insert the missing leading page image into editions")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    okar_cli::main_with(cli.common, Some(&[StageKind::InitialPage]), |_| {}).await;
}
