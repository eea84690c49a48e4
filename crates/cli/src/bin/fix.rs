//! Apply structural fixes to the editions.

use clap::Parser;
use okar_cli::CommonArgs;
use okar_core::StageKind;

#[derive(Debug, Parser)]
#[command(name = "okar-fix", version, about = "Apply structural fixes to the editions")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    okar_cli::main_with(cli.common, Some(&[StageKind::Fix]), |_| {}).await;
}
