//! Fill header placeholders from Baserow.

use clap::Parser;
use okar_cli::CommonArgs;
use okar_core::StageKind;

#[derive(Debug, Parser)]
#[command(name = "okar-fill-headers", version, about = "Fill header placeholders from Baserow")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    okar_cli::main_with(cli.common, Some(&[StageKind::FillHeaders]), |_| {}).await;
}
