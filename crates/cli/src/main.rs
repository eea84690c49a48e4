//! Full pipeline: fetch through fill-headers.

use clap::Parser;
use okar_cli::CommonArgs;

#[derive(Debug, Parser)]
#[command(name = "okar", version, about = "Run the full Transkribus to TEI pipeline")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    okar_cli::main_with(cli.common, None, |_| {}).await;
}
