//! Download METS exports from Transkribus.

use clap::Parser;
use okar_cli::CommonArgs;
use okar_core::config::Selection;
use okar_core::StageKind;

#[derive(Debug, Parser)]
#[command(name = "okar-fetch", version, about = "Download METS exports from Transkribus")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Fetch every document of the collections, ignoring the title filter
    #[arg(long, conflicts_with = "gt")]
    all: bool,

    /// Fetch only documents with ground truth pages
    #[arg(long)]
    gt: bool,
}

impl Cli {
    fn selection(&self) -> Option<Selection> {
        if self.all {
            Some(Selection::All)
        } else if self.gt {
            Some(Selection::GroundTruth)
        } else {
            None
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let selection = cli.selection();
    okar_cli::main_with(cli.common, Some(&[StageKind::Fetch]), |config| {
        if let Some(selection) = selection {
            config.platform.selection = selection;
        }
    })
    .await;
}
