//! `mirrorpack gather` command.

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::Args;
use mirrorpack_archive::StoreBlobGatherer;

#[derive(Args, Debug)]
pub struct GatherArgs {
    /// Root of the cache registry storage
    #[arg(long)]
    pub cache: PathBuf,

    /// Image references as stored in the cache registry
    #[arg(required = true)]
    pub images: Vec<String>,
}

pub async fn execute(args: GatherArgs) -> Result<(), Box<dyn std::error::Error>> {
    let span = tracing::info_span!("gather", cache = %args.cache.display());
    let gatherer = StoreBlobGatherer::new(&args.cache, span);

    let mut digests = BTreeSet::new();
    for image in &args.images {
        digests.extend(gatherer.gather(image)?.digests);
    }

    for digest in digests {
        println!("{digest}");
    }
    Ok(())
}
