use crate::output;

use clap::Args;
use color_eyre::Result;

use mockflow_service::partition;

/// Show how a command list is split across worker ranks
#[derive(Args, Debug)]
pub struct PartitionArgs {
    /// Number of commands
    pub items: usize,

    /// Number of worker ranks
    pub workers: usize,
}

pub fn execute(args: PartitionArgs) -> Result<()> {
    if args.workers == 0 {
        color_eyre::eyre::bail!("At least one worker is required");
    }

    output::row(&[
        "rank".to_string(),
        "start".to_string(),
        "stop".to_string(),
        "count".to_string(),
    ]);
    for (rank, (start, stop)) in partition(args.items, args.workers).into_iter().enumerate() {
        output::row(&[
            rank.to_string(),
            start.to_string(),
            stop.to_string(),
            (stop - start).to_string(),
        ]);
    }

    Ok(())
}
