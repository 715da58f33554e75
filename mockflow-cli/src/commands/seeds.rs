use crate::output;

use clap::Args;
use color_eyre::Result;

use mockflow_service::realization_ids;

/// Expand seed specifications into realization ids
#[derive(Args, Debug)]
pub struct SeedsArgs {
    /// Input seeds, e.g. "0-10,15" (ranges exclude their end)
    pub seeds: String,

    /// Catalog seeds, same length as the input seeds
    #[arg(long, value_name = "SEEDS")]
    pub catalog: Option<String>,

    /// Job seeds, same length as the input seeds
    #[arg(long, value_name = "SEEDS")]
    pub job: Option<String>,
}

pub fn execute(args: SeedsArgs) -> Result<()> {
    let ids = match realization_ids(
        Some(&args.seeds),
        args.catalog.as_deref(),
        args.job.as_deref(),
    ) {
        Ok(ids) => ids,
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    };

    for id in &ids {
        println!("{}", id);
    }
    output::dim(&format!("{} realization(s)", ids.len()));

    Ok(())
}
