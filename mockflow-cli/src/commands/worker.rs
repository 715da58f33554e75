use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use mockflow_service::{run_pool, run_rank};

/// Run a rank's share of a partitioned command list
#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Directory receiving one log per command index
    #[arg(long, value_name = "DIR")]
    pub log_dir: PathBuf,

    /// This worker's rank
    #[arg(long, env = "SLURM_PROCID")]
    pub rank: Option<usize>,

    /// Total number of ranks
    #[arg(long, env = "SLURM_NTASKS")]
    pub workers: Option<usize>,

    /// Shell commands, after `--`
    #[arg(last = true, required = true)]
    pub commands: Vec<String>,
}

pub async fn execute(args: WorkerArgs) -> Result<()> {
    let total = args.commands.len();
    tracing::debug!(
        commands = total,
        rank = ?args.rank,
        workers = ?args.workers,
        log_dir = %args.log_dir.display(),
        "worker starting"
    );

    let result = match (args.rank, args.workers) {
        (Some(rank), Some(workers)) => {
            output::status("Worker", &format!("rank {} of {}", rank, workers));
            run_rank(&args.commands, rank, workers, &args.log_dir).await
        }
        (None, workers) => {
            let workers = workers.unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
                    .min(total)
            });
            output::status("Pool", &format!("{} command(s) on {} worker(s)", total, workers));
            run_pool(args.commands, workers, &args.log_dir).await
        }
        (Some(_), None) => {
            color_eyre::eyre::bail!("--rank needs --workers (or SLURM_NTASKS)");
        }
    };

    match result {
        Ok(count) => {
            tracing::info!(completed = count, "worker finished");
            output::success(&format!("{} command(s) completed", count));
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "worker failed");
            output::error(&e.to_string());
            std::process::exit(1);
        }
    }
}
