use crate::output;

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use color_eyre::Result;

use mockflow_service::backend::SlurmBackend;
use mockflow_service::config::JobConfig;
use mockflow_service::{Backend, JobId, PipelineConfig};

/// Query the final state of a submitted job
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Scheduler job id
    pub job_id: u64,

    /// Campaign YAML providing the status program and retry settings
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of query attempts before reporting FAILED
    #[arg(long)]
    pub retries: Option<u32>,
}

pub async fn execute(args: StatusArgs) -> Result<()> {
    let job = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?.job,
        None => JobConfig::default(),
    };
    let retries = args.retries.unwrap_or(job.status_retries);

    let backend = SlurmBackend::new()
        .with_programs(&job.submit_program, &job.status_program)
        .with_status_retries(retries, Duration::from_secs(job.status_retry_delay_secs));

    output::status("Querying", &format!("job {}", args.job_id));
    tracing::debug!(
        job = args.job_id,
        retries,
        program = %job.status_program.display(),
        "querying job state"
    );
    let state = backend.status(JobId(args.job_id)).await?;
    tracing::info!(job = args.job_id, state = %state, "job state");
    println!("{}", state);

    if !state.is_success() {
        output::failure(&format!("Job {} is {}", args.job_id, state));
        std::process::exit(1);
    }
    output::success(&format!("Job {} completed", args.job_id));

    Ok(())
}
