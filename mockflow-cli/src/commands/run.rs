use crate::output;

use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use mockflow_service::events::LogLevel;
use mockflow_service::{
    progress_channel, BackendKind, Campaign, OrchestrationEvent, PipelineConfig,
};

/// Build and submit a campaign
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the campaign YAML file
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: PathBuf,

    /// Write every script but submit nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Override the input seeds (e.g. "0-10,15")
    #[arg(long, value_name = "SEEDS")]
    pub seeds: Option<String>,

    /// Override the execution backend (slurm or direct)
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<BackendKind>,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    if !args.config.exists() {
        color_eyre::eyre::bail!("Configuration file not found: {}", args.config.display());
    }

    output::status("Loading", &format!("{}", args.config.display()));
    let mut config = PipelineConfig::from_file(&args.config)?;
    if args.dry_run {
        config.job.dry_run = true;
    }
    if let Some(seeds) = args.seeds {
        config.mock_setup.mock_seeds = Some(seeds);
    }
    if let Some(backend) = args.backend {
        config.job.backend = backend;
    }

    let campaign = match Campaign::plan(config) {
        Ok(campaign) => campaign,
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    };
    output::info(&format!(
        "{} realization(s) on the {} backend",
        campaign.realizations().len(),
        campaign.config().job.backend
    ));

    // Create progress channel and gate
    let (tx, mut rx) = progress_channel();
    let mut gate = campaign.gate().with_progress(tx);

    // Spawn the campaign in background
    let campaign_handle = tokio::spawn(async move { campaign.execute(&mut gate).await });

    // Process events in the foreground
    let mut overall_success = true;
    while let Some(event) = rx.recv().await {
        match &event {
            OrchestrationEvent::CampaignStarted {
                name,
                realizations,
                dry_run,
            } => {
                println!();
                let mode = if *dry_run { ", dry run" } else { "" };
                output::header(&format!(
                    "Campaign '{}' ({} realizations{})",
                    name, realizations, mode
                ));
            }

            OrchestrationEvent::RealizationStarted {
                realization,
                index,
                total,
            } => {
                output::realization_header(realization, *index, *total);
            }

            OrchestrationEvent::TaskSubmitted {
                stage,
                task,
                job_id,
                dry_run,
            } => {
                output::submitted(stage, task, *job_id, *dry_run);
            }

            OrchestrationEvent::TaskSkipped { stage, task } => {
                output::skipped(stage, task);
            }

            OrchestrationEvent::RealizationCompleted {
                realization,
                submitted,
                skipped,
            } => {
                output::dim_success(&format!(
                    "  Realization {} handed off ({} submitted, {} skipped)",
                    realization, submitted, skipped
                ));
            }

            OrchestrationEvent::AggregationStarted {
                variant,
                keys,
                handles,
            } => {
                output::status(
                    "Stacking",
                    &format!("{}: {} pair type(s) after {} job(s)", variant, keys, handles),
                );
            }

            OrchestrationEvent::CampaignCompleted {
                success,
                submitted,
                skipped,
                duration,
                ..
            } => {
                println!();
                overall_success = *success;
                let counts = format!("{} submitted, {} skipped", submitted, skipped);
                if *success {
                    output::success(&format!(
                        "Campaign built in {:.2}s ({})",
                        duration.as_secs_f64(),
                        counts
                    ));
                } else {
                    output::failure(&format!(
                        "Campaign stopped after {:.2}s ({})",
                        duration.as_secs_f64(),
                        counts
                    ));
                }
            }

            OrchestrationEvent::Log { level, message } => match level {
                LogLevel::Error => output::error(message),
                LogLevel::Warning => output::warning(message),
                LogLevel::Info => output::info(message),
                LogLevel::Debug => output::dim(message),
            },
        }
    }

    // Wait for the campaign to finish
    match campaign_handle.await? {
        Ok(summary) => {
            let jobs = summary.final_handle.flatten_to_set();
            if !jobs.is_empty() {
                let ids: Vec<String> = jobs.iter().map(|id| id.to_string()).collect();
                output::dim(&format!("  Final jobs: {}", ids.join(",")));
            }
        }
        Err(e) => {
            output::error(&e.to_string());
            let mut source = e.source();
            while let Some(cause) = source {
                output::dim(&format!("  caused by: {}", cause));
                source = cause.source();
            }
            overall_success = false;
        }
    }

    if !overall_success {
        std::process::exit(1);
    }

    Ok(())
}
