use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use mockflow_service::stage::StageKind;
use mockflow_service::{Campaign, PipelineConfig};

/// Validate a campaign YAML file
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the campaign YAML file
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: PathBuf,

    /// Also list every realization id
    #[arg(long)]
    pub list: bool,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let config_path = &args.config;

    if !config_path.exists() {
        color_eyre::eyre::bail!("Configuration file not found: {}", config_path.display());
    }

    // Step 1: Parse YAML
    output::status("Validating", &format!("{}", config_path.display()));

    let config = match PipelineConfig::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    };

    output::check("YAML syntax valid");

    // Step 2: Stage prerequisites and seeds
    let campaign = match Campaign::plan(config) {
        Ok(campaign) => campaign,
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    };

    let config = campaign.config();
    let stages: Vec<&str> = StageKind::PIPELINE
        .iter()
        .filter(|stage| config.is_enabled(**stage))
        .map(|stage| stage.as_str())
        .collect();
    output::check(&format!("Stages: {}", stages.join(" -> ")));
    let variants: Vec<&str> = config.control.variants.iter().map(|v| v.name()).collect();
    output::check(&format!("Analysis variants: {}", variants.join(", ")));
    output::check(&format!(
        "{} realization(s), stacking {}",
        campaign.realizations().len(),
        if campaign.stacks() { "enabled" } else { "disabled" }
    ));
    if config.export.partitioned {
        output::info(&format!(
            "Exports run as one partitioned job with up to {} workers",
            config.export.workers
        ));
    }

    if args.list {
        for id in campaign.realizations() {
            println!("  {}", id);
        }
    }

    println!();
    output::success("Campaign is valid");

    Ok(())
}
