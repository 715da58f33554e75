// Pipeline Configuration
// YAML campaign description with one immutable section per stage

use crate::backend::{BackendKind, DirectBackend, ExecutionBackend, SlurmBackend};
use crate::error::ConfigError;
use crate::stage::{AnalysisVariant, Measurement, PairType, Region, StageKind};
use crate::task::{EnvSetup, ResourceSpec, WallTime};

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Scheduler account, environment and submission behavior shared by all stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub backend: BackendKind,
    pub queue: String,
    pub account: Option<String>,
    pub constraint: Option<String>,
    /// Shell line that activates the software environment
    pub env_command: Option<String>,
    pub umask: Option<String>,
    /// Write scripts but do not submit them
    pub dry_run: bool,
    pub jobid_log: Option<PathBuf>,
    /// JSON-lines record of every submission. Failing to write it fails
    /// the campaign.
    pub ledger: Option<PathBuf>,
    pub submit_program: PathBuf,
    pub status_program: PathBuf,
    pub status_retries: u32,
    pub status_retry_delay_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Slurm,
            queue: "regular".to_string(),
            account: None,
            constraint: Some("cpu".to_string()),
            env_command: None,
            umask: Some("0027".to_string()),
            dry_run: false,
            jobid_log: None,
            ledger: None,
            submit_program: PathBuf::from("sbatch"),
            status_program: PathBuf::from("sacct"),
            status_retries: 10,
            status_retry_delay_secs: 2,
        }
    }
}

impl JobConfig {
    /// Setup lines every task starts with
    pub fn environment(&self) -> Vec<EnvSetup> {
        let mut setup = Vec::new();
        if let Some(mask) = &self.umask {
            setup.push(EnvSetup::Umask(mask.clone()));
        }
        if let Some(command) = &self.env_command {
            setup.push(EnvSetup::Raw(command.clone()));
        }
        setup
    }

    /// Base resource request carrying queue and account
    pub fn resources(&self, wall_time: WallTime) -> ResourceSpec {
        ResourceSpec {
            queue: self.queue.clone(),
            account: self.account.clone(),
            constraint: self.constraint.clone(),
            ..ResourceSpec::default()
        }
        .with_wall_time(wall_time)
    }

    /// Instantiate the configured backend
    pub fn backend(&self) -> ExecutionBackend {
        match self.backend {
            BackendKind::Slurm => ExecutionBackend::Slurm(
                SlurmBackend::new()
                    .with_programs(&self.submit_program, &self.status_program)
                    .with_status_retries(
                        self.status_retries,
                        Duration::from_secs(self.status_retry_delay_secs),
                    ),
            ),
            BackendKind::Direct => ExecutionBackend::Direct(DirectBackend::new()),
        }
    }
}

/// Seeds and directory roots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockSetup {
    /// Input (skewer) seeds, e.g. "0-10,15"
    pub mock_seeds: Option<String>,
    pub catalog_seeds: Option<String>,
    pub job_seeds: Option<String>,
    /// Root holding one skewer directory per input seed
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub prefix: String,
    pub analysis_name: String,
    pub stack_name: String,
}

impl Default for MockSetup {
    fn default() -> Self {
        Self {
            mock_seeds: None,
            catalog_seeds: None,
            job_seeds: None,
            input_root: PathBuf::from("skewers"),
            output_root: PathBuf::from("mocks"),
            prefix: "mock".to_string(),
            analysis_name: "baseline".to_string(),
            stack_name: "stack".to_string(),
        }
    }
}

/// Which stages run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub stages: Vec<StageKind>,
    /// Analysis passes run over every realization, each in its own tree
    pub variants: Vec<AnalysisVariant>,
    /// Combine realizations once all of them are submitted
    pub stack: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            stages: vec![
                StageKind::Synthesis,
                StageKind::Catalog,
                StageKind::Deltas,
                StageKind::Correlations,
                StageKind::Export,
            ],
            variants: vec![AnalysisVariant::FittedContinuum],
            stack: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub input_catalog_program: String,
    pub program: String,
    pub nodes: u32,
    pub nproc: u32,
    pub wall_time: WallTime,
    /// Insert damped absorbers into the spectra
    pub dla: bool,
    pub bal: bool,
    pub extra_args: Vec<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            input_catalog_program: "make_qso_catalog".to_string(),
            program: "quickquasars".to_string(),
            nodes: 8,
            nproc: 32,
            wall_time: WallTime::from_seconds(2 * 3600),
            dla: true,
            bal: false,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub program: String,
    pub contaminant_program: String,
    /// Also build the absorber catalog used for masking
    pub contaminants: bool,
    pub wall_time: WallTime,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            program: "desi_zcatalog".to_string(),
            contaminant_program: "make_dla_catalog".to_string(),
            contaminants: true,
            wall_time: WallTime::from_seconds(30 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedshiftErrorConfig {
    pub program: String,
    /// Velocity dispersion in km/s
    pub sigma: f64,
    pub distribution: String,
    pub wall_time: WallTime,
}

impl Default for RedshiftErrorConfig {
    fn default() -> Self {
        Self {
            program: "add_zerr".to_string(),
            sigma: 400.0,
            distribution: "gauss".to_string(),
            wall_time: WallTime::from_seconds(12 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltasConfig {
    pub program: String,
    /// Converter used by the raw variant
    pub raw_program: String,
    pub regions: Vec<Region>,
    pub mask_contaminants: bool,
    /// Pixel width in Angstrom for raw deltas
    pub delta_lambda: f64,
    pub max_num_spec: Option<u32>,
    pub nproc: u32,
    pub wall_time: WallTime,
}

impl Default for DeltasConfig {
    fn default() -> Self {
        Self {
            program: "picca_delta_extraction.py".to_string(),
            raw_program: "picca_convert_transmission.py".to_string(),
            regions: vec![Region::Lya],
            mask_contaminants: false,
            delta_lambda: 0.8,
            max_num_spec: None,
            nproc: 128,
            wall_time: WallTime::from_seconds(30 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub pairs: Vec<PairType>,
    pub correlation: bool,
    pub distortion: bool,
    pub metals: bool,
    pub rp_min: f64,
    pub rp_max: f64,
    pub rt_max: f64,
    pub num_bins_rp: u32,
    pub num_bins_rt: u32,
    pub fid_om: f64,
    pub dmat_rejection: f64,
    pub no_project: bool,
    pub nproc: u32,
    /// Per-task wall-time overrides keyed by task name, e.g. `cf_lya_lya`
    pub wall_times: BTreeMap<String, WallTime>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            pairs: vec![PairType::LyaLya, PairType::LyaQso],
            correlation: true,
            distortion: false,
            metals: false,
            rp_min: 0.0,
            rp_max: 200.0,
            rt_max: 200.0,
            num_bins_rp: 50,
            num_bins_rt: 50,
            fid_om: 0.315,
            dmat_rejection: 0.99,
            no_project: false,
            nproc: 128,
            wall_times: BTreeMap::new(),
        }
    }
}

impl CorrelationConfig {
    /// Enabled measurements in submission order
    pub fn measurements(&self) -> Vec<Measurement> {
        let mut measurements = Vec::new();
        if self.correlation {
            measurements.push(Measurement::Correlation);
        }
        if self.distortion {
            measurements.push(Measurement::Distortion);
        }
        if self.metals {
            measurements.push(Measurement::MetalDistortion);
        }
        measurements
    }

    pub fn wall_time(&self, pair: PairType, measurement: Measurement) -> WallTime {
        match self.wall_times.get(&measurement.task_name(pair)) {
            Some(wall_time) => *wall_time,
            None => WallTime::from_hours(measurement.default_hours(pair))
                .unwrap_or(WallTime::from_seconds(3600)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub program: String,
    /// Defer every realization's export into one multi-worker job
    pub partitioned: bool,
    pub workers: usize,
    pub max_tasks_per_node: usize,
    /// Executable that provides the `worker` subcommand
    pub worker_program: String,
    pub wall_time: WallTime,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            program: "picca_export.py".to_string(),
            partitioned: false,
            workers: 64,
            max_tasks_per_node: 64,
            worker_program: "mockflow".to_string(),
            wall_time: WallTime::from_seconds(12 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CovarianceConfig {
    pub program: String,
    pub smooth_program: String,
    pub smooth: bool,
    pub wall_time: WallTime,
}

impl Default for CovarianceConfig {
    fn default() -> Self {
        Self {
            program: "write_full_covariance".to_string(),
            smooth_program: "write_smooth_covariance".to_string(),
            smooth: true,
            wall_time: WallTime::from_seconds(30 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub program: String,
    /// Fitter configuration template passed through unchanged
    pub template: Option<PathBuf>,
    pub nproc: u32,
    pub wall_time: WallTime,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            program: "run_vega_fitter".to_string(),
            template: None,
            nproc: 32,
            wall_time: WallTime::from_seconds(30 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub program: String,
    pub covariance_program: String,
    pub wall_time: WallTime,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            program: "stack_export".to_string(),
            covariance_program: "stack_full_covariance".to_string(),
            wall_time: WallTime::from_seconds(30 * 60),
        }
    }
}

/// Complete campaign description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub job: JobConfig,
    pub mock_setup: MockSetup,
    pub control: ControlConfig,
    pub synthesis: SynthesisConfig,
    pub catalog: CatalogConfig,
    pub redshift_errors: RedshiftErrorConfig,
    pub deltas: DeltasConfig,
    pub correlations: CorrelationConfig,
    pub export: ExportConfig,
    pub covariance: CovarianceConfig,
    pub fit: FitConfig,
    pub stack: StackConfig,
}

impl PipelineConfig {
    /// Load and path-expand a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let mut config: PipelineConfig = serde_yaml::from_str(text)?;
        config.expand_paths();
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    fn expand_paths(&mut self) {
        let setup = &mut self.mock_setup;
        setup.input_root = expand_home(&setup.input_root);
        setup.output_root = expand_home(&setup.output_root);
        for path in [
            &mut self.job.jobid_log,
            &mut self.job.ledger,
            &mut self.fit.template,
        ]
        .into_iter()
        .flatten()
        {
            *path = expand_home(path);
        }
    }

    pub fn is_enabled(&self, stage: StageKind) -> bool {
        self.control.stages.contains(&stage)
    }

    /// Cross-section checks that must pass before anything is built
    pub fn validate(&self) -> Result<(), ConfigError> {
        const PREREQUISITES: [(StageKind, StageKind); 3] = [
            (StageKind::Export, StageKind::Correlations),
            (StageKind::Covariance, StageKind::Correlations),
            (StageKind::Fit, StageKind::Export),
        ];

        for stage in &self.control.stages {
            if stage.is_aggregate() {
                return Err(ConfigError::Invalid(format!(
                    "'{}' is built from the stack settings and cannot be listed as a stage",
                    stage
                )));
            }
        }

        for (stage, requires) in PREREQUISITES {
            if self.is_enabled(stage) && !self.is_enabled(requires) {
                return Err(ConfigError::MissingPrerequisite {
                    stage: stage.to_string(),
                    requires: requires.to_string(),
                });
            }
        }

        let variants = &self.control.variants;
        if variants.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one analysis variant is required".to_string(),
            ));
        }
        for (index, variant) in variants.iter().enumerate() {
            if variants[..index].contains(variant) {
                return Err(ConfigError::Invalid(format!(
                    "analysis variant '{}' listed twice",
                    variant
                )));
            }
        }

        if self.is_enabled(StageKind::Deltas) && self.deltas.regions.is_empty() {
            return Err(ConfigError::Invalid(
                "deltas stage enabled without any region".to_string(),
            ));
        }

        if self.deltas.mask_contaminants && !self.catalog.contaminants {
            return Err(ConfigError::Invalid(
                "masking contaminants requires the contaminant catalog".to_string(),
            ));
        }

        if self.is_enabled(StageKind::Correlations) {
            let correlations = &self.correlations;
            if correlations.pairs.is_empty() {
                return Err(ConfigError::Invalid(
                    "correlations stage enabled without any pair type".to_string(),
                ));
            }
            if correlations.measurements().is_empty() {
                return Err(ConfigError::Invalid(
                    "correlations stage enabled without any measurement".to_string(),
                ));
            }
            for pair in &correlations.pairs {
                for region in pair.regions() {
                    if !self.deltas.regions.contains(region) {
                        return Err(ConfigError::Invalid(format!(
                            "pair '{}' needs deltas for region '{}'",
                            pair,
                            region.name()
                        )));
                    }
                }
            }
            if self.is_enabled(StageKind::Export) && !correlations.correlation {
                return Err(ConfigError::Invalid(
                    "export needs the correlation measurement".to_string(),
                ));
            }
        }

        if self.export.workers == 0 || self.export.max_tasks_per_node == 0 {
            return Err(ConfigError::Invalid(
                "export workers and tasks per node must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
job:
  backend: slurm
  queue: debug
  account: desi
  env_command: source /opt/lya/env.sh
  dry_run: true
mock_setup:
  mock_seeds: "0-2"
  catalog_seeds: "10-12"
  output_root: /scratch/mocks
control:
  stages: [synthesis, catalog, redshift_errors, deltas, correlations, export, covariance, fit]
deltas:
  regions: [lya, lyb]
correlations:
  pairs: [lya_lya, lya_lyb, lyb_qso]
  distortion: true
  wall_times:
    cf_lya_lya: 3.0
    xdmat_lyb_qso: "00:20:00"
"#;

    #[test]
    fn test_parse_sample() {
        let config = PipelineConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.job.queue, "debug");
        assert!(config.job.dry_run);
        assert_eq!(config.mock_setup.output_root, PathBuf::from("/scratch/mocks"));
        assert_eq!(config.control.stages.len(), 8);
        assert_eq!(config.deltas.regions, vec![Region::Lya, Region::Lyb]);
        // untouched sections keep their defaults
        assert_eq!(config.synthesis.program, "quickquasars");
        config.validate().unwrap();
    }

    #[test]
    fn test_wall_time_overrides() {
        let config = PipelineConfig::from_yaml(SAMPLE).unwrap();
        let corr = &config.correlations;
        assert_eq!(
            corr.wall_time(PairType::LyaLya, Measurement::Correlation).to_string(),
            "03:00:00"
        );
        assert_eq!(
            corr.wall_time(PairType::LybQso, Measurement::Distortion).to_string(),
            "00:20:00"
        );
        assert_eq!(
            corr.wall_time(PairType::LyaLyb, Measurement::Distortion).to_string(),
            "01:00:00"
        );
    }

    #[test]
    fn test_unknown_stage_rejected_at_load() {
        let err = PipelineConfig::from_yaml("control:\n  stages: [synthesis, stacking]\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown stage: stacking"));
    }

    #[test]
    fn test_missing_prerequisite() {
        let mut config = PipelineConfig::default();
        config.control.stages = vec![StageKind::Deltas, StageKind::Fit];
        match config.validate() {
            Err(ConfigError::MissingPrerequisite { stage, requires }) => {
                assert_eq!(stage, "fit");
                assert_eq!(requires, "export");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_pair_needs_its_regions() {
        let mut config = PipelineConfig::default();
        config.correlations.pairs = vec![PairType::LybQso];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_variants_must_be_distinct() {
        let config = PipelineConfig::from_yaml(
            "control:\n  variants: [raw, fitted_continuum]\n",
        )
        .unwrap();
        assert_eq!(
            config.control.variants,
            vec![AnalysisVariant::Raw, AnalysisVariant::FittedContinuum]
        );
        config.validate().unwrap();

        let mut config = PipelineConfig::default();
        config.control.variants = vec![AnalysisVariant::Raw, AnalysisVariant::Raw];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.control.variants.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_home_expansion() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/mocks")), home.join("mocks"));
        }
        assert_eq!(expand_home(Path::new("/abs/path")), PathBuf::from("/abs/path"));
    }

    #[test]
    fn test_yaml_round_trip_of_defaults() {
        let config = PipelineConfig::default();
        let text = config.to_yaml().unwrap();
        assert_eq!(PipelineConfig::from_yaml(&text).unwrap(), config);
    }
}
