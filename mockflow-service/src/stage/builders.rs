// Stage Builders
// Pure task constructors plus the gate-driven stage functions that use them

use super::{AnalysisVariant, Branch, Measurement, PairType, StageKind};
use crate::config::{
    CatalogConfig, CorrelationConfig, CovarianceConfig, DeltasConfig, ExportConfig, FitConfig,
    JobConfig, RedshiftErrorConfig, StackConfig, SynthesisConfig,
};
use crate::error::{ConfigError, ServiceResult};
use crate::gate::IdempotentGate;
use crate::realization::{Namespace, RealizationId};
use crate::task::{Handle, Task, TaskBuilder, WallTime};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// Redshift range every correlation is measured over
const Z_MIN: u32 = 0;
const Z_MAX: u32 = 10;

const METAL_ABSORBERS: [&str; 4] = ["SiII(1260)", "SiIII(1207)", "SiII(1193)", "SiII(1190)"];

/// Common skeleton: stage label, script and log locations, environment and
/// the job-level resource defaults
fn base(
    name: &str,
    command: &str,
    stage: StageKind,
    ns: &Namespace,
    job: &JobConfig,
    wall_time: WallTime,
) -> TaskBuilder {
    Task::builder(name, command)
        .stage(stage.as_str())
        .script_path(ns.script(name))
        .log_dir(ns.logs_dir())
        .environment(job.environment())
        .resources(job.resources(wall_time))
}

/// Exported file name next to a measured correlation
pub fn exported_path(correlation: &Path) -> PathBuf {
    let name = correlation
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let exported = if let Some(stem) = name.strip_suffix(".fits.gz") {
        format!("{}-exp.fits.gz", stem)
    } else if let Some(stem) = name.strip_suffix(".fits") {
        format!("{}-exp.fits", stem)
    } else {
        format!("{}-exp", name)
    };
    correlation.with_file_name(exported)
}

fn file_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.split('.').next().unwrap_or_default().to_string()
}

// -- synthesis --------------------------------------------------------------

pub fn input_catalog_task(
    ns: &Namespace,
    cfg: &SynthesisConfig,
    job: &JobConfig,
    id: &RealizationId,
    upstream: Handle,
) -> Result<Task, ConfigError> {
    base(
        "input_catalog",
        &cfg.input_catalog_program,
        StageKind::Synthesis,
        ns,
        job,
        WallTime::from_seconds(30 * 60),
    )
    .path_option("--input-dir", ns.skewers_dir())
    .path_option("--out", &ns.input_catalog())
    .option("--seed", id.catalog)
    .output(ns.input_catalog())
    .upstream(upstream)
    .build()
}

pub fn spectra_task(
    ns: &Namespace,
    cfg: &SynthesisConfig,
    job: &JobConfig,
    id: &RealizationId,
    upstream: Handle,
) -> Result<Task, ConfigError> {
    let resources = job
        .resources(cfg.wall_time)
        .with_nodes(cfg.nodes)
        .with_threads(cfg.nproc)
        .with_launcher_option(format!("-N {}", cfg.nodes))
        .with_launcher_option(format!("-n {}", cfg.nodes))
        .with_launcher_option(format!("-c {}", cfg.nproc));

    let mut builder = base("spectra", &cfg.program, StageKind::Synthesis, ns, job, cfg.wall_time)
        .resources(resources)
        .path_option("--infile-dir", ns.skewers_dir())
        .path_option("--outdir", &ns.spectra_dir())
        .path_option("--from-catalog", &ns.input_catalog())
        .option("--seed", id.job)
        .option("--nproc", cfg.nproc);
    if cfg.dla {
        builder = builder.option("--dla", "quickquasars");
    }
    builder
        .flag_if(cfg.bal, "--bal")
        .extra_args(&cfg.extra_args)
        .output(ns.spectra_dir().join("spectra-16"))
        .upstream(upstream)
        .build()
}

/// Input catalog, then spectral synthesis depending on it
pub async fn synthesis(
    gate: &mut IdempotentGate,
    ns: &Namespace,
    cfg: &SynthesisConfig,
    job: &JobConfig,
    id: &RealizationId,
    upstream: Handle,
) -> ServiceResult<Handle> {
    let catalog = input_catalog_task(ns, cfg, job, id, upstream)?;
    let catalog_handle = gate.maybe_run(&catalog).await?;

    let spectra = spectra_task(ns, cfg, job, id, catalog_handle)?;
    gate.maybe_run(&spectra).await
}

// -- catalog ----------------------------------------------------------------

/// Redshift catalog and, when enabled, the contaminant catalog, built in
/// parallel from the same spectra
pub fn catalog_tasks(
    ns: &Namespace,
    cfg: &CatalogConfig,
    job: &JobConfig,
    upstream: Handle,
) -> Result<Vec<Task>, ConfigError> {
    let mut tasks = vec![base("zcat", &cfg.program, StageKind::Catalog, ns, job, cfg.wall_time)
        .path_option("-i", &ns.spectra_dir())
        .path_option("-o", &ns.zcat())
        .flag("--minimal")
        .option("--prefix", "zbest")
        .output(ns.zcat())
        .upstream(upstream.clone())
        .build()?];

    if cfg.contaminants {
        tasks.push(
            base(
                "dla_catalog",
                &cfg.contaminant_program,
                StageKind::Catalog,
                ns,
                job,
                cfg.wall_time,
            )
            .path_option("--input-dir", ns.skewers_dir())
            .path_option("--out", &ns.contaminant_catalog())
            .output(ns.contaminant_catalog())
            .upstream(upstream)
            .build()?,
        );
    }
    Ok(tasks)
}

pub async fn catalog(
    gate: &mut IdempotentGate,
    ns: &Namespace,
    cfg: &CatalogConfig,
    job: &JobConfig,
    upstream: Handle,
) -> ServiceResult<Vec<Handle>> {
    let mut handles = Vec::new();
    for task in catalog_tasks(ns, cfg, job, upstream)? {
        handles.push(gate.maybe_run(&task).await?);
    }
    Ok(handles)
}

// -- redshift errors --------------------------------------------------------

pub fn redshift_error_task(
    ns: &Namespace,
    cfg: &RedshiftErrorConfig,
    job: &JobConfig,
    id: &RealizationId,
    upstream: Handle,
) -> Result<Task, ConfigError> {
    base(
        "zerr",
        &cfg.program,
        StageKind::RedshiftErrors,
        ns,
        job,
        cfg.wall_time,
    )
    .path_option("-i", &ns.zcat())
    .path_option("-o", &ns.zcat_with_errors())
    .option("--sigma", cfg.sigma)
    .option("--distribution", &cfg.distribution)
    .option("--seed", id.job)
    .output(ns.zcat_with_errors())
    .upstream(upstream)
    .build()
}

pub async fn redshift_errors(
    gate: &mut IdempotentGate,
    ns: &Namespace,
    cfg: &RedshiftErrorConfig,
    job: &JobConfig,
    id: &RealizationId,
    upstream: Handle,
) -> ServiceResult<Handle> {
    let task = redshift_error_task(ns, cfg, job, id, upstream)?;
    gate.maybe_run(&task).await
}

// -- deltas -----------------------------------------------------------------

/// One extraction per enabled region. Raw deltas are converted from the
/// input transmission; the other variants extract from the spectra.
pub fn delta_tasks(
    ns: &Namespace,
    cfg: &DeltasConfig,
    job: &JobConfig,
    variant: AnalysisVariant,
    catalog: &Path,
    upstream: Handle,
) -> Result<Vec<Task>, ConfigError> {
    cfg.regions
        .iter()
        .map(|region| {
            let name = match variant {
                AnalysisVariant::FittedContinuum => format!("deltas_{}", region.name()),
                AnalysisVariant::TrueContinuum => format!("deltas_{}_true", region.name()),
                AnalysisVariant::Raw => format!("deltas_{}_raw", region.name()),
            };
            let dir = ns.deltas_dir(*region);
            let (lambda_min, lambda_max) = region.rest_frame();
            let resources = job
                .resources(cfg.wall_time)
                .with_threads(cfg.nproc)
                .with_launcher_option("-n 1")
                .with_launcher_option(format!("-c {}", cfg.nproc));

            let program = match variant {
                AnalysisVariant::Raw => &cfg.raw_program,
                _ => &cfg.program,
            };
            let mut builder = base(&name, program, StageKind::Deltas, ns, job, cfg.wall_time)
                .resources(resources);

            builder = match variant {
                AnalysisVariant::Raw => {
                    let builder = builder
                        .path_option("--object-cat", catalog)
                        .path_option("--in-dir", ns.skewers_dir())
                        .path_option("--out-dir", &dir.join("Delta"))
                        .option("--lambda-rest-min", lambda_min)
                        .option("--lambda-rest-max", lambda_max)
                        .option("--delta-lambda", cfg.delta_lambda)
                        .flag("--linear-spacing");
                    match cfg.max_num_spec {
                        Some(limit) if limit > 0 => builder.option("--nspec", limit),
                        _ => builder,
                    }
                }
                _ => {
                    let builder = builder
                        .path_option("--in-dir", &ns.spectra_dir())
                        .path_option("--catalog", catalog)
                        .path_option("--out-dir", &dir.join("Delta"))
                        .option("--lambda-rest-min", lambda_min)
                        .option("--lambda-rest-max", lambda_max)
                        .flag_if(variant == AnalysisVariant::TrueContinuum, "--true-continuum");
                    if cfg.mask_contaminants {
                        builder.path_option("--mask-catalog", &ns.contaminant_catalog())
                    } else {
                        builder
                    }
                }
            };

            builder
                .option("--nproc", cfg.nproc)
                .output(dir.join("Log").join("delta_attributes.fits.gz"))
                .upstream(upstream.clone())
                .build()
        })
        .collect()
}

pub async fn deltas(
    gate: &mut IdempotentGate,
    ns: &Namespace,
    cfg: &DeltasConfig,
    job: &JobConfig,
    variant: AnalysisVariant,
    catalog: &Path,
    upstream: Handle,
) -> ServiceResult<Vec<Handle>> {
    let mut handles = Vec::new();
    for task in delta_tasks(ns, cfg, job, variant, catalog, upstream)? {
        handles.push(gate.maybe_run(&task).await?);
    }
    Ok(handles)
}

// -- correlations -----------------------------------------------------------

pub fn correlation_task(
    ns: &Namespace,
    cfg: &CorrelationConfig,
    job: &JobConfig,
    catalog: &Path,
    pair: PairType,
    measurement: Measurement,
    upstream: Handle,
) -> Result<Task, ConfigError> {
    use crate::stage::Region;

    let name = measurement.task_name(pair);
    let output = ns
        .correlations_dir()
        .join(format!("{}_{}_{}.fits.gz", name, Z_MIN, Z_MAX));
    let command = format!("picca_{}.py", measurement.prefix(pair));
    let wall_time = cfg.wall_time(pair, measurement);
    let resources = job
        .resources(wall_time)
        .with_threads(cfg.nproc)
        .with_launcher_option("-n 1")
        .with_launcher_option(format!("-c {}", cfg.nproc));

    let primary = if pair == PairType::LybQso {
        Region::Lyb
    } else {
        Region::Lya
    };

    let mut builder = base(&name, &command, StageKind::Correlations, ns, job, wall_time)
        .resources(resources)
        .path_option("--out", &output)
        .path_option("--in-dir", &ns.deltas_dir(primary).join("Delta"));

    if pair == PairType::LyaLyb {
        builder = builder.path_option("--in-dir2", &ns.deltas_dir(Region::Lyb).join("Delta"));
    }

    builder = if pair.is_cross() {
        builder
            .path_option("--drq", catalog)
            .option("--mode", "desi_mocks")
            .option("--z-evol-obj", 1.44)
            .option("--rp-min", -cfg.rp_max)
    } else {
        builder.option("--rp-min", cfg.rp_min)
    };

    let rp_bins = if pair.is_cross() {
        2 * cfg.num_bins_rp
    } else {
        cfg.num_bins_rp
    };
    builder = builder
        .option("--rp-max", cfg.rp_max)
        .option("--rt-max", cfg.rt_max)
        .option("--nt", cfg.num_bins_rt)
        .option("--np", rp_bins)
        .option("--z-cut-min", Z_MIN)
        .option("--z-cut-max", Z_MAX)
        .option("--fid-Om", cfg.fid_om)
        .option("--nproc", cfg.nproc);

    if measurement == Measurement::MetalDistortion {
        builder = builder.values("--abs-igm", METAL_ABSORBERS);
    }
    if measurement != Measurement::Correlation {
        builder = builder.option("--rej", cfg.dmat_rejection);
    }

    builder
        .flag_if(cfg.no_project, "--no-project")
        .output(output)
        .upstream(upstream)
        .build()
}

/// Pair types x measurements, every branch waiting on the full delta set
pub async fn correlations(
    gate: &mut IdempotentGate,
    ns: &Namespace,
    cfg: &CorrelationConfig,
    job: &JobConfig,
    catalog: &Path,
    upstream: Handle,
) -> ServiceResult<Vec<Branch>> {
    let mut tasks = Vec::new();
    for pair in &cfg.pairs {
        for measurement in cfg.measurements() {
            let task =
                correlation_task(ns, cfg, job, catalog, *pair, measurement, upstream.clone())?;
            tasks.push((*pair, measurement, task));
        }
    }

    let mut branches = Vec::with_capacity(tasks.len());
    for (pair, measurement, task) in tasks {
        let handle = gate.maybe_run(&task).await?;
        branches.push(Branch {
            pair,
            measurement,
            artifact: task.outputs[0].clone(),
            handle,
        });
    }
    Ok(branches)
}

// -- export -----------------------------------------------------------------

/// One export per measured correlation, with its distortion matrix when
/// that was measured too
pub fn export_tasks(
    ns: &Namespace,
    cfg: &ExportConfig,
    job: &JobConfig,
    branches: &[Branch],
    upstream: Handle,
) -> Result<Vec<(PairType, Task)>, ConfigError> {
    branches
        .iter()
        .filter(|branch| branch.measurement == Measurement::Correlation)
        .map(|branch| {
            let name = format!(
                "export_{}",
                Measurement::Correlation.task_name(branch.pair)
            );
            let output = exported_path(&branch.artifact);
            let mut builder = base(&name, &cfg.program, StageKind::Export, ns, job, cfg.wall_time)
                .path_option("--data", &branch.artifact)
                .path_option("--out", &output);

            let distortion = branches.iter().find(|other| {
                other.pair == branch.pair && other.measurement == Measurement::Distortion
            });
            if let Some(distortion) = distortion {
                builder = builder.path_option("--dmat", &distortion.artifact);
            }

            let task = builder.output(output).upstream(upstream.clone()).build()?;
            Ok((branch.pair, task))
        })
        .collect()
}

/// Result of the export stage
#[derive(Debug, Clone, Default)]
pub struct ExportOutcome {
    pub exports: Vec<(PairType, PathBuf)>,
    pub handles: Vec<Handle>,
    /// Commands left for the campaign-wide partitioned export
    pub deferred: Vec<String>,
}

pub async fn export(
    gate: &mut IdempotentGate,
    ns: &Namespace,
    cfg: &ExportConfig,
    job: &JobConfig,
    branches: &[Branch],
    upstream: Handle,
) -> ServiceResult<ExportOutcome> {
    let mut outcome = ExportOutcome::default();
    for (pair, task) in export_tasks(ns, cfg, job, branches, upstream)? {
        outcome.exports.push((pair, task.outputs[0].clone()));
        if cfg.partitioned {
            if let Some(command) = gate.defer(&task) {
                outcome.deferred.push(command);
            }
        } else {
            outcome.handles.push(gate.maybe_run(&task).await?);
        }
    }
    Ok(outcome)
}

// -- covariance -------------------------------------------------------------

fn covariance_blocks(branches: &[Branch]) -> Vec<(PairType, PathBuf)> {
    branches
        .iter()
        .filter(|branch| branch.measurement == Measurement::Correlation)
        .map(|branch| (branch.pair, branch.artifact.clone()))
        .collect()
}

fn block_types(pairs: impl IntoIterator<Item = PairType>) -> Vec<&'static str> {
    pairs
        .into_iter()
        .map(|pair| if pair.is_cross() { "cross" } else { "auto" })
        .collect()
}

/// Full covariance assembled from every measured pair type
pub fn full_covariance_task(
    ns: &Namespace,
    cfg: &CovarianceConfig,
    job: &JobConfig,
    blocks: &BTreeMap<PairType, Vec<PathBuf>>,
    output: &Path,
    upstream: Handle,
) -> Result<Task, ConfigError> {
    let name = file_stem(output);
    let mut builder = base(&name, &cfg.program, StageKind::Covariance, ns, job, cfg.wall_time);
    for (pair, paths) in blocks {
        builder = builder.values(
            format!("--{}", pair.block()),
            paths.iter().map(|p| p.display().to_string()),
        );
    }
    builder
        .path_option("-o", output)
        .output(output)
        .upstream(upstream)
        .build()
}

pub fn smooth_covariance_task(
    ns: &Namespace,
    cfg: &CovarianceConfig,
    job: &JobConfig,
    pairs: &[PairType],
    input: &Path,
    upstream: Handle,
) -> Result<Task, ConfigError> {
    let output = input.with_file_name(format!("{}_smooth.fits", file_stem(input)));
    base(
        &file_stem(&output),
        &cfg.smooth_program,
        StageKind::Covariance,
        ns,
        job,
        cfg.wall_time,
    )
    .path_option("--input-cov", input)
    .path_option("--output-cov", &output)
    .values("--block-types", block_types(pairs.iter().copied()))
    .output(output)
    .upstream(upstream)
    .build()
}

/// Full covariance, then its smoothed version. The full covariance waits on
/// every correlation branch, distortion matrices included.
pub async fn covariance(
    gate: &mut IdempotentGate,
    ns: &Namespace,
    cfg: &CovarianceConfig,
    job: &JobConfig,
    branches: &[Branch],
    upstream: Handle,
) -> ServiceResult<(PathBuf, Handle)> {
    let mut blocks: BTreeMap<PairType, Vec<PathBuf>> = BTreeMap::new();
    for (pair, path) in covariance_blocks(branches) {
        blocks.entry(pair).or_default().push(path);
    }
    let pairs: Vec<PairType> = blocks.keys().copied().collect();

    let output = ns.correlations_dir().join("full_cov.fits");
    let full = full_covariance_task(ns, cfg, job, &blocks, &output, upstream)?;
    let handle = gate.maybe_run(&full).await?;
    if !cfg.smooth {
        return Ok((output, handle));
    }

    let smooth = smooth_covariance_task(ns, cfg, job, &pairs, &output, handle)?;
    let smoothed = smooth.outputs[0].clone();
    Ok((smoothed, gate.maybe_run(&smooth).await?))
}

// -- fit --------------------------------------------------------------------

pub fn fit_task(
    ns: &Namespace,
    cfg: &FitConfig,
    job: &JobConfig,
    exports: &[(PairType, PathBuf)],
    covariance: Option<&Path>,
    upstream: Handle,
) -> Result<Task, ConfigError> {
    let output = ns.fits_dir().join("fit_results.fits");
    let resources = job
        .resources(cfg.wall_time)
        .with_threads(cfg.nproc)
        .with_launcher_option("-n 1")
        .with_launcher_option(format!("-c {}", cfg.nproc));

    let mut builder = base("fit", &cfg.program, StageKind::Fit, ns, job, cfg.wall_time)
        .resources(resources)
        .values(
            "--data",
            exports.iter().map(|(_, path)| path.display().to_string()),
        );
    if let Some(covariance) = covariance {
        builder = builder.path_option("--cov", covariance);
    }
    if let Some(template) = &cfg.template {
        builder = builder.path_option("--template", template);
    }
    builder
        .path_option("--out", &output)
        .output(output)
        .upstream(upstream)
        .build()
}

pub async fn fit(
    gate: &mut IdempotentGate,
    ns: &Namespace,
    cfg: &FitConfig,
    job: &JobConfig,
    exports: &[(PairType, PathBuf)],
    covariance: Option<&Path>,
    upstream: Handle,
) -> ServiceResult<Handle> {
    let task = fit_task(ns, cfg, job, exports, covariance, upstream)?;
    gate.maybe_run(&task).await
}

// -- stack ------------------------------------------------------------------

/// Average one pair type's correlations across realizations. The output
/// is named after the first input so distinct inputs never collide.
pub fn stack_export_task(
    ns: &Namespace,
    cfg: &StackConfig,
    job: &JobConfig,
    pair: PairType,
    correlations: &[PathBuf],
    upstream: Handle,
) -> Result<Task, ConfigError> {
    let first = correlations.first().ok_or_else(|| {
        ConfigError::Invalid(format!("nothing to stack for pair '{}'", pair))
    })?;
    let output = exported_path(&ns.correlations_dir().join(first.file_name().unwrap_or_default()));
    let name = format!("stack_{}", file_stem(first));

    base(&name, &cfg.program, StageKind::StackExport, ns, job, cfg.wall_time)
        .values(
            "--data",
            correlations.iter().map(|p| p.display().to_string()),
        )
        .path_option("--out", &output)
        .output(output)
        .upstream(upstream)
        .build()
}

/// Covariance of the stacked measurement from every realization's blocks
pub fn stack_covariance_task(
    ns: &Namespace,
    cfg: &StackConfig,
    job: &JobConfig,
    blocks: &BTreeMap<PairType, Vec<PathBuf>>,
    upstream: Handle,
) -> Result<Task, ConfigError> {
    let output = ns.correlations_dir().join("full_cov.fits");
    let mut builder = base(
        "stack_full_cov",
        &cfg.covariance_program,
        StageKind::StackCovariance,
        ns,
        job,
        cfg.wall_time,
    );
    for (pair, paths) in blocks {
        builder = builder.values(
            format!("--{}", pair.block()),
            paths.iter().map(|p| p.display().to_string()),
        );
    }
    builder
        .path_option("-o", &output)
        .output(output)
        .upstream(upstream)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MockSetup, PipelineConfig};
    use crate::task::JobId;

    fn namespace() -> Namespace {
        let setup = MockSetup {
            output_root: PathBuf::from("/out"),
            input_root: PathBuf::from("/skewers"),
            ..MockSetup::default()
        };
        Namespace::for_realization(&setup, &RealizationId { mock: 3, catalog: 4, job: 5 })
    }

    fn branch(pair: PairType, measurement: Measurement, id: u64) -> Branch {
        Branch {
            pair,
            measurement,
            artifact: namespace()
                .correlations_dir()
                .join(format!("{}_0_10.fits.gz", measurement.task_name(pair))),
            handle: Handle::Id(JobId(id)),
        }
    }

    #[test]
    fn test_exported_path() {
        assert_eq!(
            exported_path(Path::new("/c/cf_lya_lya_0_10.fits.gz")),
            PathBuf::from("/c/cf_lya_lya_0_10-exp.fits.gz")
        );
        assert_eq!(
            exported_path(Path::new("/c/full_cov.fits")),
            PathBuf::from("/c/full_cov-exp.fits")
        );
    }

    #[test]
    fn test_synthesis_seeds() {
        let config = PipelineConfig::default();
        let ns = namespace();
        let id = RealizationId { mock: 3, catalog: 4, job: 5 };

        let catalog = input_catalog_task(&ns, &config.synthesis, &config.job, &id, Handle::None)
            .unwrap();
        assert!(catalog.invocation().contains("--seed 4"));
        assert!(catalog.invocation().contains("--input-dir /skewers/mock-3"));

        let spectra = spectra_task(&ns, &config.synthesis, &config.job, &id, Handle::None).unwrap();
        assert!(spectra.invocation().contains("--seed 5"));
        assert!(spectra.invocation().contains("--dla quickquasars"));
        assert_eq!(spectra.resources.nodes, 8);
        assert_eq!(spectra.stage, "synthesis");
    }

    #[test]
    fn test_contaminant_branch_is_optional() {
        let mut config = PipelineConfig::default();
        assert_eq!(
            catalog_tasks(&namespace(), &config.catalog, &config.job, Handle::None)
                .unwrap()
                .len(),
            2
        );
        config.catalog.contaminants = false;
        let tasks = catalog_tasks(&namespace(), &config.catalog, &config.job, Handle::None).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "zcat");
    }

    #[test]
    fn test_delta_variants() {
        let mut config = PipelineConfig::default();
        config.deltas.mask_contaminants = true;
        config.deltas.max_num_spec = Some(5000);
        let ns = namespace();

        let fitted = delta_tasks(
            &ns,
            &config.deltas,
            &config.job,
            AnalysisVariant::FittedContinuum,
            &ns.zcat(),
            Handle::None,
        )
        .unwrap();
        assert_eq!(fitted[0].name, "deltas_lya");
        assert!(fitted[0].invocation().contains("--mask-catalog"));
        assert!(!fitted[0].invocation().contains("--true-continuum"));

        let true_cont = delta_tasks(
            &ns,
            &config.deltas,
            &config.job,
            AnalysisVariant::TrueContinuum,
            &ns.zcat(),
            Handle::None,
        )
        .unwrap();
        assert_eq!(true_cont[0].name, "deltas_lya_true");
        assert!(true_cont[0].invocation().contains("--true-continuum"));

        let raw = delta_tasks(
            &ns,
            &config.deltas,
            &config.job,
            AnalysisVariant::Raw,
            &ns.zcat(),
            Handle::None,
        )
        .unwrap();
        let line = raw[0].invocation();
        assert_eq!(raw[0].name, "deltas_lya_raw");
        assert!(line.starts_with("picca_convert_transmission.py --object-cat "));
        assert!(line.contains("--in-dir /skewers/mock-3"));
        assert!(line.contains("--delta-lambda 0.8 --linear-spacing --nspec 5000"));
        assert!(!line.contains("--mask-catalog"));
    }

    #[test]
    fn test_cross_correlation_arguments() {
        let config = PipelineConfig::default();
        let ns = namespace();
        let task = correlation_task(
            &ns,
            &config.correlations,
            &config.job,
            &ns.zcat(),
            PairType::LybQso,
            Measurement::MetalDistortion,
            Handle::None,
        )
        .unwrap();

        let line = task.invocation();
        assert_eq!(task.name, "metal_xdmat_lyb_qso");
        assert!(line.starts_with("picca_metal_xdmat.py --out "));
        assert!(line.contains("deltas_lyb/Delta"));
        assert!(line.contains("--np 100"));
        assert!(line.contains("--rp-min -200"));
        assert!(line.contains("--abs-igm 'SiII(1260)' 'SiIII(1207)'"));
        assert!(line.contains("--rej 0.99"));
        assert_eq!(task.resources.wall_time.to_string(), "00:15:00");
    }

    #[test]
    fn test_export_attaches_distortion() {
        let config = PipelineConfig::default();
        let branches = vec![
            branch(PairType::LyaLya, Measurement::Correlation, 1),
            branch(PairType::LyaLya, Measurement::Distortion, 2),
            branch(PairType::LyaQso, Measurement::Correlation, 3),
        ];
        let tasks =
            export_tasks(&namespace(), &config.export, &config.job, &branches, Handle::None)
                .unwrap();

        assert_eq!(tasks.len(), 2);
        assert!(tasks[0].1.invocation().contains("--dmat"));
        assert!(!tasks[1].1.invocation().contains("--dmat"));
        assert_eq!(tasks[1].1.name, "export_xcf_lya_qso");
    }

    #[test]
    fn test_smooth_covariance_block_types() {
        let config = PipelineConfig::default();
        let ns = namespace();
        let input = ns.correlations_dir().join("full_cov.fits");
        let task = smooth_covariance_task(
            &ns,
            &config.covariance,
            &config.job,
            &[PairType::LyaLya, PairType::LyaQso],
            &input,
            Handle::None,
        )
        .unwrap();

        assert_eq!(task.name, "full_cov_smooth");
        assert_eq!(task.outputs[0], ns.correlations_dir().join("full_cov_smooth.fits"));
        assert!(task.invocation().ends_with("--block-types auto cross"));
    }

    #[test]
    fn test_stack_export_named_after_first_input() {
        let config = PipelineConfig::default();
        let stack = Namespace::for_stack(&MockSetup::default());
        let inputs = vec![
            PathBuf::from("/a/cf_lya_lya_0_10.fits.gz"),
            PathBuf::from("/b/cf_lya_lya_0_10.fits.gz"),
        ];
        let task = stack_export_task(
            &stack,
            &config.stack,
            &config.job,
            PairType::LyaLya,
            &inputs,
            Handle::None,
        )
        .unwrap();

        assert_eq!(task.name, "stack_cf_lya_lya_0_10");
        assert_eq!(
            task.outputs[0],
            stack.correlations_dir().join("cf_lya_lya_0_10-exp.fits.gz")
        );
        assert!(stack_export_task(
            &stack,
            &config.stack,
            &config.job,
            PairType::LyaLya,
            &[],
            Handle::None
        )
        .is_err());
    }
}
