// Stage Graph
// Wires one realization's stages together through the idempotent gate

use super::{builders, AnalysisVariant, Branch, PairType, StageKind};
use crate::config::PipelineConfig;
use crate::error::ServiceResult;
use crate::gate::{IdempotentGate, TaskOutcome};
use crate::realization::{Namespace, RealizationId};
use crate::task::Handle;

use std::path::{Path, PathBuf};

/// A fit whose exports are written by the campaign-wide partitioned job.
/// It is submitted once that job's handle exists.
#[derive(Debug, Clone)]
pub struct PendingFit {
    pub ns: Namespace,
    pub exports: Vec<(PairType, PathBuf)>,
    pub covariance: Option<PathBuf>,
    /// Everything the fit waits on apart from the partitioned job
    pub upstream: Handle,
}

/// One analysis pass over a realization
#[derive(Debug, Clone)]
pub struct VariantOutput {
    pub variant: AnalysisVariant,
    pub ns: Namespace,
    pub correlations: Vec<Branch>,
    pub exports: Vec<(PairType, PathBuf)>,
    pub deferred: Vec<String>,
    pub pending_fit: Option<PendingFit>,
}

/// Everything one realization contributed
#[derive(Debug, Clone)]
pub struct RealizationOutput {
    pub id: RealizationId,
    pub variants: Vec<VariantOutput>,
    /// Every handle produced, in submission order
    pub handles: Vec<Handle>,
    pub outcomes: Vec<TaskOutcome>,
}

impl RealizationOutput {
    pub fn handle(&self) -> Handle {
        Handle::join(self.handles.iter().cloned())
    }

    pub fn variant(&self, variant: AnalysisVariant) -> Option<&VariantOutput> {
        self.variants.iter().find(|output| output.variant == variant)
    }
}

/// Per-realization pipeline.
///
/// Synthesis and the catalogs run once; every analysis variant then runs
/// its own deltas, correlations, export, covariance and fit on top of them.
/// Linear stages hand their handle to the next stage. Fan-out stages
/// return one handle per branch and the following stage waits on the join
/// of all of them. Disabled stages are passed through without building
/// anything; their artifacts are assumed to be in place.
pub struct StageGraph<'a> {
    config: &'a PipelineConfig,
}

impl<'a> StageGraph<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub async fn run(
        &self,
        gate: &mut IdempotentGate,
        ns: &Namespace,
        id: &RealizationId,
    ) -> ServiceResult<RealizationOutput> {
        let config = self.config;
        let job = &config.job;
        ns.create_dirs(&[]).await?;

        let mut handles = Vec::new();
        let mut upstream = Handle::None;

        if config.is_enabled(StageKind::Synthesis) {
            upstream =
                builders::synthesis(gate, ns, &config.synthesis, job, id, upstream).await?;
            handles.push(upstream.clone());
        }

        if config.is_enabled(StageKind::Catalog) {
            let catalogs = builders::catalog(gate, ns, &config.catalog, job, upstream).await?;
            handles.extend(catalogs.iter().cloned());
            upstream = Handle::join(catalogs);
        }

        let catalog = if config.is_enabled(StageKind::RedshiftErrors) {
            upstream = builders::redshift_errors(
                gate,
                ns,
                &config.redshift_errors,
                job,
                id,
                upstream,
            )
            .await?;
            handles.push(upstream.clone());
            ns.zcat_with_errors()
        } else {
            ns.zcat()
        };

        let mut variants = Vec::new();
        for variant in &config.control.variants {
            let variant_ns = ns.for_variant(&config.mock_setup, *variant);
            tracing::debug!(realization = %id, variant = %variant, "building analysis");
            let output = self
                .run_variant(gate, variant_ns, *variant, &catalog, upstream.clone(), &mut handles)
                .await?;
            variants.push(output);
        }

        Ok(RealizationOutput {
            id: *id,
            variants,
            handles,
            outcomes: gate.take_outcomes(),
        })
    }

    async fn run_variant(
        &self,
        gate: &mut IdempotentGate,
        ns: Namespace,
        variant: AnalysisVariant,
        catalog: &Path,
        mut upstream: Handle,
        handles: &mut Vec<Handle>,
    ) -> ServiceResult<VariantOutput> {
        let config = self.config;
        let job = &config.job;
        ns.create_dirs(&config.deltas.regions).await?;

        if config.is_enabled(StageKind::Deltas) {
            let deltas =
                builders::deltas(gate, &ns, &config.deltas, job, variant, catalog, upstream)
                    .await?;
            handles.extend(deltas.iter().cloned());
            upstream = Handle::join(deltas);
        }

        let mut correlations = Vec::new();
        if config.is_enabled(StageKind::Correlations) {
            correlations =
                builders::correlations(gate, &ns, &config.correlations, job, catalog, upstream)
                    .await?;
            handles.extend(correlations.iter().map(|branch| branch.handle.clone()));
        }
        let correlation_set = Handle::join(correlations.iter().map(|b| b.handle.clone()));

        let mut exports = Vec::new();
        let mut deferred = Vec::new();
        let mut downstream = Vec::new();
        if config.is_enabled(StageKind::Export) {
            let outcome = builders::export(
                gate,
                &ns,
                &config.export,
                job,
                &correlations,
                correlation_set.clone(),
            )
            .await?;
            exports = outcome.exports;
            deferred = outcome.deferred;
            handles.extend(outcome.handles.iter().cloned());
            downstream.extend(outcome.handles);
        }

        let mut covariance = None;
        if config.is_enabled(StageKind::Covariance) {
            let (path, handle) = builders::covariance(
                gate,
                &ns,
                &config.covariance,
                job,
                &correlations,
                correlation_set.clone(),
            )
            .await?;
            covariance = Some(path);
            handles.push(handle.clone());
            downstream.push(handle);
        }

        let mut pending_fit = None;
        if config.is_enabled(StageKind::Fit) {
            downstream.push(correlation_set);
            let upstream = Handle::join(downstream);
            if deferred.is_empty() {
                let handle = builders::fit(
                    gate,
                    &ns,
                    &config.fit,
                    job,
                    &exports,
                    covariance.as_deref(),
                    upstream,
                )
                .await?;
                handles.push(handle);
            } else {
                // Exports still to be written by the partitioned job
                pending_fit = Some(PendingFit {
                    ns: ns.clone(),
                    exports: exports.clone(),
                    covariance,
                    upstream,
                });
            }
        }

        Ok(VariantOutput {
            variant,
            ns,
            correlations,
            exports,
            deferred,
            pending_fit,
        })
    }
}
