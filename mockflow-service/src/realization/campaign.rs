// Campaign
// Realization fan-out followed by the cross-realization fan-in

use super::aggregate::{AggregationRegistry, ArtifactKey, ArtifactKind};
use super::namespace::Namespace;
use super::seeds::{realization_ids, RealizationId};
use crate::backend::Submitter;
use crate::config::PipelineConfig;
use crate::error::{ConfigError, ServiceError, ServiceResult};
use crate::events::{EventSender, OrchestrationEvent};
use crate::gate::{IdempotentGate, TaskState};
use crate::partition::partitioned_task;
use crate::stage::{
    builders, AnalysisVariant, Measurement, PairType, PendingFit, RealizationOutput, StageGraph,
    StageKind,
};
use crate::task::Handle;

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Name of the configuration snapshot kept next to each realization's scripts
pub const CONFIG_SNAPSHOT: &str = "mockflow_config.yaml";

/// Everything `run_all` produced, needed by `finalize`
#[derive(Debug, Clone, Default)]
pub struct CampaignRun {
    pub registry: AggregationRegistry,
    /// Every handle of every realization, in submission order
    pub handles: Vec<Handle>,
    /// Export commands left for the partitioned job
    pub deferred: Vec<String>,
    /// Fits that read those exports
    pub pending_fits: Vec<PendingFit>,
    pub outputs: Vec<RealizationOutput>,
}

impl CampaignRun {
    pub fn handle(&self) -> Handle {
        Handle::join(self.handles.iter().cloned())
    }
}

/// Result of a complete campaign
#[derive(Debug, Clone)]
pub struct CampaignSummary {
    pub name: String,
    pub realizations: usize,
    pub submitted: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub final_handle: Handle,
    pub duration: Duration,
}

/// A validated configuration together with its realizations
#[derive(Debug, Clone)]
pub struct Campaign {
    config: PipelineConfig,
    realizations: Vec<RealizationId>,
}

impl Campaign {
    /// Validate the configuration and expand its seeds. Nothing is written
    /// or submitted if this fails.
    pub fn plan(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let setup = &config.mock_setup;
        let realizations = realization_ids(
            setup.mock_seeds.as_deref(),
            setup.catalog_seeds.as_deref(),
            setup.job_seeds.as_deref(),
        )?;
        Ok(Self {
            config,
            realizations,
        })
    }

    pub fn name(&self) -> String {
        format!(
            "{}-{}",
            self.config.mock_setup.prefix, self.config.mock_setup.analysis_name
        )
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn realizations(&self) -> &[RealizationId] {
        &self.realizations
    }

    /// Stacking only makes sense across more than one realization
    pub fn stacks(&self) -> bool {
        self.config.control.stack
            && self.realizations.len() > 1
            && self.config.is_enabled(StageKind::Correlations)
    }

    /// Gate wired to the configured backend, dry-run flag and job-id log
    pub fn gate(&self) -> IdempotentGate {
        let job = &self.config.job;
        let mut submitter =
            Submitter::new(Arc::new(job.backend())).with_dry_run(job.dry_run);
        if let Some(log) = &job.jobid_log {
            submitter = submitter.with_jobid_log(log);
        }
        IdempotentGate::new(submitter)
    }

    /// Build and submit every realization's stage graph in order
    pub async fn run_all(&self, gate: &mut IdempotentGate) -> ServiceResult<CampaignRun> {
        let graph = StageGraph::new(&self.config);
        let snapshot = self.config.to_yaml()?;
        let total = self.realizations.len();
        let mut run = CampaignRun::default();

        for (index, id) in self.realizations.iter().enumerate() {
            gate.events().send_event(OrchestrationEvent::realization_started(
                id.to_string(),
                index,
                total,
            ));
            tracing::info!(realization = %id, "building realization {}/{}", index + 1, total);

            let ns = Namespace::for_realization(&self.config.mock_setup, id);
            let output = graph
                .run(gate, &ns, id)
                .await
                .map_err(|e| e.in_realization(id.to_string()))?;

            for analysis in &output.variants {
                tokio::fs::write(analysis.ns.scripts_dir().join(CONFIG_SNAPSHOT), &snapshot)
                    .await
                    .map_err(|e| ServiceError::from(e).in_realization(id.to_string()))?;

                for branch in &analysis.correlations {
                    if branch.measurement == Measurement::Correlation {
                        run.registry.register(
                            ArtifactKey::new(
                                analysis.variant,
                                branch.pair,
                                ArtifactKind::Correlation,
                            ),
                            branch.artifact.clone(),
                        );
                    }
                }
                for (pair, path) in &analysis.exports {
                    run.registry.register(
                        ArtifactKey::new(analysis.variant, *pair, ArtifactKind::Exported),
                        path.clone(),
                    );
                }
                run.deferred.extend(analysis.deferred.iter().cloned());
                run.pending_fits.extend(analysis.pending_fit.clone());
            }

            let skipped = output
                .outcomes
                .iter()
                .filter(|o| o.state == TaskState::Skipped)
                .count();
            let submitted = output
                .outcomes
                .iter()
                .filter(|o| matches!(o.state, TaskState::Submitted(_)))
                .count();
            gate.events().send_event(OrchestrationEvent::RealizationCompleted {
                realization: id.to_string(),
                submitted,
                skipped,
            });

            run.handles.extend(output.handles.iter().cloned());
            run.outputs.push(output);
        }

        Ok(run)
    }

    /// Submit the campaign-level stages. Every one of them waits on the
    /// complete handle set of `run`.
    pub async fn finalize(
        &self,
        gate: &mut IdempotentGate,
        run: &CampaignRun,
    ) -> ServiceResult<Handle> {
        self.finalize_stack(gate, run)
            .await
            .map_err(|e| e.in_realization(self.config.mock_setup.stack_name.clone()))
    }

    async fn finalize_stack(
        &self,
        gate: &mut IdempotentGate,
        run: &CampaignRun,
    ) -> ServiceResult<Handle> {
        let config = &self.config;
        let job = &config.job;
        let upstream = run.handle();
        let stacks = self.stacks();

        if config.control.stack && self.realizations.len() == 1 {
            gate.events().send_event(OrchestrationEvent::info(
                "Single realization, stacking disabled",
            ));
        }
        if !stacks && run.deferred.is_empty() && run.pending_fits.is_empty() {
            return Ok(upstream);
        }

        let stack_ns = Namespace::for_stack(&config.mock_setup);
        let mut finals = Vec::new();

        if stacks {
            for variant in &config.control.variants {
                let ns = stack_ns.for_variant(&config.mock_setup, *variant);
                ns.create_dirs(&[]).await?;
                let handles = self
                    .stack_variant(gate, &ns, *variant, run, &upstream)
                    .await?;
                finals.extend(handles);
            }
        }

        let mut exported = Handle::None;
        if !run.deferred.is_empty() {
            stack_ns.create_dirs(&[]).await?;
            tracing::info!(commands = run.deferred.len(), "submitting partitioned export");
            let task =
                partitioned_task(&stack_ns, &config.export, job, &run.deferred, upstream.clone())?;
            exported = gate.maybe_run(&task).await?;
            finals.push(exported.clone());
        }

        for pending in &run.pending_fits {
            let handle = builders::fit(
                gate,
                &pending.ns,
                &config.fit,
                job,
                &pending.exports,
                pending.covariance.as_deref(),
                Handle::join([pending.upstream.clone(), exported.clone()]),
            )
            .await?;
            finals.push(handle);
        }

        Ok(Handle::join(finals))
    }

    /// Stacked exports and covariance for one analysis variant
    async fn stack_variant(
        &self,
        gate: &mut IdempotentGate,
        ns: &Namespace,
        variant: AnalysisVariant,
        run: &CampaignRun,
        upstream: &Handle,
    ) -> ServiceResult<Vec<Handle>> {
        let config = &self.config;
        let job = &config.job;
        let correlations = run.registry.by_kind(variant, ArtifactKind::Correlation);
        gate.events().send_event(OrchestrationEvent::AggregationStarted {
            variant: variant.to_string(),
            keys: correlations.len(),
            handles: upstream.flatten_to_set().len(),
        });

        let mut finals = Vec::new();
        for (pair, paths) in &correlations {
            let task = builders::stack_export_task(
                ns,
                &config.stack,
                job,
                *pair,
                paths,
                upstream.clone(),
            )?;
            finals.push(gate.maybe_run(&task).await?);
        }

        if config.is_enabled(StageKind::Covariance) && !correlations.is_empty() {
            let full = builders::stack_covariance_task(
                ns,
                &config.stack,
                job,
                &correlations,
                upstream.clone(),
            )?;
            let handle = gate.maybe_run(&full).await?;
            if config.covariance.smooth {
                let pairs: Vec<PairType> = correlations.keys().copied().collect();
                let smooth = builders::smooth_covariance_task(
                    ns,
                    &config.covariance,
                    job,
                    &pairs,
                    &full.outputs[0],
                    handle,
                )?;
                finals.push(gate.maybe_run(&smooth).await?);
            } else {
                finals.push(handle);
            }
        }

        Ok(finals)
    }

    /// `run_all` then `finalize`, reporting progress and writing the ledger
    pub async fn execute(&self, gate: &mut IdempotentGate) -> ServiceResult<CampaignSummary> {
        let start = Instant::now();
        let name = self.name();
        gate.events().send_event(OrchestrationEvent::CampaignStarted {
            name: name.clone(),
            realizations: self.realizations.len(),
            dry_run: gate.is_dry_run(),
        });

        let result = async {
            let run = self.run_all(gate).await?;
            let final_handle = self.finalize(gate, &run).await?;
            Ok::<_, ServiceError>((run, final_handle))
        }
        .await;

        let result = match (&self.config.job.ledger, result) {
            (Some(ledger), Ok(done)) => gate
                .submitter()
                .write_ledger(ledger)
                .await
                .map(|()| done),
            (Some(ledger), Err(e)) => {
                // The ledger still records what was submitted before the failure
                if let Err(ledger_error) = gate.submitter().write_ledger(ledger).await {
                    tracing::warn!(
                        error = %ledger_error,
                        path = %ledger.display(),
                        "failed to write ledger"
                    );
                }
                Err(e)
            }
            (None, result) => result,
        };

        let duration = start.elapsed();
        gate.events().send_event(OrchestrationEvent::CampaignCompleted {
            name: name.clone(),
            success: result.is_ok(),
            submitted: gate.submitted(),
            skipped: gate.skipped(),
            duration,
        });

        let (run, final_handle) = result?;
        Ok(CampaignSummary {
            name,
            realizations: self.realizations.len(),
            submitted: gate.submitted(),
            skipped: gate.skipped(),
            deferred: run.deferred.len(),
            final_handle,
            duration,
        })
    }
}
