// Work Partitioner
// Splits a flat command list into contiguous per-rank chunks and runs them

use crate::config::{ExportConfig, JobConfig};
use crate::error::{ConfigError, ServiceError, ServiceResult};
use crate::realization::Namespace;
use crate::stage::StageKind;
use crate::task::{Handle, Task};

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

/// Contiguous `(start, stop)` ranges, one per worker rank.
///
/// The first `n_items % n_workers` ranks get one extra item. When there are
/// more workers than items the surplus ranks get empty ranges.
pub fn partition(n_items: usize, n_workers: usize) -> Vec<(usize, usize)> {
    if n_workers == 0 {
        return Vec::new();
    }
    let base = n_items / n_workers;
    let remainder = n_items % n_workers;

    (0..n_workers)
        .map(|rank| {
            let (start, len) = if rank < remainder {
                (rank * (base + 1), base + 1)
            } else {
                (remainder * (base + 1) + (rank - remainder) * base, base)
            };
            let start = start.min(n_items);
            (start, (start + len).min(n_items))
        })
        .collect()
}

/// Run one rank's chunk in order, one log per command index. The first
/// failing command stops the chunk.
pub async fn run_rank(
    commands: &[String],
    rank: usize,
    n_workers: usize,
    log_dir: &Path,
) -> ServiceResult<usize> {
    let Some(&(start, stop)) = partition(commands.len(), n_workers).get(rank) else {
        return Err(ConfigError::Invalid(format!(
            "rank {} is outside a pool of {} workers",
            rank, n_workers
        ))
        .into());
    };
    tokio::fs::create_dir_all(log_dir).await?;

    for index in start..stop {
        let command = &commands[index];
        tracing::debug!(rank, index, command = %command, "running partitioned command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await?;

        tokio::fs::write(log_path(log_dir, index), &output.stdout).await?;

        if !output.status.success() {
            return Err(ServiceError::Execution {
                task: format!("export_{}", index),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
    }

    Ok(stop - start)
}

pub fn log_path(log_dir: &Path, index: usize) -> PathBuf {
    log_dir.join(format!("export_{}.log", index))
}

/// Run every rank concurrently on this machine
pub async fn run_pool(
    commands: Vec<String>,
    n_workers: usize,
    log_dir: &Path,
) -> ServiceResult<usize> {
    if n_workers == 0 && !commands.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{} command(s) cannot run on a pool of 0 workers",
            commands.len()
        ))
        .into());
    }
    let commands = Arc::new(commands);
    let mut workers = Vec::with_capacity(n_workers);
    for rank in 0..n_workers {
        let commands = Arc::clone(&commands);
        let log_dir = log_dir.to_path_buf();
        workers.push(tokio::spawn(async move {
            run_rank(&commands, rank, n_workers, &log_dir).await
        }));
    }

    let mut completed = 0;
    let mut first_error = None;
    for worker in workers {
        match worker.await {
            Ok(Ok(count)) => completed += count,
            Ok(Err(e)) => {
                first_error.get_or_insert(e);
            }
            Err(e) => {
                first_error.get_or_insert(ServiceError::Io(std::io::Error::other(e)));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(completed),
    }
}

/// Task that fans `commands` out over a multi-rank `worker` job
pub fn partitioned_task(
    ns: &Namespace,
    cfg: &ExportConfig,
    job: &JobConfig,
    commands: &[String],
    upstream: Handle,
) -> Result<Task, ConfigError> {
    let ranks = commands.len().min(cfg.workers).max(1);
    let per_node = ranks.min(cfg.max_tasks_per_node);
    let nodes = ranks.div_ceil(per_node);

    let resources = job
        .resources(cfg.wall_time)
        .with_nodes(nodes as u32)
        .with_tasks_per_node(per_node as u32)
        .with_launcher_option(format!("--ntasks-per-node={}", per_node));

    Task::builder("partitioned_export", &cfg.worker_program)
        .stage(StageKind::PartitionedExport.as_str())
        .script_path(ns.script("partitioned_export"))
        .log_dir(ns.logs_dir())
        .environment(job.environment())
        .resources(resources)
        .positional("worker")
        .path_option("--log-dir", &ns.logs_dir().join("exports"))
        .positional("--")
        .extra_args(commands)
        .upstream(upstream)
        .build()
}
