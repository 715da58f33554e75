// Script Rendering
// Turns structured tasks into batch scripts and dependency clauses

use crate::task::{Handle, Task};

use std::io;
use std::path::Path;

/// Slurm-style `--dependency=afterok:...` clause, or `None` when nothing
/// real has to finish first
pub fn dependency_clause(upstream: &Handle) -> Option<String> {
    let ids = upstream.flatten_to_set();
    if ids.is_empty() {
        return None;
    }
    let conditions: Vec<String> = ids.iter().map(|id| format!("afterok:{}", id)).collect();
    Some(format!("--dependency={}", conditions.join(",")))
}

/// Full batch script with `#SBATCH` directives and an `srun` launch line
pub fn render_batch(task: &Task) -> String {
    let resources = &task.resources;
    let mut text = String::from("#!/bin/bash -l\n\n");

    let mut directive = |key: &str, value: String| {
        text.push_str(&format!("#SBATCH --{} {}\n", key, value));
    };
    directive("qos", resources.queue.clone());
    directive("nodes", resources.nodes.to_string());
    directive("time", resources.wall_time.to_string());
    directive("job-name", task.name.clone());
    directive("output", task.stdout_log.display().to_string());
    directive("error", task.stderr_log.display().to_string());
    if let Some(constraint) = &resources.constraint {
        directive("constraint", constraint.clone());
    }
    if let Some(account) = &resources.account {
        directive("account", account.clone());
    }
    if let Some(tasks) = resources.tasks_per_node {
        directive("ntasks-per-node", tasks.to_string());
    }
    if let Some(cpus) = resources.cpus_per_task {
        directive("cpus-per-task", cpus.to_string());
    }
    text.push('\n');

    push_environment(&mut text, task);

    let mut launch = vec!["srun".to_string()];
    launch.extend(resources.launcher_options.iter().cloned());
    launch.push(task.invocation());
    text.push_str(&launch.join(" "));
    text.push('\n');
    text
}

/// Plain bash script run directly on the current host
pub fn render_direct(task: &Task) -> String {
    let mut text = String::from("#!/bin/bash -l\nset -e\n\n");
    push_environment(&mut text, task);
    text.push_str(&task.invocation());
    text.push('\n');
    text
}

fn push_environment(text: &mut String, task: &Task) {
    if let Some(threads) = task.resources.omp_threads {
        text.push_str(&format!("export OMP_NUM_THREADS={}\n", threads));
    }
    for setup in &task.environment {
        text.push_str(&setup.render());
        text.push('\n');
    }
    text.push('\n');
}

/// Persist a script and mark it executable
pub async fn write_script(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, contents).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o750)).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{EnvSetup, JobId, ResourceSpec, WallTime};
    use tempfile::TempDir;

    fn sample_task(upstream: Handle) -> Task {
        let resources = ResourceSpec {
            constraint: Some("cpu".to_string()),
            account: Some("desi".to_string()),
            ..ResourceSpec::default()
        }
        .with_wall_time(WallTime::from_hours(1.5).unwrap())
        .with_threads(128)
        .with_launcher_option("-n 1")
        .with_launcher_option("-c 128");

        Task::builder("cf_lya_lya", "picca_cf.py")
            .option("--out", "/runs/cf_lya_lya_0_10.fits.gz")
            .resources(resources)
            .environment([
                EnvSetup::Umask("0027".to_string()),
                EnvSetup::Source("/opt/env.sh".to_string()),
            ])
            .upstream(upstream)
            .script_path("/runs/scripts/cf_lya_lya.sh")
            .log_dir("/runs/logs")
            .build()
            .unwrap()
    }

    #[test]
    fn test_dependency_clause_filters_pass_through() {
        let upstream = Handle::join(vec![
            Handle::Id(JobId(12)),
            Handle::None,
            Handle::join(vec![Handle::Id(JobId(5))]),
        ]);
        assert_eq!(
            dependency_clause(&upstream).as_deref(),
            Some("--dependency=afterok:5,afterok:12")
        );
        assert_eq!(dependency_clause(&Handle::join(vec![Handle::None])), None);
    }

    #[test]
    fn test_render_batch_layout() {
        let text = render_batch(&sample_task(Handle::None));
        let expected = "#!/bin/bash -l\n\n\
            #SBATCH --qos regular\n\
            #SBATCH --nodes 1\n\
            #SBATCH --time 01:30:00\n\
            #SBATCH --job-name cf_lya_lya\n\
            #SBATCH --output /runs/logs/cf_lya_lya-%j.out\n\
            #SBATCH --error /runs/logs/cf_lya_lya-%j.err\n\
            #SBATCH --constraint cpu\n\
            #SBATCH --account desi\n\n\
            export OMP_NUM_THREADS=128\n\
            umask 0027\n\
            source /opt/env.sh\n\n\
            srun -n 1 -c 128 picca_cf.py --out /runs/cf_lya_lya_0_10.fits.gz\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_render_direct_has_no_directives() {
        let text = render_direct(&sample_task(Handle::None));
        assert!(!text.contains("#SBATCH"));
        assert!(!text.contains("srun"));
        assert!(text.ends_with("picca_cf.py --out /runs/cf_lya_lya_0_10.fits.gz\n"));
    }

    #[tokio::test]
    async fn test_write_script_is_executable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/scripts/run.sh");
        write_script(&path, "#!/bin/bash\necho hi\n").await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("echo hi"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o750);
        }
    }
}
