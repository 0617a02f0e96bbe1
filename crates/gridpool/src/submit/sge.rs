//! SGE/PBS adapter: one array task whose members derive their id range
//! from the array index.

use std::path::PathBuf;

use crate::role::MARKER;

use super::{
    EnvPassthrough, SubmitContext, SubmitError, Submitter, condor::default_log_directory,
    effective_groupsize, run_submit_command,
};

/// qsub submission knobs.
#[derive(Debug, Clone)]
pub struct SgeConfig {
    /// Where the scheduler writes per-task stdout/stderr; created if
    /// absent.
    pub log_directory: PathBuf,
    /// Per-task memory request, in MB.
    pub memory_mb: u32,
    /// Host eligibility: load average requirement.
    pub loadavg_max: f64,
    /// Number of array tasks; defaults to one task per job.
    pub ngroups: Option<usize>,
}

impl Default for SgeConfig {
    fn default() -> Self {
        Self {
            log_directory: default_log_directory("qsub"),
            memory_mb: 2000,
            loadavg_max: 2.0,
            ngroups: None,
        }
    }
}

/// Submits through `qsub`.
#[derive(Debug, Clone)]
pub struct SgeSubmitter {
    config: SgeConfig,
}

impl SgeSubmitter {
    /// Adapter over the given configuration.
    pub fn new(config: SgeConfig) -> Self {
        Self { config }
    }
}

impl Submitter for SgeSubmitter {
    async fn submit(&self, ctx: &SubmitContext) -> Result<(), SubmitError> {
        println!("Using qsub");
        println!("Log directory is {:?}", self.config.log_directory);
        std::fs::create_dir_all(&self.config.log_directory)?;

        let script = render(&self.config, ctx, &EnvPassthrough::capture());
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("qsub.pbs");
        std::fs::write(&path, script)?;

        let path_str = path.display().to_string();
        run_submit_command("qsub", &[&path_str]).await
    }
}

fn render(config: &SgeConfig, ctx: &SubmitContext, env: &EnvPassthrough) -> String {
    let ngroups = config.ngroups.filter(|n| *n > 0).unwrap_or(ctx.njobs).max(1);
    let groupsize = effective_groupsize(ctx.njobs, 1, Some(ngroups));
    let dirlog = config.log_directory.display();
    format!(
        "#PBS -S /bin/bash\n\
         #PBS -o {dirlog}/out.$PBS_JOBID\n\
         #PBS -e {dirlog}/err.$PBS_JOBID\n\
         #PBS -t 0-{last}\n\
         #PBS -l mem={memory}mb\n\
         #PBS -l load_avg={loadavg}\n\
         export LD_LIBRARY_PATH={ld}\n\
         export PATH={path}\n\
         export RUST_LOG={rust_log}\n\
         \n\
         sh -c '{exe} {MARKER} worker {uri} A $PBS_ARRAYID {groupsize} {njobs}'\n",
        last = ngroups - 1,
        memory = config.memory_mb,
        loadavg = config.loadavg_max,
        ld = env.ld_library_path,
        path = env.path,
        rust_log = env.rust_log,
        exe = ctx.exe.display(),
        uri = ctx.broker_uri,
        njobs = ctx.njobs,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(njobs: usize) -> SubmitContext {
        SubmitContext {
            broker_uri: "http://10.0.0.7:41273".to_string(),
            njobs,
            exe: PathBuf::from("/opt/app/bin/myjob"),
        }
    }

    fn config() -> SgeConfig {
        SgeConfig {
            log_directory: PathBuf::from("/tmp/qsub-log-test"),
            ..SgeConfig::default()
        }
    }

    fn env() -> EnvPassthrough {
        EnvPassthrough {
            path: "/usr/bin".to_string(),
            ld_library_path: String::new(),
            rust_log: String::new(),
        }
    }

    #[test]
    fn array_range_defaults_to_one_task_per_job() {
        let script = render(&config(), &context(5), &env());
        assert!(script.contains("#PBS -t 0-4\n"));
        assert!(script.contains("A $PBS_ARRAYID 1 5'"));
    }

    #[test]
    fn ngroups_shrinks_the_array_and_grows_the_groups() {
        let mut cfg = config();
        cfg.ngroups = Some(3);
        let script = render(&cfg, &context(10), &env());
        assert!(script.contains("#PBS -t 0-2\n"));
        assert!(script.contains("A $PBS_ARRAYID 4 10'"));
    }

    #[test]
    fn artifact_carries_resources_and_exports() {
        let script = render(&config(), &context(2), &env());
        assert!(script.contains("#PBS -S /bin/bash"));
        assert!(script.contains("#PBS -o /tmp/qsub-log-test/out.$PBS_JOBID"));
        assert!(script.contains("#PBS -l mem=2000mb"));
        assert!(script.contains("#PBS -l load_avg=2"));
        assert!(script.contains("export PATH=/usr/bin\n"));
        assert!(script.contains("/opt/app/bin/myjob __gridpool worker http://10.0.0.7:41273 A"));
    }
}
