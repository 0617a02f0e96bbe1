//! HTCondor adapter: one scheduler task per group of explicit job ids.

use std::path::PathBuf;

use crate::role::MARKER;

use super::{
    EnvPassthrough, SubmitContext, SubmitError, Submitter, effective_groupsize, id_groups,
    run_submit_command,
};

/// HTCondor submission knobs.
#[derive(Debug, Clone)]
pub struct CondorConfig {
    /// Where condor writes per-task stdout/stderr/log files; created if
    /// absent.
    pub log_directory: PathBuf,
    /// Per-task memory request, in MB.
    pub memory_mb: u32,
    /// Per-task CPU request.
    pub n_cpus: u32,
    /// Per-task GPU request; no GPU directive is emitted when 0.
    pub n_gpus: u32,
    /// Host eligibility: current load average must be below this. Defaults
    /// to `2 * n_cpus` when unset.
    pub loadavg_max: Option<f64>,
    /// Jobs per scheduler task.
    pub groupsize: usize,
    /// When set, overrides `groupsize` by dividing the job count.
    pub ngroups: Option<usize>,
    /// Command prefix wrapped around the worker invocation, e.g.
    /// `/bin/time -v`.
    pub wrapper: String,
}

impl Default for CondorConfig {
    fn default() -> Self {
        Self {
            log_directory: default_log_directory("condor"),
            memory_mb: 2000,
            n_cpus: 1,
            n_gpus: 0,
            loadavg_max: None,
            groupsize: 1,
            ngroups: None,
            wrapper: String::new(),
        }
    }
}

pub(crate) fn default_log_directory(scheduler: &str) -> PathBuf {
    let user = std::env::var("USER").unwrap_or_else(|_| "nobody".to_string());
    PathBuf::from(format!("/tmp/{scheduler}-log-{user}"))
}

/// Submits through `condor_submit`.
#[derive(Debug, Clone)]
pub struct CondorSubmitter {
    config: CondorConfig,
}

impl CondorSubmitter {
    /// Adapter over the given configuration.
    pub fn new(config: CondorConfig) -> Self {
        Self { config }
    }
}

impl Submitter for CondorSubmitter {
    async fn submit(&self, ctx: &SubmitContext) -> Result<(), SubmitError> {
        println!("Using condor");
        println!("Log directory is {:?}", self.config.log_directory);
        std::fs::create_dir_all(&self.config.log_directory)?;

        let script = render(&self.config, ctx, &EnvPassthrough::capture());
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("condor.run");
        std::fs::write(&path, script)?;

        let path_str = path.display().to_string();
        run_submit_command("condor_submit", &["-terse", &path_str]).await
        // `dir` drops here, removing the artifact whether submit succeeded
        // or not.
    }
}

fn render(config: &CondorConfig, ctx: &SubmitContext, env: &EnvPassthrough) -> String {
    let dirlog = config.log_directory.display();
    let loadavg = config
        .loadavg_max
        .unwrap_or(2.0 * f64::from(config.n_cpus));
    let mut script = format!(
        "universe = vanilla\n\
         notification = Error\n\
         executable = /usr/bin/env\n\
         log = {dirlog}/$(Cluster).log\n\
         output = {dirlog}/$(Cluster).$(Process).out\n\
         error = {dirlog}/$(Cluster).$(Process).error\n\
         environment = \"LD_LIBRARY_PATH={ld} PATH={path} RUST_LOG={rust_log}\"\n\
         requirements = (OpSys == \"LINUX\") && (LoadAvg < {loadavg})\n\
         request_memory = {memory}\n\
         request_cpus = {cpus}\n",
        ld = env.ld_library_path,
        path = env.path,
        rust_log = env.rust_log,
        memory = config.memory_mb,
        cpus = config.n_cpus,
    );
    if config.n_gpus > 0 {
        script.push_str(&format!("request_GPUs = {}\n", config.n_gpus));
    }

    let wrapper = if config.wrapper.is_empty() {
        String::new()
    } else {
        format!("{} ", config.wrapper)
    };
    let groupsize = effective_groupsize(ctx.njobs, config.groupsize, config.ngroups);
    for group in id_groups(ctx.njobs, groupsize) {
        let ids = group
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        script.push_str(&format!(
            "\narguments = \"sh -c '{wrapper}{exe} {MARKER} worker {uri} C {ids}'\"\nqueue\n",
            exe = ctx.exe.display(),
            uri = ctx.broker_uri,
        ));
    }
    script
}
