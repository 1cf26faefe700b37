use std::ffi::OsString;
use std::path::PathBuf;

use crate::config::{self, EnvSource};
use crate::env_manager::{EnvDescriptor, EnvManager, locate_conda};
use crate::error::Result;
use crate::job::{self, Invocation};
use crate::lock::RunLock;
use crate::paths::InstallPaths;
use crate::process::CommandRunner;
use crate::run_log::RunLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// A previous run still holds the lock; nothing was executed.
    Skipped,
}

/// Everything one wrapper run needs from its surroundings.
pub struct RunContext<'a> {
    pub paths: InstallPaths,
    pub env: &'a dyn EnvSource,
    pub runner: &'a dyn CommandRunner,
    /// Mirror log lines to stdout (set when stdout is a terminal).
    pub mirror: bool,
}

/// One scheduled tick: config → conda environment → analyzer, logged
/// throughout, with log rotation and retention at the end.
pub fn run(ctx: &RunContext<'_>, args: Vec<String>) -> Result<RunOutcome> {
    ctx.paths.ensure_log_dir()?;

    let Some(_lock) = RunLock::try_acquire(&ctx.paths.lock_file)? else {
        let mut log = RunLog::open(&ctx.paths.log_file, ctx.mirror);
        log.log("another run is still in progress; skipping");
        return Ok(RunOutcome::Skipped);
    };

    let mut log = RunLog::open(&ctx.paths.log_file, ctx.mirror);
    log.log(&format!("run started in {}", ctx.paths.root.display()));

    let result = run_locked(ctx, args, &mut log);
    match &result {
        Ok(()) => log.log("run finished"),
        Err(e) => log.log(&format!("error: {e}")),
    }
    log.maintain();
    result.map(|()| RunOutcome::Completed)
}

fn run_locked(ctx: &RunContext<'_>, args: Vec<String>, log: &mut RunLog) -> Result<()> {
    let settings = config::load(Some(&ctx.paths.config_file), ctx.env)?;
    if ctx.paths.config_file.exists() {
        log.log(&format!("loaded settings from {}", ctx.paths.config_file.display()));
    } else {
        log.log("no settings file; using environment and defaults");
    }

    let home = ctx.env.var("HOME").map(PathBuf::from);
    let path_var = ctx.env.var("PATH");
    let conda = locate_conda(
        settings.conda_override.as_deref(),
        home.as_deref(),
        path_var.as_ref().map(OsString::from).as_deref(),
    )?;
    log.log(&format!("using conda at {}", conda.display()));

    let manager = EnvManager::new(conda, ctx.runner);
    let desc = EnvDescriptor {
        name: settings.conda_env.clone(),
        spec_file: ctx.paths.resolve(&settings.env_spec)?,
    };
    let active = manager.ensure(&desc, log)?;
    log.log(&format!(
        "activated environment '{}' ({})",
        active.name,
        active.prefix.display()
    ));

    let invocation = Invocation::from_args(args, &settings);
    log.log(&format!("invocation: {}", invocation.describe()));
    let cmd = job::build_command(
        &active,
        &settings,
        &ctx.paths,
        &invocation,
        path_var.as_deref(),
    )?;
    job::run_job(ctx.runner, &cmd, log)
}
