use crate::config::Settings;
use crate::env_manager::ActiveEnv;
use crate::error::{Error, Result};
use crate::paths::InstallPaths;
use crate::process::{CommandRunner, CommandSpec};
use crate::run_log::RunLog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub host: String,
    pub user: String,
    pub path: String,
}

/// How the analyzer is called for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Arguments given to the wrapper, forwarded untouched.
    Explicit(Vec<String>),
    /// No arguments given: upload only when an upload user is configured.
    Auto { upload: Option<UploadTarget> },
}

impl Invocation {
    pub fn from_args(args: Vec<String>, settings: &Settings) -> Self {
        if !args.is_empty() {
            return Invocation::Explicit(args);
        }
        let upload = settings.upload_user.as_ref().map(|user| UploadTarget {
            host: settings.upload_host.clone(),
            user: user.clone(),
            path: settings.upload_path.clone(),
        });
        Invocation::Auto { upload }
    }

    pub fn analyzer_args(&self) -> Vec<String> {
        match self {
            Invocation::Explicit(args) => args.clone(),
            Invocation::Auto { upload: None } => Vec::new(),
            Invocation::Auto {
                upload: Some(target),
            } => vec![
                "--upload".into(),
                "--upload-user".into(),
                target.user.clone(),
                "--upload-host".into(),
                target.host.clone(),
                "--upload-path".into(),
                target.path.clone(),
            ],
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Invocation::Explicit(args) => format!("explicit arguments: {}", args.join(" ")),
            Invocation::Auto { upload: None } => "auto mode without upload".into(),
            Invocation::Auto {
                upload: Some(target),
            } => format!("auto mode with upload to {}@{}", target.user, target.host),
        }
    }
}

/// `<env>/bin/python <analyzer> <args...>`, run from the install root with the
/// activation variables and the resolved settings in its environment.
pub fn build_command(
    env: &ActiveEnv,
    settings: &Settings,
    paths: &InstallPaths,
    invocation: &Invocation,
    inherited_path: Option<&str>,
) -> Result<CommandSpec> {
    let analyzer = paths.resolve(&settings.analyzer)?;
    if !analyzer.is_file() {
        return Err(Error::msg(format!(
            "analyzer {} not found",
            analyzer.display()
        )));
    }

    let mut cmd = CommandSpec::new(env.python())
        .arg(analyzer.display().to_string())
        .args(invocation.analyzer_args())
        .current_dir(&paths.root);
    for (k, v) in env.activation_env(inherited_path) {
        cmd = cmd.env(k, v);
    }
    for (k, v) in settings.analyzer_env() {
        cmd = cmd.env(k, v);
    }
    Ok(cmd)
}

/// Run the analyzer to completion, appending its output to the run log.
/// A non-zero exit becomes an error carrying the analyzer's own code.
pub fn run_job(
    runner: &dyn CommandRunner,
    cmd: &CommandSpec,
    log: &mut RunLog,
) -> Result<()> {
    log.log(&format!("running {cmd}"));
    let status = runner.run_streaming(cmd, &mut |line| log.append_output(line))?;
    if !status.success() {
        log.log(&format!("analyzer failed: {status}"));
        return Err(Error::job_failed(status.code));
    }
    log.log("analyzer finished successfully");
    Ok(())
}
