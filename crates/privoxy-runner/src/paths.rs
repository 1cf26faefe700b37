use std::fs;
use std::path::{Path, PathBuf};

use crate::config::EnvSource;
use crate::error::{Error, Result};

pub const ROOT_ENV: &str = "PRIVOXY_RUNNER_HOME";
pub const CONFIG_FILE: &str = ".env";
pub const LOG_DIR: &str = "logs";
pub const LOG_FILE: &str = "privoxy-run.log";
pub const LOCK_FILE: &str = "privoxy-run.lock";
pub const WRAPPER_BIN: &str = "privoxy-run";

/// Fixed layout under the installation directory.
#[derive(Debug, Clone)]
pub struct InstallPaths {
    pub root: PathBuf,
    pub config_file: PathBuf,
    pub log_dir: PathBuf,
    pub log_file: PathBuf,
    pub lock_file: PathBuf,
}

impl InstallPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let log_dir = root.join(LOG_DIR);
        Self {
            config_file: root.join(CONFIG_FILE),
            log_file: log_dir.join(LOG_FILE),
            lock_file: log_dir.join(LOCK_FILE),
            log_dir,
            root,
        }
    }

    /// Resolve a setting that names a file relative to the install root
    /// (analyzer script, environment spec). Absolute values are used as-is.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::msg("empty path"));
        }
        let pb = PathBuf::from(raw);
        Ok(if pb.is_absolute() { pb } else { self.root.join(pb) })
    }

    pub fn ensure_log_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.log_dir).map_err(|e| {
            Error::msg(format!(
                "failed to create log dir {}: {e}",
                self.log_dir.display()
            ))
        })
    }
}

/// `PRIVOXY_RUNNER_HOME` when set, otherwise the directory holding `exe`.
pub fn install_root(env: &dyn EnvSource, exe: &Path) -> Result<PathBuf> {
    if let Some(raw) = env.var(ROOT_ENV) {
        let raw = raw.trim();
        if !raw.is_empty() {
            return absolute(Path::new(raw));
        }
    }
    let dir = exe
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| Error::msg(format!("cannot derive install dir from {}", exe.display())))?;
    absolute(dir)
}

pub fn current_exe() -> Result<PathBuf> {
    std::env::current_exe().map_err(|e| Error::msg(format!("cannot locate own executable: {e}")))
}

fn absolute(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        return Ok(p.canonicalize().unwrap_or_else(|_| p.to_path_buf()));
    }
    let cwd = std::env::current_dir().map_err(|e| Error::msg(format!("cwd error: {e}")))?;
    let joined = cwd.join(p);
    Ok(joined.canonicalize().unwrap_or(joined))
}
