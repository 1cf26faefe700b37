use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::error::{Error, Result};

pub const DEFAULT_UPLOAD_HOST: &str = "your-server.com";
pub const DEFAULT_UPLOAD_PATH: &str = "~/public_html/reports";
pub const DEFAULT_MONTH_START_DAY: u8 = 27;
pub const DEFAULT_CONDA_ENV: &str = "privoxy-analyzer";
pub const DEFAULT_ENV_SPEC: &str = "environment.yml";
pub const DEFAULT_ANALYZER: &str = "main.py";

pub const KEY_SSH_HOST: &str = "PRIVOXY_SSH_HOST";
pub const KEY_SSH_USER: &str = "PRIVOXY_SSH_USER";
pub const KEY_LOG_PATH: &str = "PRIVOXY_LOG_PATH";
pub const KEY_DATA_DIR: &str = "PRIVOXY_DATA_DIR";
pub const KEY_TARGET_DOMAIN: &str = "PRIVOXY_TARGET_DOMAIN";
pub const KEY_UPLOAD_HOST: &str = "PRIVOXY_UPLOAD_HOST";
pub const KEY_UPLOAD_USER: &str = "PRIVOXY_UPLOAD_USER";
pub const KEY_UPLOAD_PATH: &str = "PRIVOXY_UPLOAD_PATH";
pub const KEY_MONTH_START_DAY: &str = "PRIVOXY_MONTH_START_DAY";
pub const KEY_CONDA_ENV: &str = "PRIVOXY_CONDA_ENV";
pub const KEY_ENV_SPEC: &str = "PRIVOXY_ENV_SPEC";
pub const KEY_ANALYZER: &str = "PRIVOXY_ANALYZER";
pub const KEY_CONDA: &str = "PRIVOXY_CONDA";

/// Short form inlined into crontab entries by the schedule installer.
pub const KEY_UPLOAD_USER_INLINE: &str = "UPLOAD_USER";

/// Source of process-level overrides. `main` passes [`ProcessEnv`]; tests pass a map.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_domain: Option<String>,
    pub upload_host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_user: Option<String>,
    pub upload_path: String,
    pub month_start_day: u8,
    pub conda_env: String,
    pub env_spec: String,
    pub analyzer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conda_override: Option<PathBuf>,
}

impl Settings {
    /// The `PRIVOXY_*` settings handed to the analyzer's environment.
    /// Only keys with a value are included.
    pub fn analyzer_env(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        let optional = [
            (KEY_SSH_HOST, &self.ssh_host),
            (KEY_SSH_USER, &self.ssh_user),
            (KEY_LOG_PATH, &self.log_path),
            (KEY_DATA_DIR, &self.data_dir),
            (KEY_TARGET_DOMAIN, &self.target_domain),
            (KEY_UPLOAD_USER, &self.upload_user),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                out.push((key, v.clone()));
            }
        }
        out.push((KEY_UPLOAD_HOST, self.upload_host.clone()));
        out.push((KEY_UPLOAD_PATH, self.upload_path.clone()));
        out.push((KEY_MONTH_START_DAY, self.month_start_day.to_string()));
        out
    }
}

/// Read `KEY=VALUE` pairs from a `.env`-style file.
///
/// Values are literal: surrounding whitespace and one pair of matching quotes
/// are stripped, nothing else. `$NAME` is not expanded and a `#` after the
/// value belongs to the value. An optional `export ` prefix is accepted.
/// A missing file yields an empty map; lines that are not `KEY=VALUE` are
/// skipped with a warning and the rest of the file is still used.
pub fn read_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    if !path.exists() {
        tracing::debug!("config file {} not found; using environment and defaults", path.display());
        return Ok(out);
    }

    let text = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    let assignment = Regex::new(r"^(?:export\s+)?([A-Za-z_][A-Za-z0-9_.]*)\s*=(.*)$")
        .map_err(|e| Error::msg(format!("regex error: {e}")))?;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(caps) = assignment.captures(line) else {
            tracing::warn!(
                "skipping malformed line {} in {}: {line}",
                idx + 1,
                path.display()
            );
            continue;
        };
        out.insert(caps[1].to_string(), unquote(caps[2].trim()).to_string());
    }
    Ok(out)
}

fn unquote(value: &str) -> &str {
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

pub fn load(file: Option<&Path>, env: &dyn EnvSource) -> Result<Settings> {
    let from_file = match file {
        Some(p) => read_file(p)?,
        None => BTreeMap::new(),
    };
    resolve(&from_file, env)
}

// Environment beats file; blank values count as unset at either level.
fn lookup(key: &str, file: &BTreeMap<String, String>, env: &dyn EnvSource) -> Option<String> {
    let clean = |v: String| {
        let v = v.trim().to_string();
        (!v.is_empty()).then_some(v)
    };
    env.var(key)
        .and_then(clean)
        .or_else(|| file.get(key).cloned().and_then(clean))
}

pub fn resolve(file: &BTreeMap<String, String>, env: &dyn EnvSource) -> Result<Settings> {
    let get = |key: &str| lookup(key, file, env);

    let upload_user = get(KEY_UPLOAD_USER_INLINE).or_else(|| get(KEY_UPLOAD_USER));

    let month_start_day = match get(KEY_MONTH_START_DAY) {
        None => DEFAULT_MONTH_START_DAY,
        Some(raw) => parse_month_start_day(&raw)?,
    };

    Ok(Settings {
        ssh_host: get(KEY_SSH_HOST),
        ssh_user: get(KEY_SSH_USER),
        log_path: get(KEY_LOG_PATH),
        data_dir: get(KEY_DATA_DIR),
        target_domain: get(KEY_TARGET_DOMAIN),
        upload_host: get(KEY_UPLOAD_HOST).unwrap_or_else(|| DEFAULT_UPLOAD_HOST.into()),
        upload_user,
        upload_path: get(KEY_UPLOAD_PATH).unwrap_or_else(|| DEFAULT_UPLOAD_PATH.into()),
        month_start_day,
        conda_env: get(KEY_CONDA_ENV).unwrap_or_else(|| DEFAULT_CONDA_ENV.into()),
        env_spec: get(KEY_ENV_SPEC).unwrap_or_else(|| DEFAULT_ENV_SPEC.into()),
        analyzer: get(KEY_ANALYZER).unwrap_or_else(|| DEFAULT_ANALYZER.into()),
        conda_override: get(KEY_CONDA).map(PathBuf::from),
    })
}

fn parse_month_start_day(raw: &str) -> Result<u8> {
    match raw.parse::<u8>() {
        Ok(day) if (1..=31).contains(&day) => Ok(day),
        _ => Err(Error::msg(format!(
            "{KEY_MONTH_START_DAY} must be a day of month (1-31), got '{raw}'"
        ))),
    }
}
