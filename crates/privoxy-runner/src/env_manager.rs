use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::process::{CommandRunner, CommandSpec};
use crate::run_log::RunLog;

// Probed in order, each as `<root>/bin/conda`.
const HOME_ROOTS: [&str; 5] = ["miniconda3", "anaconda3", "miniforge3", "mambaforge", ".conda"];
const SYSTEM_ROOTS: [&str; 5] = [
    "/opt/conda",
    "/opt/miniconda3",
    "/opt/anaconda3",
    "/usr/local/miniconda3",
    "/usr/local/anaconda3",
];

pub fn candidate_paths(home: Option<&Path>) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(home) = home {
        for root in HOME_ROOTS {
            out.push(home.join(root).join("bin").join("conda"));
        }
    }
    for root in SYSTEM_ROOTS {
        out.push(Path::new(root).join("bin").join("conda"));
    }
    out
}

/// Find the conda executable: explicit override, then well-known install
/// roots, then `PATH`.
pub fn locate_conda(
    override_path: Option<&Path>,
    home: Option<&Path>,
    path_var: Option<&OsStr>,
) -> Result<PathBuf> {
    if let Some(p) = override_path {
        if is_executable(p) {
            return Ok(p.to_path_buf());
        }
        return Err(Error::msg(format!(
            "conda from PRIVOXY_CONDA is not an executable file: {}",
            p.display()
        )));
    }

    for candidate in candidate_paths(home) {
        tracing::debug!("probing {}", candidate.display());
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }

    if let Some(found) = path_var.and_then(|pv| search_path("conda", pv)) {
        return Ok(found);
    }

    Err(Error::msg(
        "conda not found (checked ~/miniconda3, ~/anaconda3, ~/miniforge3, ~/mambaforge, /opt/conda and PATH)",
    ))
}

fn search_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|p| is_executable(p))
}

fn is_executable(p: &Path) -> bool {
    let Ok(meta) = p.metadata() else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Named environment plus the declarative spec it is created from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvDescriptor {
    pub name: String,
    pub spec_file: PathBuf,
}

/// An activated environment: what `conda activate` would have put in the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveEnv {
    pub name: String,
    pub prefix: PathBuf,
}

impl ActiveEnv {
    pub fn bin_dir(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    pub fn python(&self) -> PathBuf {
        self.bin_dir().join("python")
    }

    pub fn activation_env(&self, inherited_path: Option<&str>) -> Vec<(String, String)> {
        let bin = self.bin_dir().display().to_string();
        let path = match inherited_path.filter(|p| !p.is_empty()) {
            Some(rest) => format!("{bin}:{rest}"),
            None => bin,
        };
        vec![
            ("PATH".into(), path),
            ("CONDA_PREFIX".into(), self.prefix.display().to_string()),
            ("CONDA_DEFAULT_ENV".into(), self.name.clone()),
        ]
    }
}

#[derive(Debug, Deserialize)]
struct EnvList {
    #[serde(default)]
    envs: Vec<PathBuf>,
}

/// Name conda shows for a prefix: `<root>/envs/<name>` → `<name>`, the root itself → `base`.
pub fn env_name(prefix: &Path) -> Option<String> {
    let parent_is_envs = prefix
        .parent()
        .and_then(|p| p.file_name())
        .is_some_and(|n| n == "envs");
    if parent_is_envs {
        prefix.file_name().and_then(|n| n.to_str()).map(str::to_string)
    } else {
        Some("base".to_string())
    }
}

pub struct EnvManager<'a> {
    conda: PathBuf,
    runner: &'a dyn CommandRunner,
}

impl<'a> EnvManager<'a> {
    pub fn new(conda: PathBuf, runner: &'a dyn CommandRunner) -> Self {
        Self { conda, runner }
    }

    pub fn list_envs(&self) -> Result<Vec<PathBuf>> {
        let cmd = CommandSpec::new(&self.conda).args(["env", "list", "--json"]);
        let out = self.runner.run_capture(&cmd)?;
        if !out.status.success() {
            return Err(Error::msg(format!(
                "`conda env list` failed ({}): {}",
                out.status,
                out.stdout.trim()
            )));
        }
        parse_env_list(&out.stdout)
    }

    pub fn find(&self, name: &str) -> Result<Option<PathBuf>> {
        Ok(self
            .list_envs()?
            .into_iter()
            .find(|prefix| env_name(prefix).as_deref() == Some(name)))
    }

    /// Create the environment unless one with the same name already exists, then activate it.
    pub fn ensure(&self, desc: &EnvDescriptor, log: &mut RunLog) -> Result<ActiveEnv> {
        match self.find(&desc.name)? {
            Some(prefix) => {
                log.log(&format!(
                    "conda environment '{}' exists at {}; skipping creation",
                    desc.name,
                    prefix.display()
                ));
            }
            None => self.create(desc, log)?,
        }
        self.activate(desc)
    }

    pub fn create(&self, desc: &EnvDescriptor, log: &mut RunLog) -> Result<()> {
        if !desc.spec_file.is_file() {
            return Err(Error::msg(format!(
                "environment spec {} not found; cannot create '{}'",
                desc.spec_file.display(),
                desc.name
            )));
        }
        log.log(&format!(
            "creating conda environment '{}' from {}",
            desc.name,
            desc.spec_file.display()
        ));
        let cmd = CommandSpec::new(&self.conda)
            .args(["env", "create", "-n"])
            .arg(desc.name.as_str())
            .arg("-f")
            .arg(desc.spec_file.display().to_string());
        let status = self
            .runner
            .run_streaming(&cmd, &mut |line| log.append_output(line))?;
        if !status.success() {
            return Err(Error::msg(format!(
                "failed to create conda environment '{}' ({status})",
                desc.name
            )));
        }
        log.log(&format!("conda environment '{}' created", desc.name));
        Ok(())
    }

    pub fn activate(&self, desc: &EnvDescriptor) -> Result<ActiveEnv> {
        let prefix = self.find(&desc.name)?.ok_or_else(|| {
            Error::msg(format!(
                "failed to activate environment '{}': not listed by conda",
                desc.name
            ))
        })?;
        let env = ActiveEnv {
            name: desc.name.clone(),
            prefix,
        };
        if !env.python().is_file() {
            return Err(Error::msg(format!(
                "failed to activate environment '{}': {} missing",
                desc.name,
                env.python().display()
            )));
        }
        Ok(env)
    }
}

// conda may print warnings around the JSON document; read only the first object.
fn parse_env_list(raw: &str) -> Result<Vec<PathBuf>> {
    let start = raw
        .find('{')
        .ok_or_else(|| Error::msg("`conda env list --json` produced no JSON"))?;
    let list = serde_json::Deserializer::from_str(&raw[start..])
        .into_iter::<EnvList>()
        .next()
        .ok_or_else(|| Error::msg("`conda env list --json` produced no JSON"))?
        .map_err(|e| Error::msg(format!("invalid `conda env list` output: {e}")))?;
    Ok(list.envs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[cfg(unix)]
    fn make_executable(p: &Path) {
        use std::os::unix::fs::PermissionsExt;
        fs::create_dir_all(p.parent().expect("parent")).expect("mkdir");
        fs::write(p, "#!/bin/sh\n").expect("write");
        fs::set_permissions(p, fs::Permissions::from_mode(0o755)).expect("chmod");
    }

    #[test]
    fn names_prefixes_like_conda() {
        assert_eq!(
            env_name(Path::new("/home/u/miniconda3/envs/privoxy-analyzer")).as_deref(),
            Some("privoxy-analyzer")
        );
        assert_eq!(env_name(Path::new("/home/u/miniconda3")).as_deref(), Some("base"));
    }

    #[test]
    fn parses_env_list_with_surrounding_noise() {
        let raw = "==> WARNING: A newer version of conda exists. <==\n{\n\"envs\": [\"/opt/conda\", \"/opt/conda/envs/a\"]\n}\ntrailing\n";
        let envs = parse_env_list(raw).expect("parse");
        assert_eq!(
            envs,
            vec![PathBuf::from("/opt/conda"), PathBuf::from("/opt/conda/envs/a")]
        );
        assert!(parse_env_list("no json here").is_err());
    }

    #[test]
    fn activation_prepends_env_bin_to_path() {
        let env = ActiveEnv {
            name: "privoxy-analyzer".into(),
            prefix: PathBuf::from("/opt/conda/envs/privoxy-analyzer"),
        };
        let vars = env.activation_env(Some("/usr/bin:/bin"));
        assert_eq!(
            vars[0],
            (
                "PATH".to_string(),
                "/opt/conda/envs/privoxy-analyzer/bin:/usr/bin:/bin".to_string()
            )
        );
        assert_eq!(env.python(), PathBuf::from("/opt/conda/envs/privoxy-analyzer/bin/python"));
    }

    #[cfg(unix)]
    #[test]
    fn probes_home_roots_before_path() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let home = tmp.path().join("home");
        let in_home = home.join("miniforge3/bin/conda");
        let on_path = tmp.path().join("bin/conda");
        make_executable(&in_home);
        make_executable(&on_path);

        let path_var = std::ffi::OsString::from(tmp.path().join("bin"));
        let found = locate_conda(None, Some(&home), Some(&path_var)).expect("found");
        assert_eq!(found, in_home);

        fs::remove_file(&in_home).expect("rm");
        if candidate_paths(None).iter().any(|p| is_executable(p)) {
            return;
        }
        let found = locate_conda(None, Some(&home), Some(&path_var)).expect("found");
        assert_eq!(found, on_path);
    }

    #[cfg(unix)]
    #[test]
    fn missing_conda_is_reported() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let empty = std::ffi::OsString::from(tmp.path());
        // System roots may exist on a developer box; only assert when they do not.
        if candidate_paths(None).iter().any(|p| is_executable(p)) {
            return;
        }
        let err = locate_conda(None, Some(tmp.path()), Some(&empty)).expect_err("not found");
        assert!(err.to_string().contains("conda not found"));

        let bogus = tmp.path().join("nope");
        let err = locate_conda(Some(&bogus), None, None).expect_err("bad override");
        assert!(err.to_string().contains("PRIVOXY_CONDA"));
    }
}
