use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crossterm::style::Stylize;
use regex::Regex;

use crate::error::{Error, Result};
use crate::process::{CommandRunner, CommandSpec};

/// Menu key, label, cron expression.
pub const FREQUENCIES: [(&str, &str, &str); 5] = [
    ("1", "every 30 minutes", "*/30 * * * *"),
    ("2", "hourly", "0 * * * *"),
    ("3", "every 6 hours", "0 */6 * * *"),
    ("4", "daily at 06:00", "0 6 * * *"),
    ("5", "weekly, Monday at 06:00", "0 6 * * 1"),
];
pub const CUSTOM_OPTION: &str = "6";

const SSH_KEYS: [&str; 3] = ["id_ed25519", "id_rsa", "id_ecdsa"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    SelectFrequency,
    ConfirmSshUser { cron: String },
    BuildEntry { cron: String, user: Option<String> },
    ConfirmInstall { entry: String },
    Installed { entry: String },
    Aborted { reason: String },
}

impl InstallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallState::Installed { .. } | InstallState::Aborted { .. })
    }
}

/// What the entry points at and where the table lives.
#[derive(Debug, Clone)]
pub struct InstallTarget {
    /// Directory the entry `cd`s into before running the wrapper.
    pub dir: PathBuf,
    pub wrapper: PathBuf,
    /// Used to look for SSH key material.
    pub home: Option<PathBuf>,
    pub crontab: PathBuf,
}

impl InstallTarget {
    pub fn new(dir: PathBuf, wrapper: PathBuf, home: Option<PathBuf>) -> Self {
        Self {
            dir,
            wrapper,
            home,
            crontab: PathBuf::from("crontab"),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.wrapper.is_file() {
            return Err(Error::msg(format!(
                "run wrapper not found: {}",
                self.wrapper.display()
            )));
        }
        Ok(())
    }
}

pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// `<cron> cd '<dir>' && [UPLOAD_USER='<user>' ]'<wrapper>' >/dev/null 2>&1`
pub fn build_entry(cron: &str, dir: &Path, user: Option<&str>, wrapper: &Path) -> String {
    let user_part = user
        .map(|u| format!("UPLOAD_USER={} ", shell_quote(u)))
        .unwrap_or_default();
    format!(
        "{cron} cd {} && {user_part}{} >/dev/null 2>&1",
        shell_quote(&dir.display().to_string()),
        shell_quote(&wrapper.display().to_string()),
    )
}

/// Five cron fields made of digits and `*/,-`.
pub fn validate_cron(expr: &str) -> Result<String> {
    let field = Regex::new(r"^[0-9*/,\-]+$").map_err(|e| Error::msg(format!("regex error: {e}")))?;
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 || !fields.iter().all(|f| field.is_match(f)) {
        return Err(Error::msg(format!("invalid cron expression '{}'", expr.trim())));
    }
    Ok(fields.join(" "))
}

/// Drop every line that references `wrapper`, bare or in the quoted form
/// [`build_entry`] writes, then append `entry`. Other lines are kept byte for byte.
pub fn merge_entry(existing: &str, wrapper: &Path, entry: &str) -> String {
    let raw = wrapper.display().to_string();
    let quoted = shell_quote(&raw);
    let mut out = String::new();
    for line in existing.lines() {
        if line.contains(&raw) || line.contains(&quoted) {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(entry);
    out.push('\n');
    out
}

/// Current table; a failing `crontab -l` ("no crontab for user") reads as empty.
pub fn read_crontab(runner: &dyn CommandRunner, crontab: &Path) -> Result<String> {
    let out = runner.run_capture(&CommandSpec::new(crontab).arg("-l"))?;
    if !out.status.success() {
        tracing::debug!("crontab -l failed ({}); treating table as empty", out.status);
        return Ok(String::new());
    }
    Ok(out.stdout)
}

pub fn install_entry(
    runner: &dyn CommandRunner,
    crontab: &Path,
    wrapper: &Path,
    entry: &str,
) -> Result<()> {
    let current = read_crontab(runner, crontab)?;
    let updated = merge_entry(&current, wrapper, entry);
    let out = runner.run(&CommandSpec::new(crontab).arg("-").stdin(updated))?;
    if !out.status.success() {
        return Err(Error::msg(format!(
            "crontab install failed ({}): {}",
            out.status,
            out.output.trim()
        )));
    }
    Ok(())
}

/// Interactive installer. Input and output are injected so the whole dialogue
/// can be scripted.
pub struct Installer<'a, R, W> {
    input: R,
    out: W,
    target: InstallTarget,
    runner: &'a dyn CommandRunner,
}

impl<'a, R: BufRead, W: Write> Installer<'a, R, W> {
    pub fn new(input: R, out: W, target: InstallTarget, runner: &'a dyn CommandRunner) -> Self {
        Self {
            input,
            out,
            target,
            runner,
        }
    }

    pub fn run(&mut self) -> Result<InstallState> {
        let mut state = InstallState::SelectFrequency;
        while !state.is_terminal() {
            state = self.step(state)?;
        }
        Ok(state)
    }

    pub fn step(&mut self, state: InstallState) -> Result<InstallState> {
        match state {
            InstallState::SelectFrequency => self.select_frequency(),
            InstallState::ConfirmSshUser { cron } => self.confirm_ssh_user(cron),
            InstallState::BuildEntry { cron, user } => Ok(InstallState::ConfirmInstall {
                entry: build_entry(&cron, &self.target.dir, user.as_deref(), &self.target.wrapper),
            }),
            InstallState::ConfirmInstall { entry } => self.confirm_install(entry),
            done => Ok(done),
        }
    }

    fn select_frequency(&mut self) -> Result<InstallState> {
        writeln!(self.out, "How often should the analyzer run?")?;
        for (key, label, cron) in FREQUENCIES {
            writeln!(self.out, "  {key}) {label:<26} {cron}")?;
        }
        writeln!(self.out, "  {CUSTOM_OPTION}) custom cron expression")?;
        let Some(choice) = self.prompt("Choice: ")? else {
            return Ok(aborted("no frequency selected"));
        };

        if let Some((_, _, cron)) = FREQUENCIES.iter().find(|(key, _, _)| *key == choice) {
            return Ok(InstallState::ConfirmSshUser {
                cron: cron.to_string(),
            });
        }
        if choice != CUSTOM_OPTION {
            return Ok(aborted(&format!("invalid choice '{choice}'")));
        }
        let Some(raw) = self.prompt("Cron expression (5 fields): ")? else {
            return Ok(aborted("no cron expression given"));
        };
        match validate_cron(&raw) {
            Ok(cron) => Ok(InstallState::ConfirmSshUser { cron }),
            Err(e) => Ok(aborted(&e.to_string())),
        }
    }

    fn confirm_ssh_user(&mut self, cron: String) -> Result<InstallState> {
        let user = self
            .prompt("SSH user for report upload (empty to skip): ")?
            .filter(|u| !u.is_empty());
        if let Some(u) = user.as_deref()
            && !self.has_ssh_key()
        {
            let msg = format!(
                "warning: no SSH key found in ~/.ssh ({}); uploads as '{u}' may fail",
                SSH_KEYS.join(", ")
            );
            writeln!(self.out, "{}", msg.as_str().yellow())?;
        }
        Ok(InstallState::BuildEntry { cron, user })
    }

    fn confirm_install(&mut self, entry: String) -> Result<InstallState> {
        writeln!(self.out, "Crontab entry:")?;
        writeln!(self.out, "  {entry}")?;
        let answer = self.prompt("Install it? [y/N]: ")?.unwrap_or_default();
        if !matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes") {
            return Ok(aborted("installation declined"));
        }

        install_entry(
            self.runner,
            &self.target.crontab,
            &self.target.wrapper,
            &entry,
        )?;
        writeln!(self.out, "{}", "Schedule installed.".green())?;
        Ok(InstallState::Installed { entry })
    }

    fn has_ssh_key(&self) -> bool {
        let Some(home) = self.target.home.as_ref() else {
            return false;
        };
        SSH_KEYS
            .iter()
            .any(|k| home.join(".ssh").join(k).is_file())
    }

    // `None` on end of input.
    fn prompt(&mut self, text: &str) -> Result<Option<String>> {
        write!(self.out, "{text}")?;
        self.out.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

fn aborted(reason: &str) -> InstallState {
    InstallState::Aborted {
        reason: reason.to_string(),
    }
}
