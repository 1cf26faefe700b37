use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};

use crate::error::{Error, Result};

pub const ROTATE_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;
pub const RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

const LINE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const ARCHIVE_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Append-only run log. Every line is one `write` on an `O_APPEND` handle so
/// concurrent writers interleave whole lines.
pub struct RunLog {
    path: PathBuf,
    file: Option<File>,
    mirror: bool,
}

impl RunLog {
    /// Opening never fails the run: without a file the log still mirrors to the terminal.
    pub fn open(path: impl Into<PathBuf>, mirror: bool) -> Self {
        let path = path.into();
        let file = open_append(&path)
            .map_err(|e| tracing::warn!("run log {} unavailable: {e}", path.display()))
            .ok();
        Self { path, file, mirror }
    }

    pub fn log(&mut self, msg: &str) {
        self.log_at(Local::now(), msg);
    }

    pub fn log_at(&mut self, at: DateTime<Local>, msg: &str) {
        let line = format!("{} {msg}\n", at.format(LINE_TIME_FORMAT));
        self.write_line(&line);
    }

    /// Analyzer output goes in verbatim, without a timestamp.
    pub fn append_output(&mut self, line: &str) {
        self.write_line(&format!("{line}\n"));
    }

    fn write_line(&mut self, line: &str) {
        if let Some(f) = self.file.as_mut()
            && let Err(e) = f.write_all(line.as_bytes())
        {
            tracing::warn!("failed to append to {}: {e}", self.path.display());
        }
        if self.mirror {
            print!("{line}");
        }
    }

    /// End-of-run housekeeping: size rotation, then the retention sweep.
    /// Failures are recorded and swallowed.
    pub fn maintain(&mut self) {
        match rotate_if_oversized(&self.path, ROTATE_THRESHOLD_BYTES, Local::now()) {
            Ok(Some(archived)) => {
                self.file = open_append(&self.path).ok();
                self.log(&format!("log rotated to {}", archived.display()));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("log rotation failed: {e}");
                self.log(&format!("warning: log rotation failed: {e}"));
            }
        }

        let (Some(dir), Some(name)) = (
            self.path.parent(),
            self.path.file_name().and_then(|n| n.to_str()),
        ) else {
            return;
        };
        match sweep_expired(dir, name, RETENTION, SystemTime::now()) {
            Ok(0) => {}
            Ok(n) => self.log(&format!("removed {n} expired log archive(s)")),
            Err(e) => {
                tracing::warn!("log retention sweep failed: {e}");
                self.log(&format!("warning: log retention sweep failed: {e}"));
            }
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Rename `path` to `<path>.<YYYYMMDD_HHMMSS>` once it exceeds `threshold` bytes
/// and start an empty active file. Returns the archive path when a rotation happened.
pub fn rotate_if_oversized(
    path: &Path,
    threshold: u64,
    now: DateTime<Local>,
) -> Result<Option<PathBuf>> {
    let size = match fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::msg(format!("failed to stat {}: {e}", path.display())));
        }
    };
    if size <= threshold {
        return Ok(None);
    }

    let archive = archive_path(path, now)?;
    fs::rename(path, &archive).map_err(|e| {
        Error::msg(format!(
            "failed to rotate {} -> {}: {e}",
            path.display(),
            archive.display()
        ))
    })?;
    open_append(path)
        .map_err(|e| Error::msg(format!("failed to recreate {}: {e}", path.display())))?;
    Ok(Some(archive))
}

fn archive_path(path: &Path, now: DateTime<Local>) -> Result<PathBuf> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::msg(format!("invalid log path {}", path.display())))?;
    let stamp = now.format(ARCHIVE_TIME_FORMAT).to_string();
    let mut candidate = path.with_file_name(format!("{name}.{stamp}"));
    let mut n = 1u32;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{name}.{stamp}_{n}"));
        n += 1;
    }
    Ok(candidate)
}

/// Delete archives `<file_name>.<suffix>` in `dir` whose mtime is older than
/// `retention`. The active file itself is never touched. Returns how many were removed.
pub fn sweep_expired(
    dir: &Path,
    file_name: &str,
    retention: Duration,
    now: SystemTime,
) -> Result<usize> {
    let prefix = format!("{file_name}.");
    let cutoff = now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0usize;

    for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| Error::msg(format!("walkdir error: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !name.starts_with(&prefix) || name.len() == prefix.len() {
            continue;
        }
        let modified = match entry.metadata().map(|m| m.modified()) {
            Ok(Ok(t)) => t,
            _ => continue,
        };
        if modified >= cutoff {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("failed to remove {}: {e}", entry.path().display()),
        }
    }
    Ok(removed)
}
