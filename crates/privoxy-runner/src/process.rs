use std::fmt;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread::JoinHandle;

use crate::error::{Error, Result};
use crate::log_sanitize::clean_output_line;

/// One external program invocation: conda, the analyzer, crontab.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.env.push((k.into(), v.into()));
        self
    }

    pub fn stdin(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    /// `None` when the child was killed by a signal.
    pub code: Option<i32>,
}

impl CommandStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(c) => write!(f, "exit status {c}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: CommandStatus,
    /// stdout and stderr interleaved in arrival order, one line per entry.
    pub output: String,
}

/// Stdout exactly as the program wrote it: blank lines, trailing spaces and
/// control characters intact, stderr excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedStdout {
    pub status: CommandStatus,
    pub stdout: String,
}

pub trait CommandRunner {
    /// Run to completion, handing each combined stdout/stderr line to `on_line`.
    /// An `Err` means the program could not be run at all; a non-zero exit is
    /// reported through the returned status.
    fn run_streaming(
        &self,
        cmd: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<CommandStatus>;

    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        let mut output = String::new();
        let status = self.run_streaming(cmd, &mut |line| {
            output.push_str(line);
            output.push('\n');
        })?;
        Ok(CommandOutput { status, output })
    }

    /// For output that is data (a crontab, JSON) rather than log text.
    /// Runners whose `run_streaming` only ever reports stdout can keep this default.
    fn run_capture(&self, cmd: &CommandSpec) -> Result<CapturedStdout> {
        let out = self.run(cmd)?;
        Ok(CapturedStdout {
            status: out.status,
            stdout: out.output,
        })
    }
}

/// Runs real processes. No timeout is applied; the caller blocks until the child exits.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn spawn(spec: &CommandSpec) -> Result<(Child, Option<JoinHandle<()>>)> {
        tracing::debug!("exec: {spec}");
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = spec.cwd.as_ref() {
            cmd.current_dir(dir);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }

        // stdin stays detached unless we feed it: cron runs have no TTY and an
        // interactive conda/ssh prompt must fail fast instead of hanging.
        let mut child = cmd
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::msg(format!("failed to run {}: {e}", spec.program.display())))?;

        let feeder = match (child.stdin.take(), spec.stdin.clone()) {
            (Some(mut pipe), Some(data)) => Some(std::thread::spawn(move || {
                let _ = pipe.write_all(data.as_bytes());
            })),
            _ => None,
        };
        Ok((child, feeder))
    }
}

impl CommandRunner for SystemRunner {
    fn run_streaming(
        &self,
        spec: &CommandSpec,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<CommandStatus> {
        let (mut child, feeder) = Self::spawn(spec)?;

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            std::thread::spawn(move || forward_lines(out, tx));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            std::thread::spawn(move || forward_lines(err, tx));
        }
        drop(tx);

        for line in rx {
            let line = clean_output_line(&line);
            if line.is_empty() {
                continue;
            }
            on_line(&line);
        }

        if let Some(h) = feeder {
            let _ = h.join();
        }
        let status = child
            .wait()
            .map_err(|e| Error::msg(format!("wait failed for {}: {e}", spec.program.display())))?;
        tracing::debug!("exit: {spec} -> {status}");
        Ok(CommandStatus {
            code: status.code(),
        })
    }

    fn run_capture(&self, spec: &CommandSpec) -> Result<CapturedStdout> {
        let (child, feeder) = Self::spawn(spec)?;
        let out = child
            .wait_with_output()
            .map_err(|e| Error::msg(format!("wait failed for {}: {e}", spec.program.display())))?;
        if let Some(h) = feeder {
            let _ = h.join();
        }
        for line in String::from_utf8_lossy(&out.stderr).lines() {
            tracing::debug!("{}: {line}", spec.program.display());
        }
        tracing::debug!("exit: {spec} -> {}", out.status);
        Ok(CapturedStdout {
            status: CommandStatus {
                code: out.status.code(),
            },
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        })
    }
}

// Both `\n` and `\r` end a line, so progress redraws arrive as separate
// entries. A line that never ends is forwarded in MAX_LINE_BYTES pieces.
fn forward_lines<R: Read>(pipe: R, tx: mpsc::Sender<String>) {
    const MAX_LINE_BYTES: usize = 16 * 1024;
    let mut reader = BufReader::new(pipe);
    let mut line: Vec<u8> = Vec::with_capacity(256);
    let send = |line: &mut Vec<u8>| {
        let text = String::from_utf8_lossy(line).into_owned();
        line.clear();
        tx.send(text).is_ok()
    };

    loop {
        let chunk = match reader.fill_buf() {
            Ok([]) => break,
            Ok(chunk) => chunk,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        let len = chunk.len();
        for &b in chunk {
            let full = match b {
                b'\n' | b'\r' => !line.is_empty(),
                _ => {
                    line.push(b);
                    line.len() >= MAX_LINE_BYTES
                }
            };
            if full && !send(&mut line) {
                return;
            }
        }
        reader.consume(len);
    }

    if !line.is_empty() {
        send(&mut line);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_both_streams_and_status() {
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg("echo out; echo err >&2; exit 3");
        let out = SystemRunner.run(&spec).expect("run");
        assert_eq!(out.status.code, Some(3));
        assert!(!out.status.success());
        assert!(out.output.contains("out\n"));
        assert!(out.output.contains("err\n"));
    }

    #[test]
    fn feeds_stdin_and_honours_cwd_and_env() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg("cat; pwd; echo \"$GREETING\"")
            .current_dir(tmp.path())
            .env("GREETING", "hello")
            .stdin("line from stdin\n");
        let out = SystemRunner.run(&spec).expect("run");
        assert!(out.status.success());
        let lines: Vec<&str> = out.output.lines().collect();
        assert_eq!(lines[0], "line from stdin");
        assert!(lines[1].ends_with(
            tmp.path()
                .file_name()
                .and_then(|s| s.to_str())
                .expect("name")
        ));
        assert_eq!(lines[2], "hello");
    }

    #[test]
    fn capture_keeps_stdout_verbatim_and_drops_stderr() {
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg("printf 'a\\n\\n  b   \\n\\033[1mc\\n'; echo noise >&2");
        let out = SystemRunner.run_capture(&spec).expect("capture");
        assert!(out.status.success());
        assert_eq!(out.stdout, "a\n\n  b   \n\u{1b}[1mc\n");
    }

    #[test]
    fn long_lines_are_forwarded_in_pieces() {
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg("head -c 40000 /dev/zero | tr '\\0' 'x'; printf '\\rdone\\n'");
        let out = SystemRunner.run(&spec).expect("run");
        let lines: Vec<&str> = out.output.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with("...[truncated]"));
        assert_eq!(lines[2].len(), 40000 - 2 * 16 * 1024);
        assert_eq!(lines[3], "done");
    }

    #[test]
    fn missing_program_is_an_error() {
        let err = SystemRunner
            .run(&CommandSpec::new("/nonexistent/privoxy-test-binary"))
            .expect_err("spawn should fail");
        assert!(err.to_string().contains("failed to run"));
    }
}
