use anyhow::{bail, Context, Result};
use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;

const STDERR_TAIL_LINES: usize = 20;

/// One external tool invocation, held as discrete arguments.
///
/// The output path is kept apart from the argument list so runners can reason
/// about the target (skip checks, cleanup on failure) and so it always lands
/// last on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<OsString>,
    output: PathBuf,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            output: output.into(),
        }
    }

    /// ffmpeg with quiet logging that overwrites its output.
    pub fn ffmpeg(output: impl Into<PathBuf>) -> Self {
        Self::new("ffmpeg", output)
            .arg("-hide_banner")
            .opt("-loglevel", "error")
            .arg("-y")
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn opt(self, flag: &str, value: impl AsRef<OsStr>) -> Self {
        self.arg(flag).arg(value)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Arguments without the trailing output path.
    #[cfg(test)]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Full argument vector as passed to the process.
    pub fn argv(&self) -> Vec<OsString> {
        let mut argv = self.args.clone();
        argv.push(self.output.as_os_str().to_os_string());
        argv
    }

    /// Value following `flag`, if present.
    #[cfg(test)]
    pub fn value_of(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|idx| self.args.get(idx + 1))
            .map(|v| v.as_os_str())
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.argv());
        cmd
    }
}

/// Executes tool commands. Production code shells out to ffmpeg; tests record
/// invocations instead.
pub trait ToolRunner: Send + Sync {
    fn run(&self, cmd: &ToolCommand) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegRunner;

impl ToolRunner for FfmpegRunner {
    fn run(&self, cmd: &ToolCommand) -> Result<()> {
        let mut child = cmd
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {}", cmd.program()))?;

        let stderr = child
            .stderr
            .take()
            .with_context(|| format!("{} stderr missing", cmd.program()))?;
        let stderr_handle = spawn_stderr_collector(stderr);

        let status = child
            .wait()
            .with_context(|| format!("failed waiting for {}", cmd.program()))?;
        let stderr_tail = stderr_handle.join().unwrap_or_default();

        if !status.success() {
            // A partial file would be trusted by the skip-if-exists check on the next run.
            let _ = std::fs::remove_file(cmd.output());
            let detail = if stderr_tail.is_empty() {
                "no stderr output".to_string()
            } else {
                stderr_tail.join(" | ")
            };
            bail!(
                "{} failed for {} ({}): {}",
                cmd.program(),
                cmd.output().display(),
                status,
                detail
            );
        }
        Ok(())
    }
}

fn spawn_stderr_collector(stderr: impl Read + Send + 'static) -> JoinHandle<Vec<String>> {
    std::thread::spawn(move || {
        let mut lines = VecDeque::new();
        let mut reader = BufReader::new(stderr);
        let mut line = Vec::new();

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
            let cleaned = String::from_utf8_lossy(&line).trim().to_string();
            if cleaned.is_empty() {
                continue;
            }
            lines.push_back(cleaned);
            if lines.len() > STDERR_TAIL_LINES {
                lines.pop_front();
            }
        }

        lines.into_iter().collect::<Vec<_>>()
    })
}
