//! External tool resolution and bounded subprocess execution.
//!
//! Resolution order: environment override (`VIDSIFT_YTDLP`, `VIDSIFT_FFMPEG`,
//! `VIDSIFT_FFPROBE`, `VIDSIFT_NVIDIA_SMI`), then the bare program name on `PATH`.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::control::EvalControl;
use crate::error::EvalError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
    YtDlp,
    Ffmpeg,
    Ffprobe,
    NvidiaSmi,
}

impl Tool {
    fn env_key(self) -> &'static str {
        match self {
            Tool::YtDlp => "VIDSIFT_YTDLP",
            Tool::Ffmpeg => "VIDSIFT_FFMPEG",
            Tool::Ffprobe => "VIDSIFT_FFPROBE",
            Tool::NvidiaSmi => "VIDSIFT_NVIDIA_SMI",
        }
    }

    fn default_name(self) -> &'static str {
        match self {
            Tool::YtDlp => "yt-dlp",
            Tool::Ffmpeg => "ffmpeg",
            Tool::Ffprobe => "ffprobe",
            Tool::NvidiaSmi => "nvidia-smi",
        }
    }

    /// Program path to hand to `Command::new`.
    pub fn program(self) -> PathBuf {
        resolve_tool(self.env_key(), self.default_name())
    }

    /// True when the program runs and answers `--version`/`-version`.
    pub fn is_available(self) -> bool {
        let flag = match self {
            Tool::YtDlp => "--version",
            Tool::NvidiaSmi => "-L",
            Tool::Ffmpeg | Tool::Ffprobe => "-version",
        };
        Command::new(self.program())
            .arg(flag)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    match std::env::var(env_key) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => PathBuf::from(default_name),
    }
}

// -------------------- Bounded execution --------------------

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{program} exceeded {limit:?}")]
    TimedOut { program: String, limit: Duration },
    #[error("evaluation deadline reached while {program} was running")]
    DeadlineReached { program: String, budget: Duration },
    #[error("cancelled while {program} was running")]
    Cancelled { program: String },
    #[error("i/o error while waiting for {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    /// Map into the per-video taxonomy. Tool failures become `fallback`.
    pub fn into_eval(self, fallback: impl FnOnce(String) -> EvalError) -> EvalError {
        match self {
            ToolError::Cancelled { .. } => EvalError::Cancelled,
            ToolError::DeadlineReached { budget, .. } => EvalError::Timeout(budget),
            other => fallback(other.to_string()),
        }
    }
}

/// Captured output of a finished subprocess.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    reader.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            buf
        })
    })
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Run `cmd` to completion, killing it when `limit` passes, the evaluation deadline
/// passes, or the batch is cancelled. A non-zero exit is an error.
pub fn run_bounded(
    cmd: &mut Command,
    limit: Duration,
    control: Option<&EvalControl>,
) -> Result<ToolOutput, ToolError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let started = Instant::now();

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(source) => {
                kill_and_reap(&mut child);
                return Err(ToolError::Io { program, source });
            }
        }
        if let Some(control) = control {
            if control.is_cancelled() {
                kill_and_reap(&mut child);
                return Err(ToolError::Cancelled { program });
            }
            if control.is_expired() {
                kill_and_reap(&mut child);
                return Err(ToolError::DeadlineReached {
                    program,
                    budget: control.budget(),
                });
            }
        }
        if started.elapsed() >= limit {
            kill_and_reap(&mut child);
            return Err(ToolError::TimedOut { program, limit });
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
    let stderr = stderr
        .and_then(|h| h.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).trim().to_string())
        .unwrap_or_default();

    if !status.success() {
        return Err(ToolError::Exit {
            program,
            status,
            stderr: tail(&stderr, 400),
        });
    }
    Ok(ToolOutput { stdout, stderr })
}

/// Last `max` bytes of a message, on a char boundary.
pub(crate) fn tail(message: &str, max: usize) -> String {
    if message.len() <= max {
        return message.to_string();
    }
    let mut start = message.len() - max;
    while !message.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &message[start..])
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::control::CancelToken;

    #[test]
    fn captures_stdout_of_successful_command() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf hello"]);
        let output = run_bounded(&mut cmd, Duration::from_secs(5), None).unwrap();
        assert_eq!(output.stdout, b"hello");
    }

    #[test]
    fn kills_command_past_limit() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        let err = run_bounded(&mut cmd, Duration::from_millis(100), None).unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }));
    }

    #[test]
    fn cancellation_maps_to_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let control = EvalControl::new(cancel, Duration::from_secs(60));
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        let err = run_bounded(&mut cmd, Duration::from_secs(10), Some(&control)).unwrap_err();
        assert!(matches!(
            err.into_eval(EvalError::Download),
            EvalError::Cancelled
        ));
    }

    #[test]
    fn non_zero_exit_is_reported() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo boom >&2; exit 3"]);
        let err = run_bounded(&mut cmd, Duration::from_secs(5), None).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("abcdef", 3), "...def");
        assert_eq!(tail("abc", 10), "abc");
    }
}
