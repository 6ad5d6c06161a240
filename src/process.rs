use std::fmt;
use std::io::{Read, Write};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::Duration;

use wait_timeout::ChildExt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeoutInfo {
    pub label: String,
    pub timeout_secs: u64,
}

#[derive(Debug)]
pub enum ProcessError {
    Timeout(TimeoutInfo),
    Message(String),
}

impl ProcessError {
    pub fn timeout_info(&self) -> Option<&TimeoutInfo> {
        match self {
            Self::Timeout(info) => Some(info),
            Self::Message(_) => None,
        }
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(info) => {
                write!(f, "{} timed out after {}s", info.label, info.timeout_secs)
            }
            Self::Message(msg) => write!(f, "{msg}"),
        }
    }
}

fn timeout_error(label: &str, timeout_secs: u64) -> ProcessError {
    ProcessError::Timeout(TimeoutInfo {
        label: label.to_string(),
        timeout_secs,
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut p) = pipe {
            let _ = p.read_to_end(&mut buf);
        }
        buf
    })
}

/// Runs `cmd` with piped output, bounded by `timeout_secs`. Pipes are
/// drained on worker threads so a chatty child cannot block on a full pipe.
pub fn run_command_output_with_timeout(
    cmd: Command,
    label: &str,
    timeout_secs: u64,
) -> Result<Output, ProcessError> {
    run_command_with_stdin_output_with_timeout(cmd, None, label, timeout_secs)
}

pub fn run_command_with_stdin_output_with_timeout(
    mut cmd: Command,
    stdin_text: Option<&str>,
    label: &str,
    timeout_secs: u64,
) -> Result<Output, ProcessError> {
    let timeout_secs = timeout_secs.max(1);
    cmd.stdin(if stdin_text.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());
    let mut child = cmd
        .spawn()
        .map_err(|e| ProcessError::Message(format!("{label} spawn failed: {e}")))?;
    if let Some(text) = stdin_text
        && let Some(stdin) = child.stdin.as_mut()
        && let Err(e) = stdin.write_all(text.as_bytes())
    {
        let _ = child.kill();
        let _ = child.wait();
        return Err(ProcessError::Message(format!(
            "{label} failed writing stdin: {e}"
        )));
    }
    let _ = child.stdin.take();
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let waited = child
        .wait_timeout(Duration::from_secs(timeout_secs))
        .map_err(|e| ProcessError::Message(format!("{label} wait timeout error: {e}")));
    match waited {
        Ok(Some(status)) => Ok(Output {
            status,
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        }),
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(timeout_error(label, timeout_secs))
        }
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(e)
        }
    }
}

/// Last non-empty stderr line, for compact failure details.
pub fn stderr_tail(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr)
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_error_returns_structured_metadata() {
        let err = timeout_error("introspect production", 17);
        let info = err.timeout_info().expect("timeout info");
        assert_eq!(info.label, "introspect production");
        assert_eq!(info.timeout_secs, 17);
        assert_eq!(err.to_string(), "introspect production timed out after 17s");
    }

    #[test]
    fn process_error_display_for_message() {
        let msg = ProcessError::Message("boom".to_string());
        assert_eq!(msg.to_string(), "boom");
        assert!(msg.timeout_info().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn stdin_is_forwarded_and_output_captured() {
        let cmd = Command::new("cat");
        let out = run_command_with_stdin_output_with_timeout(cmd, Some("ping"), "cat", 5)
            .expect("cat runs");
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout), "ping");
    }

    #[cfg(unix)]
    #[test]
    fn hung_child_is_reported_as_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_command_output_with_timeout(cmd, "sleep", 1).expect_err("must time out");
        assert!(err.timeout_info().is_some(), "{err}");
    }
}
