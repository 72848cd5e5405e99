use std::fs::File;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

#[derive(Debug)]
pub(crate) enum ToolError {
    NotFound(String),
    TimedOut(Duration),
    Failed(String),
}

/// Runs an external tool that writes its results to files, killing it at `timeout`.
///
/// Blocks the calling thread; callers run on `spawn_blocking` workers. stderr
/// is spooled to `scratch/stderr.log` so a chatty tool can never block on a pipe.
pub(crate) fn run_tool(
    command: &mut Command,
    scratch: &Path,
    timeout: Duration,
) -> Result<(), ToolError> {
    let stderr_path = scratch.join("stderr.log");
    let stderr = File::create(&stderr_path).map_err(|error| ToolError::Failed(error.to_string()))?;
    let program = command.get_program().to_string_lossy().to_string();

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(stderr))
        .spawn()
        .map_err(|error| match error.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                ToolError::NotFound(format!("{program}: {error}"))
            }
            _ => ToolError::Failed(error.to_string()),
        })?;

    match child.wait_timeout(timeout) {
        Ok(Some(status)) if status.success() => Ok(()),
        Ok(Some(status)) => {
            let details = std::fs::read_to_string(&stderr_path).unwrap_or_default();
            Err(ToolError::Failed(format!("{status}: {}", details.trim())))
        }
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(ToolError::TimedOut(timeout))
        }
        Err(error) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(ToolError::Failed(error.to_string()))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_reported_as_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut command = Command::new("definitely-not-an-installed-tool-7f3a");
        let result = run_tool(&mut command, dir.path(), Duration::from_secs(1));
        assert!(matches!(result, Err(ToolError::NotFound(_))));
    }

    #[test]
    fn slow_tool_is_killed_at_deadline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut command = Command::new("sleep");
        command.arg("5");
        let started = std::time::Instant::now();
        let result = run_tool(&mut command, dir.path(), Duration::from_millis(100));
        assert!(matches!(result, Err(ToolError::TimedOut(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn quick_tool_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut command = Command::new("true");
        assert!(run_tool(&mut command, dir.path(), Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn failing_tool_carries_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut command = Command::new("sh");
        command.args(["-c", "echo broken page >&2; exit 3"]);
        match run_tool(&mut command, dir.path(), Duration::from_secs(5)) {
            Err(ToolError::Failed(details)) => assert!(details.contains("broken page")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
