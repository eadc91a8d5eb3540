//! External tool invocation with a time budget.
//!
//! Every converter and compiler (`soffice`, `pdftoppm`, `pdftotext`,
//! `pptx2md`, `latexmk`, `pdflatex`) goes through [`run_tool`] so that a hung
//! process is killed instead of stalling a worker forever.

use crate::error::ToolError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// Captured output of a successful tool run.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `program args…`, optionally inside `cwd`, killing it after `timeout_secs`.
///
/// A binary missing from `PATH` maps to [`ToolError::Missing`]; a non-zero
/// exit maps to [`ToolError::Failed`] with the tail of stderr.
pub async fn run_tool<S: AsRef<std::ffi::OsStr>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
    timeout_secs: u64,
) -> Result<ToolOutput, ToolError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    debug!("Running {} ({} args)", program, args.len());

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ToolError::Missing {
                tool: program.to_string(),
            }
        } else {
            ToolError::Spawn {
                tool: program.to_string(),
                source: e,
            }
        }
    })?;

    // Dropping the future on timeout drops the child, which kills it.
    let output = match timeout(Duration::from_secs(timeout_secs), child.wait_with_output()).await
    {
        Ok(res) => res.map_err(|e| ToolError::Spawn {
            tool: program.to_string(),
            source: e,
        })?,
        Err(_) => {
            return Err(ToolError::Timeout {
                tool: program.to_string(),
                secs: timeout_secs,
            })
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(ToolError::Failed {
            tool: program.to_string(),
            status: output.status.to_string(),
            stderr: tail(&stderr, 2000),
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

/// Locate `program` on `PATH`.
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Last `max` bytes of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> String {
    let s = s.trim_end();
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &s[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_tool_is_reported() {
        let err = run_tool::<&str>("definitely-not-a-real-tool-xyz", &[], None, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Missing { .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let err = run_tool("sh", &["-c", "echo oops >&2; exit 3"], None, 5)
            .await
            .unwrap_err();
        match err {
            ToolError::Failed { stderr, .. } => assert!(stderr.contains("oops")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_is_captured() {
        let out = run_tool("sh", &["-c", "printf hello; printf 'font warning' >&2"], None, 5)
            .await
            .unwrap();
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.stderr, "font warning");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_tool_times_out() {
        let err = run_tool("sleep", &["5"], None, 1).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { secs: 1, .. }), "got {err:?}");
    }

    #[test]
    fn tail_keeps_short_strings() {
        assert_eq!(tail("abc\n", 10), "abc");
        assert_eq!(tail("abcdef", 3), "…def");
    }
}
