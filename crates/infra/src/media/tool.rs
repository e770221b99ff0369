use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

/// Failure of an external tool invocation.
#[derive(Debug)]
pub(crate) enum ToolFailure {
    /// The binary could not be started.
    Spawn(std::io::Error),
    /// The tool ran and exited unsuccessfully.
    Exit { code: Option<i32>, stderr: String },
}

impl core::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ToolFailure::Spawn(e) => write!(f, "failed to start: {e}"),
            ToolFailure::Exit { code, stderr } if stderr.is_empty() => {
                write!(f, "exit code: {code:?}")
            }
            ToolFailure::Exit { stderr, .. } => f.write_str(stderr),
        }
    }
}

/// Run `bin args...` to completion, returning stdout on success.
pub(crate) async fn run(bin: &Path, args: Vec<OsString>) -> Result<Vec<u8>, ToolFailure> {
    tracing::debug!(tool = %bin.display(), ?args, "running media tool");

    let output = Command::new(bin)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(ToolFailure::Spawn)?;

    if output.status.success() {
        return Ok(output.stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(ToolFailure::Exit {
        code: output.status.code(),
        stderr: last_lines(&stderr, 8),
    })
}

/// ffmpeg can be chatty; keep only the tail of stderr for error messages.
fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
