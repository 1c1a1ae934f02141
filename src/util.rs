//! Shared helpers: JSON extraction from noisy process output and running an
//! external command with a JSON request on stdin.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Extract the first balanced JSON object from text that may contain other content.
///
/// A fenced ```json block wins when present. Braces inside string literals
/// are ignored while counting depth.
pub fn extract_json_object(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let after_marker = &text[start + 7..];
        if let Some(end) = after_marker.find("```") {
            if let Some(found) = balanced_object(&after_marker[..end]) {
                return Some(found);
            }
        }
    }

    balanced_object(text)
}

fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Spawn `program args...`, write `input` to its stdin, and collect stdout.
///
/// The child is killed if it outlives `timeout` or the returned future is
/// dropped. A non-zero exit status is an error.
pub async fn run_command(
    program: &str,
    args: &[String],
    working_dir: Option<&Path>,
    input: &str,
    timeout: Duration,
) -> Result<String> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn '{}'", program))?;

    let exchange = async {
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .context("Failed to write request to stdin")?;
            stdin.shutdown().await.context("Failed to close stdin")?;
        }

        let mut stdout = child.stdout.take().context("Failed to get stdout")?;
        let mut stderr = child.stderr.take().context("Failed to get stderr")?;
        let mut out = String::new();
        let mut err = String::new();
        let (read_out, read_err) = tokio::join!(
            stdout.read_to_string(&mut out),
            stderr.read_to_string(&mut err)
        );
        read_out.context("Failed to read stdout")?;
        read_err.context("Failed to read stderr")?;

        let status = child.wait().await.context("Failed to wait for process")?;
        if !status.success() {
            anyhow::bail!(
                "'{}' exited with code {}: {}",
                program,
                status.code().unwrap_or(-1),
                err.trim()
            );
        }
        Ok::<_, anyhow::Error>(out)
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .with_context(|| format!("'{}' timed out after {:?}", program, timeout))?
}
