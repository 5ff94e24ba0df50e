//! Shell execution tool.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use crewdesk_core::error::ToolError;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::builtin::{RiskClass, Tool};
use crate::context::ToolCtx;
use crate::schema::{truncate_chars, SchemaBuilder};

/// Hard clamp on the per-command timeout.
const MAX_TIMEOUT_MS: u64 = 600_000;
const DEFAULT_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Deserialize)]
struct ShellRunArgs {
    command: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Run a shell command with CWD at the workspace root.
///
/// The command runs through `/bin/sh -c` in its own process group so a
/// timeout or cancellation tears down the whole tree. Output is captured
/// with lossy UTF-8 conversion and truncated per stream.
pub struct ShellRunTool;

#[async_trait]
impl Tool for ShellRunTool {
    fn name(&self) -> &'static str {
        "shell_run"
    }

    fn description(&self) -> &'static str {
        "Execute a shell command with the workspace root as working directory (disabled unless the shell capability is on)"
    }

    fn risk(&self) -> RiskClass {
        RiskClass::DangerousShell
    }

    fn input_schema(&self) -> Value {
        SchemaBuilder::new()
            .property("command", json!({"type": "string", "minLength": 1}))
            .property(
                "timeout_ms",
                json!({
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_TIMEOUT_MS,
                    "default": DEFAULT_TIMEOUT_MS,
                }),
            )
            .required("command")
            .build()
    }

    fn timeout(&self) -> Duration {
        // Above the clamp so the per-command timeout decides.
        Duration::from_millis(MAX_TIMEOUT_MS + 30_000)
    }

    async fn call(&self, args: Value, ctx: &ToolCtx) -> Result<Value, ToolError> {
        let args: ShellRunArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_arguments("shell_run", e.to_string()))?;
        let timeout_ms = args.timeout_ms.clamp(1, MAX_TIMEOUT_MS);

        info!(command = %args.command, timeout_ms, "executing shell command");

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(&args.command)
            .current_dir(ctx.workspace.root())
            .env("PWD", ctx.workspace.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let start = Instant::now();
        let child = cmd.spawn().map_err(|e| ToolError::failed(format!("spawn: {e}")))?;

        let (timed_out, output) = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                // Dropping the child kills the process group.
                return Err(ToolError::failed("cancelled"));
            }
            outcome = timeout(Duration::from_millis(timeout_ms), child.wait_with_output()) => {
                match outcome {
                    Ok(Ok(output)) => (false, Some(output)),
                    Ok(Err(e)) => return Err(ToolError::failed(format!("wait: {e}"))),
                    Err(_) => (true, None),
                }
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let (exit_code, signal, mut stdout, mut stderr) = match output {
            Some(output) => {
                #[cfg(unix)]
                let signal = {
                    use std::os::unix::process::ExitStatusExt;
                    output.status.signal()
                };
                #[cfg(not(unix))]
                let signal: Option<i32> = None;
                (
                    output.status.code(),
                    signal,
                    String::from_utf8_lossy(&output.stdout).into_owned(),
                    String::from_utf8_lossy(&output.stderr).into_owned(),
                )
            }
            None => (None, None, String::new(), String::new()),
        };

        let budget = ctx.limits.max_tool_output_chars;
        if stdout.chars().count() + stderr.chars().count() > budget {
            stdout = truncate_chars(&stdout, budget / 2);
            stderr = truncate_chars(&stderr, budget / 2);
        }

        debug!(?exit_code, timed_out, duration_ms, "shell command finished");

        Ok(json!({
            "exit_code": exit_code,
            "signal": signal,
            "stdout": stdout,
            "stderr": stderr,
            "duration_ms": duration_ms,
            "timed_out": timed_out,
        }))
    }
}
