//! Subprocess tools: a Python REPL and a shell runner, both with wall-clock
//! timeouts. Output is combined stdout + stderr, truncated for the model.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::{Tool, ToolContext, ToolError};

const EXEC_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_OUTPUT_CHARS: usize = 8_000;

async fn run_command(
    mut cmd: Command,
    what: &str,
    ctx: &ToolContext,
) -> Result<String, ToolError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| ToolError::Permanent(format!("spawning {what}: {e}")))?;

    let output = tokio::select! {
        out = tokio::time::timeout(EXEC_TIMEOUT, child.wait_with_output()) => match out {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ToolError::Permanent(format!("running {what}: {e}"))),
            Err(_) => {
                return Err(ToolError::Timeout(format!(
                    "{what} exceeded {}s", EXEC_TIMEOUT.as_secs()
                )));
            }
        },
        _ = ctx.cancel.cancelled() => {
            return Err(ToolError::Permanent("cancelled".to_string()));
        }
    };

    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !combined.is_empty() {
            combined.push('\n');
        }
        combined.push_str("stderr:\n");
        combined.push_str(&stderr);
    }
    if combined.chars().count() > MAX_OUTPUT_CHARS {
        combined = combined.chars().take(MAX_OUTPUT_CHARS).collect();
        combined.push_str("\n...[truncated]");
    }

    if output.status.success() {
        if combined.trim().is_empty() {
            Ok(format!("{what} finished with no output"))
        } else {
            Ok(combined)
        }
    } else {
        Err(ToolError::Permanent(format!(
            "{what} exited with {}: {combined}",
            output.status
        )))
    }
}

pub struct PythonReplTool;

impl PythonReplTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for PythonReplTool {
    fn name(&self) -> &'static str {
        "python_repl"
    }

    fn description(&self) -> &'static str {
        "Execute a Python snippet and return its printed output. Use print() for results."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "Python source to execute"}
            },
            "required": ["code"]
        })
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let code = args
            .get("code")
            .and_then(Value::as_str)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ToolError::Validation("missing required field: code".to_string()))?;

        debug!(chars = code.len(), "python_repl");
        let mut cmd = Command::new("python3");
        cmd.arg("-c").arg(code);
        run_command(cmd, "python", ctx).await
    }
}

pub struct BashTool;

impl BashTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &'static str {
        "bash_tool"
    }

    fn description(&self) -> &'static str {
        "Run a bash command and return its output."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "cmd": {"type": "string", "description": "The command line to run"}
            },
            "required": ["cmd"]
        })
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let cmd_line = args
            .get("cmd")
            .and_then(Value::as_str)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ToolError::Validation("missing required field: cmd".to_string()))?;

        debug!(cmd = cmd_line, "bash_tool");
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(cmd_line);
        run_command(cmd, "bash", ctx).await
    }
}
