//! Shell stage: runs a script through the configured shell.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use super::set_outputs;
use crate::config::{Runtime, WorkflowConfig};
use crate::context::Context;
use crate::error::{ConfigError, Result, WorkflowError};
use crate::template::substitute_str;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellStage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Script; each line becomes one `;`-separated command.
    pub shell: String,
    /// Extra environment variables for the process.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// What a shell stage records as its outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellOutput {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ShellStage {
    pub fn new(name: impl Into<String>, shell: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            shell: shell.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub(crate) async fn execute(&self, context: &mut Context, runtime: &Runtime) -> Result<()> {
        let script = substitute_str(&self.shell, context)?;
        let command = join_lines(&script);

        let mut env = Vec::with_capacity(self.env.len());
        for (key, value) in &self.env {
            env.push((key.clone(), substitute_str(value, context)?));
        }

        let output = run_shell(&runtime.config, &command, &env)
            .await
            .map_err(|message| WorkflowError::Shell {
                stage: self.name.clone(),
                message,
            })?;

        let failed = output.return_code != 0;
        if failed {
            warn!(
                stage = %self.name,
                return_code = output.return_code,
                stderr = %output.stderr,
                script = %self.shell,
                "Shell stage exited with a non-zero code"
            );
        }

        let message = format!(
            "exited with code {}: {}",
            output.return_code,
            output.stderr.trim()
        );
        let outputs = serde_json::to_value(&output).map_err(ConfigError::from)?;
        set_outputs(self.id.as_deref(), outputs, context);

        if failed && runtime.config.fail_on_shell_error {
            return Err(WorkflowError::Shell {
                stage: self.name.clone(),
                message,
            });
        }
        Ok(())
    }
}

/// Collapses a multi-line script into one `;`-separated command line.
///
/// Blank lines are dropped so that they do not produce empty commands.
pub fn join_lines(script: &str) -> String {
    script
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Runs `<shell_program> -c <command>` and captures its output.
///
/// The process is killed when the configured timeout elapses.
pub async fn run_shell(
    config: &WorkflowConfig,
    command: &str,
    env: &[(String, String)],
) -> std::result::Result<ShellOutput, String> {
    let start = Instant::now();

    let mut cmd = Command::new(&config.shell_program);
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in env {
        cmd.env(key, value);
    }

    debug!(shell = %config.shell_program, command = %command, "Spawning shell");

    let output = tokio::time::timeout(config.shell_timeout, cmd.output())
        .await
        .map_err(|_| format!("timed out after {:?}", config.shell_timeout))?
        .map_err(|e| format!("failed to spawn '{}': {}", config.shell_program, e))?;

    let return_code = output.status.code().unwrap_or(-1);
    debug!(
        return_code,
        elapsed = ?start.elapsed(),
        "Shell process finished"
    );

    Ok(ShellOutput {
        return_code,
        stdout: capture(&output.stdout, config.max_output_length),
        stderr: capture(&output.stderr, config.max_output_length),
    })
}

/// Decodes captured bytes, drops the trailing newline and caps the length.
fn capture(bytes: &[u8], max_len: usize) -> String {
    let mut text = String::from_utf8_lossy(bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string();

    if text.len() > max_len {
        let mut end = max_len;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::stage::Stage;

    #[test]
    fn test_join_lines() {
        assert_eq!(join_lines("echo a\n\n  echo b\n"), "echo a; echo b");
        assert_eq!(join_lines("single"), "single");
        assert_eq!(join_lines("\n\n"), "");
    }

    #[test]
    fn test_capture_truncates_on_char_boundary() {
        assert_eq!(capture(b"hello\n", 100), "hello");
        assert_eq!(capture("héllo".as_bytes(), 2), "h");
        assert_eq!(capture(b"abcdef", 3), "abc");
    }

    #[tokio::test]
    async fn test_shell_records_outputs() {
        let stage = Stage::Shell(ShellStage::new("greet", "echo hello\necho world >&2").with_id("greet"));
        let mut ctx = Context::new();
        stage
            .execute(&mut ctx, &Runtime::with_defaults())
            .await
            .unwrap();

        assert_eq!(
            ctx.stage_outputs("greet"),
            Some(&json!({"return_code": 0, "stdout": "hello", "stderr": "world"}))
        );
    }

    #[tokio::test]
    async fn test_outputs_decode_as_shell_output() {
        let stage = Stage::Shell(ShellStage::new("two", "printf out
exit 2").with_id("two"));
        let mut ctx = Context::new();
        stage
            .execute(&mut ctx, &Runtime::with_defaults())
            .await
            .unwrap();

        let recorded: ShellOutput =
            serde_json::from_value(ctx.stage_outputs("two").unwrap().clone()).unwrap();
        assert_eq!(
            recorded,
            ShellOutput {
                return_code: 2,
                stdout: "out".to_string(),
                stderr: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_not_fatal_by_default() {
        let stage = Stage::Shell(ShellStage::new("fail", "exit 1").with_id("fail"));
        let mut ctx = Context::new();
        stage
            .execute(&mut ctx, &Runtime::with_defaults())
            .await
            .unwrap();

        assert_eq!(ctx.stage_outputs("fail").unwrap()["return_code"], 1);
    }

    #[tokio::test]
    async fn test_non_zero_exit_fatal_when_configured() {
        let mut runtime = Runtime::with_defaults();
        runtime.config = runtime.config.with_fail_on_shell_error(true);

        let stage = Stage::Shell(ShellStage::new("fail", "echo boom >&2; exit 3"));
        let err = stage
            .execute(&mut Context::new(), &runtime)
            .await
            .unwrap_err();

        match err {
            WorkflowError::Shell { stage, message } => {
                assert_eq!(stage, "fail");
                assert!(message.contains("code 3"));
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_env_and_placeholders_are_applied() {
        let stage = Stage::Shell(
            ShellStage::new("env", "echo \"$GREETING ${{ params.name }}\"")
                .with_id("env")
                .with_env("GREETING", "hi"),
        );
        let mut ctx = Context::new();
        ctx.insert("params", json!({"name": "there"}));
        stage
            .execute(&mut ctx, &Runtime::with_defaults())
            .await
            .unwrap();

        assert_eq!(ctx.stage_outputs("env").unwrap()["stdout"], "hi there");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let mut runtime = Runtime::with_defaults();
        runtime.config = runtime
            .config
            .with_shell_timeout(std::time::Duration::from_millis(100));

        let stage = Stage::Shell(ShellStage::new("slow", "sleep 5"));
        let err = stage
            .execute(&mut Context::new(), &runtime)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
