//! Tasks shipped with the engine under the `workflow.tasks` module.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{tag, Task, TaskFailure};

/// Module path of the builtin tasks.
pub const MODULE: &str = "workflow.tasks";

/// Every builtin task.
pub fn tasks() -> Vec<Arc<dyn Task>> {
    vec![
        tag("v1", "echo", |args| Ok(Value::Object(args))).into_task(),
        Arc::new(SleepTask::new()),
    ]
}

/// `workflow.tasks/sleep@v1`: waits `seconds` and reports it.
pub struct SleepTask {
    required: Vec<String>,
}

impl SleepTask {
    pub fn new() -> Self {
        Self {
            required: vec!["seconds".to_string()],
        }
    }
}

impl Default for SleepTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Task for SleepTask {
    fn name(&self) -> &str {
        "sleep"
    }

    fn tag(&self) -> &str {
        "v1"
    }

    fn required_args(&self) -> &[String] {
        &self.required
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, TaskFailure> {
        let seconds = args
            .get("seconds")
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite() && *s >= 0.0)
            .ok_or_else(|| {
                TaskFailure::new("ValueError", "seconds must be a non-negative number")
            })?;

        debug!(seconds, "Sleeping");
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        Ok(json!({ "slept": seconds }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_returns_args() {
        let echo = tasks().into_iter().find(|t| t.name() == "echo").unwrap();
        let mut args = Map::new();
        args.insert("a".to_string(), json!(1));
        assert_eq!(echo.call(args).await.unwrap(), json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_sleep_rejects_negative() {
        let sleep = SleepTask::new();
        let mut args = Map::new();
        args.insert("seconds".to_string(), json!(-1));
        let err = sleep.call(args).await.unwrap_err();
        assert_eq!(err.kind, "ValueError");
    }

    #[tokio::test]
    async fn test_sleep_zero() {
        let sleep = SleepTask::new();
        let mut args = Map::new();
        args.insert("seconds".to_string(), json!(0));
        assert_eq!(sleep.call(args).await.unwrap(), json!({"slept": 0.0}));
    }
}
