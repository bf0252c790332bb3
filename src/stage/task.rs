//! Task stage: dispatches to a registered task by `<module>/<function>@<tag>`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::set_outputs;
use crate::config::Runtime;
use crate::context::Context;
use crate::error::{Result, TaskError, WorkflowError};
use crate::registry::TaskReference;
use crate::template::substitute_map;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskStage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Reference in `<module>/<function>@<tag>` form.
    pub task: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
}

impl TaskStage {
    pub fn new(name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            task: task.into(),
            args: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub(crate) async fn execute(&self, context: &mut Context, runtime: &Runtime) -> Result<()> {
        let reference: TaskReference = self.task.parse()?;
        let task = runtime.tasks.resolve(&reference)?;
        let args = substitute_map(&self.args, context)?;

        let missing: Vec<String> = task
            .required_args()
            .iter()
            .filter(|arg| !args.contains_key(arg.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(TaskError::MissingArguments {
                task: reference.to_string(),
                missing,
            }
            .into());
        }

        debug!(task = %reference, args = args.len(), "Calling task");
        let result = task
            .call(args)
            .await
            .map_err(|failure| WorkflowError::StageExecution {
                stage: self.name.clone(),
                kind: failure.kind,
                message: failure.message,
                source_text: None,
            })?;

        set_outputs(self.id.as_deref(), result, context);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::config::WorkflowConfig;
    use crate::registry::{tag, TaskCatalog, TaskFailure};

    fn runtime() -> Runtime {
        let mut catalog = TaskCatalog::with_builtin_tasks();
        catalog.register_module("etl.tasks", || {
            vec![
                tag("v1", "add_one", |args| {
                    let n = args["n"]
                        .as_i64()
                        .ok_or_else(|| TaskFailure::new("TypeError", "n must be an integer"))?;
                    Ok(json!(n + 1))
                })
                .with_required_args(["n"])
                .into_task(),
                tag("v1", "copy", |_| Ok(Value::Null))
                    .with_required_args(["source", "sink"])
                    .into_task(),
            ]
        });
        Runtime::new(WorkflowConfig::default(), Arc::new(catalog))
    }

    #[tokio::test]
    async fn test_dispatch_records_return_value() {
        let stage = TaskStage::new("add", "etl.tasks/add-one@v1")
            .with_id("add")
            .with_arg("n", json!("${{ params.n }}"));
        let mut ctx = Context::new();
        ctx.insert("params", json!({"n": 41}));

        stage.execute(&mut ctx, &runtime()).await.unwrap();
        assert_eq!(ctx.stage_outputs("add"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn test_builtin_echo() {
        let stage = TaskStage::new("echo", "workflow.tasks/echo@v1")
            .with_id("echo")
            .with_arg("greeting", json!("hi ${{ params.who }}"));
        let mut ctx = Context::new();
        ctx.insert("params", json!({"who": "there"}));

        stage.execute(&mut ctx, &runtime()).await.unwrap();
        assert_eq!(
            ctx.stage_outputs("echo"),
            Some(&json!({"greeting": "hi there"}))
        );
    }

    #[tokio::test]
    async fn test_missing_arguments_listed() {
        let stage = TaskStage::new("copy", "etl.tasks/copy@v1").with_arg("other", json!(1));
        let err = stage
            .execute(&mut Context::new(), &runtime())
            .await
            .unwrap_err();

        match err {
            WorkflowError::Task(TaskError::MissingArguments { task, missing }) => {
                assert_eq!(task, "etl.tasks/copy@v1");
                assert_eq!(missing, vec!["source", "sink"]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_reference() {
        let stage = TaskStage::new("bad", "not-a-reference");
        let err = stage
            .execute(&mut Context::new(), &runtime())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Task(TaskError::InvalidReference(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_tag() {
        let stage = TaskStage::new("bad", "etl.tasks/add-one@v9");
        let err = stage
            .execute(&mut Context::new(), &runtime())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Task(TaskError::TagNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_failure_wrapped_as_stage_error() {
        let stage = TaskStage::new("add", "etl.tasks/add-one@v1").with_arg("n", json!("x"));
        let mut ctx = Context::new();
        let err = stage.execute(&mut ctx, &runtime()).await.unwrap_err();

        match err {
            WorkflowError::StageExecution {
                stage,
                kind,
                message,
                source_text,
            } => {
                assert_eq!(stage, "add");
                assert_eq!(kind, "TypeError");
                assert_eq!(message, "n must be an integer");
                assert!(source_text.is_none());
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(!ctx.contains_key("stages"));
    }
}
