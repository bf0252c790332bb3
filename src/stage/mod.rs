//! Stages: the units of execution inside a job.
//!
//! A stage is one of four variants, chosen by the fields present in its
//! definition:
//!
//! - **Empty**: only `name` (and optional `id`); logs and does nothing
//! - **Shell**: `shell` script plus optional `env`
//! - **Code**: `run` statements plus optional `vars`
//! - **Task**: `task` reference plus optional `args`
//!
//! Every stage runs against the shared [`Context`]. A stage with an `id`
//! records what it produced under `stages.<id>.outputs`.

pub mod code;
pub mod shell;
pub mod task;

pub use code::CodeStage;
pub use shell::{ShellOutput, ShellStage};
pub use task::TaskStage;

use serde::de;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::info;

use crate::config::Runtime;
use crate::context::Context;
use crate::error::Result;

/// A stage that only logs its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmptyStage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
}

/// One stage of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Stage {
    Empty(EmptyStage),
    Shell(ShellStage),
    Code(CodeStage),
    Task(TaskStage),
}

impl<'de> Deserialize<'de> for Stage {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(d)?;
        let fields = value
            .as_object()
            .ok_or_else(|| de::Error::custom("stage definition must be a mapping"))?;

        let stage = if fields.contains_key("task") {
            serde_json::from_value(value).map(Stage::Task)
        } else if fields.contains_key("run") {
            serde_json::from_value(value).map(Stage::Code)
        } else if fields.contains_key("shell") {
            serde_json::from_value(value).map(Stage::Shell)
        } else {
            serde_json::from_value(value).map(Stage::Empty)
        };

        stage.map_err(de::Error::custom)
    }
}

impl Stage {
    pub fn id(&self) -> Option<&str> {
        match self {
            Stage::Empty(s) => s.id.as_deref(),
            Stage::Shell(s) => s.id.as_deref(),
            Stage::Code(s) => s.id.as_deref(),
            Stage::Task(s) => s.id.as_deref(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Stage::Empty(s) => &s.name,
            Stage::Shell(s) => &s.name,
            Stage::Code(s) => &s.name,
            Stage::Task(s) => &s.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Stage::Empty(_) => "empty",
            Stage::Shell(_) => "shell",
            Stage::Code(_) => "code",
            Stage::Task(_) => "task",
        }
    }

    /// Runs the stage, mutating `context` in place.
    ///
    /// # Errors
    ///
    /// Any error aborts the enclosing job. A shell stage exiting non-zero is
    /// only an error when `fail_on_shell_error` is configured.
    pub async fn execute(&self, context: &mut Context, runtime: &Runtime) -> Result<()> {
        info!(stage = %self.name(), kind = self.kind(), "Executing stage");

        match self {
            Stage::Empty(_) => Ok(()),
            Stage::Shell(s) => s.execute(context, runtime).await,
            Stage::Code(s) => s.execute(context),
            Stage::Task(s) => s.execute(context, runtime).await,
        }
    }

    /// Records `outputs` under this stage's id; a no-op without an id.
    pub fn set_outputs(&self, outputs: Value, context: &mut Context) {
        set_outputs(self.id(), outputs, context);
    }
}

/// Writes `stages.<id>.outputs` when the stage has an id.
pub(crate) fn set_outputs(id: Option<&str>, outputs: Value, context: &mut Context) {
    if let Some(id) = id {
        context.set_stage_outputs(id, outputs);
    }
}
