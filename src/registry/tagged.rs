//! Tagging plain functions as tasks.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Task, TaskFailure};

type TaskFn = dyn Fn(Map<String, Value>) -> Result<Value, TaskFailure> + Send + Sync;

/// A synchronous function carrying a task name and tag.
///
/// Calling the task calls the function unchanged.
#[derive(Clone)]
pub struct TaggedFn {
    name: String,
    tag: String,
    required: Vec<String>,
    func: Arc<TaskFn>,
}

/// Tags `func` so it can be registered in a task module.
///
/// The task name defaults to `ident` with underscores replaced by hyphens,
/// so `tag("v1", "load_rows", f)` is referenced as `<module>/load-rows@v1`.
pub fn tag<F>(tag: impl Into<String>, ident: &str, func: F) -> TaggedFn
where
    F: Fn(Map<String, Value>) -> Result<Value, TaskFailure> + Send + Sync + 'static,
{
    TaggedFn {
        name: ident.replace('_', "-"),
        tag: tag.into(),
        required: Vec::new(),
        func: Arc::new(func),
    }
}

impl TaggedFn {
    /// Overrides the derived display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Declares the arguments the function has no default for.
    pub fn with_required_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn into_task(self) -> Arc<dyn Task> {
        Arc::new(self)
    }
}

impl std::fmt::Debug for TaggedFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaggedFn")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("required", &self.required)
            .finish()
    }
}

#[async_trait]
impl Task for TaggedFn {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn required_args(&self) -> &[String] {
        &self.required
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, TaskFailure> {
        (self.func)(args)
    }
}
