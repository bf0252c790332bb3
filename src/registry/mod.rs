//! Task registry for `task` stages.
//!
//! A task stage names its callable as `<module>/<function>@<tag>`. Modules are
//! registered explicitly on a [`TaskCatalog`] as factories returning the
//! module's tagged tasks; the catalog builds a [`TaskRegistry`] for a module
//! the first time it is referenced and caches it.
//!
//! # Example
//!
//! ```ignore
//! use workflow_engine::registry::{tag, TaskCatalog};
//!
//! let mut catalog = TaskCatalog::new();
//! catalog.register_module("etl.tasks", || {
//!     vec![tag("polars", "count_rows", |args| Ok(args["rows"].clone()))
//!         .with_required_args(["rows"])
//!         .into_task()]
//! });
//!
//! let task = catalog.resolve(&"etl.tasks/count-rows@polars".parse()?)?;
//! ```

pub mod builtin;
pub mod tagged;

pub use tagged::{tag, TaggedFn};

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::error::TaskError;

/// Failure reported by a task body.
///
/// `kind` plays the role of an exception class name and is surfaced in the
/// resulting stage error.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct TaskFailure {
    pub kind: String,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for TaskFailure {
    fn from(e: serde_json::Error) -> Self {
        Self::new("SerdeError", e.to_string())
    }
}

impl From<std::io::Error> for TaskFailure {
    fn from(e: std::io::Error) -> Self {
        Self::new("IoError", e.to_string())
    }
}

/// A callable that can be referenced from a task stage.
#[async_trait]
pub trait Task: Send + Sync {
    /// Display name used in task references (`<module>/<name>@<tag>`).
    fn name(&self) -> &str;

    /// Tag distinguishing implementations sharing a name.
    fn tag(&self) -> &str;

    /// Argument names the call cannot do without.
    fn required_args(&self) -> &[String] {
        &[]
    }

    /// Invokes the task with already substituted arguments.
    async fn call(&self, args: Map<String, Value>) -> Result<Value, TaskFailure>;
}

/// Parsed `<module>/<function>@<tag>` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReference {
    pub module: String,
    pub name: String,
    pub tag: String,
}

static TASK_REFERENCE: OnceLock<Regex> = OnceLock::new();

impl FromStr for TaskReference {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let re = TASK_REFERENCE.get_or_init(|| {
            Regex::new(r"^(?P<module>[^@\s]+)/(?P<name>[^/@\s]+)@(?P<tag>[^/@\s]+)$")
                .expect("task reference pattern is valid")
        });

        let caps = re
            .captures(s.trim())
            .ok_or_else(|| TaskError::InvalidReference(s.to_string()))?;

        Ok(Self {
            module: caps["module"].to_string(),
            name: caps["name"].to_string(),
            tag: caps["tag"].to_string(),
        })
    }
}

impl std::fmt::Display for TaskReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.module, self.name, self.tag)
    }
}

/// Tasks of one module, keyed by name then tag.
pub struct TaskRegistry {
    module: String,
    tasks: HashMap<String, HashMap<String, Arc<dyn Task>>>,
}

impl TaskRegistry {
    /// Builds the registry of `module` from its tasks.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTag` if a `(name, tag)` pair appears twice.
    pub fn build(
        module: impl Into<String>,
        tasks: Vec<Arc<dyn Task>>,
    ) -> Result<Self, TaskError> {
        let module = module.into();
        let mut map: HashMap<String, HashMap<String, Arc<dyn Task>>> = HashMap::new();

        for task in tasks {
            let tags = map.entry(task.name().to_string()).or_default();
            if tags.contains_key(task.tag()) {
                return Err(TaskError::DuplicateTag {
                    module,
                    name: task.name().to_string(),
                    tag: task.tag().to_string(),
                });
            }
            tags.insert(task.tag().to_string(), task);
        }

        Ok(Self { module, tasks: map })
    }

    /// Looks up a task by name and tag.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` when the name is unknown, `TagNotFound` when the name
    /// exists without that tag.
    pub fn resolve(&self, name: &str, tag: &str) -> Result<Arc<dyn Task>, TaskError> {
        let tags = self
            .tasks
            .get(name)
            .ok_or_else(|| TaskError::TaskNotFound {
                module: self.module.clone(),
                name: name.to_string(),
            })?;

        tags.get(tag).cloned().ok_or_else(|| TaskError::TagNotFound {
            module: self.module.clone(),
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Every `name@tag` pair, sorted.
    pub fn entries(&self) -> Vec<String> {
        let mut entries: Vec<String> = self
            .tasks
            .iter()
            .flat_map(|(name, tags)| tags.keys().map(move |tag| format!("{}@{}", name, tag)))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.tasks.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Produces the tasks of a module.
pub type ModuleFactory = Arc<dyn Fn() -> Vec<Arc<dyn Task>> + Send + Sync>;

/// Registered task modules and their lazily built registries.
pub struct TaskCatalog {
    modules: HashMap<String, ModuleFactory>,
    registries: RwLock<HashMap<String, Arc<TaskRegistry>>>,
}

impl TaskCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
            registries: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a catalog holding the builtin `workflow.tasks` module.
    pub fn with_builtin_tasks() -> Self {
        let mut catalog = Self::new();
        catalog.register_module(builtin::MODULE, builtin::tasks);
        catalog
    }

    /// Registers (or replaces) a module.
    pub fn register_module<F>(&mut self, path: impl Into<String>, factory: F)
    where
        F: Fn() -> Vec<Arc<dyn Task>> + Send + Sync + 'static,
    {
        let path = path.into();
        self.registries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&path);
        self.modules.insert(path, Arc::new(factory));
    }

    /// Returns the registry of `path`, building it on first use.
    ///
    /// # Errors
    ///
    /// `ModuleNotFound` for an unregistered path, `DuplicateTag` when the
    /// module registers a `(name, tag)` pair twice.
    pub fn build_registry(&self, path: &str) -> Result<Arc<TaskRegistry>, TaskError> {
        if let Some(registry) = self
            .registries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
        {
            return Ok(Arc::clone(registry));
        }

        let factory = self
            .modules
            .get(path)
            .ok_or_else(|| TaskError::ModuleNotFound(path.to_string()))?;

        let registry = Arc::new(TaskRegistry::build(path, factory())?);
        debug!(module = %path, tasks = registry.len(), "Built task registry");

        let mut registries = self.registries.write().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(
            registries
                .entry(path.to_string())
                .or_insert(registry),
        ))
    }

    /// Resolves a parsed reference to its task.
    pub fn resolve(&self, reference: &TaskReference) -> Result<Arc<dyn Task>, TaskError> {
        self.build_registry(&reference.module)?
            .resolve(&reference.name, &reference.tag)
    }

    /// Registered module paths, sorted.
    pub fn modules(&self) -> Vec<&str> {
        let mut modules: Vec<&str> = self.modules.keys().map(|s| s.as_str()).collect();
        modules.sort_unstable();
        modules
    }
}

impl Default for TaskCatalog {
    fn default() -> Self {
        Self::new()
    }
}
