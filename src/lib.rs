//! workflow-engine: YAML-defined data pipelines of shell, code and task stages.
//!
//! A [`Pipeline`] declares typed parameters and named jobs; each [`Job`] runs
//! its stages in order against one shared [`Context`]. Task stages dispatch to
//! callables registered on a [`TaskCatalog`].

// Core modules
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod params;
pub mod pipeline;
pub mod registry;
pub mod stage;
pub mod template;

// Re-export commonly used types
pub use config::{ExecutionOrder, Runtime, WorkflowConfig};
pub use context::Context;
pub use error::{ConfigError, ParamError, Result, TaskError, TemplateError, WorkflowError};
pub use params::ParamSpec;
pub use pipeline::{Job, Loader, Pipeline, Strategy};
pub use registry::{tag, Task, TaskCatalog, TaskFailure, TaskReference, TaskRegistry};
pub use stage::Stage;
