//! Error types for workflow-engine operations.
//!
//! Defines the error types for every subsystem of a pipeline run:
//! - Configuration loading and lookups
//! - Parameter definition and coercion
//! - Task resolution through the task catalog
//! - Template substitution and code statements
//! - Stage execution (the top-level `WorkflowError`)

use thiserror::Error;

/// Errors raised while loading or querying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// A required key is absent from a decoded definition.
    #[error("Missing required key '{0}' in pipeline definition")]
    MissingKey(String),

    /// No configuration file defines the requested name.
    #[error("Pipeline '{0}' not found in configuration")]
    PipelineNotFound(String),

    #[error("Job '{0}' not found in pipeline")]
    JobNotFound(String),

    #[error("Stage '{stage}' not found in job '{job}'")]
    StageNotFound { job: String, stage: String },

    /// A job lists a `needs` entry that is not a job of the pipeline.
    #[error("Job '{job}' needs unknown job '{needs}'")]
    UnknownDependency { job: String, needs: String },

    /// The `needs` graph contains a cycle.
    #[error("Circular dependency detected between jobs: {0}")]
    CyclicDependency(String),

    #[error("Failed to parse configuration file '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Invalid pipeline definition: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by parameter definitions and coercion.
#[derive(Debug, Error)]
pub enum ParamError {
    /// The definition itself is invalid (missing default, empty options).
    #[error("Invalid parameter definition: {0}")]
    InvalidDefinition(String),

    /// A string value could not be parsed as the declared type.
    #[error("Cannot parse '{value}' as {expected}")]
    Parse { value: String, expected: String },

    /// The value has a type the parameter cannot coerce.
    #[error("Expected {expected}, got {value}")]
    Type { expected: String, value: String },

    #[error("Value '{value}' is not one of the options {options:?}")]
    InvalidChoice { value: String, options: Vec<String> },
}

/// Errors raised while resolving a task reference.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The reference does not match `<module>/<function>@<tag>`.
    #[error("Task reference '{0}' must match '<module>/<function>@<tag>'")]
    InvalidReference(String),

    #[error("Task module '{0}' is not registered")]
    ModuleNotFound(String),

    #[error("Task '{name}' not found in module '{module}'")]
    TaskNotFound { module: String, name: String },

    #[error("Tag '{tag}' not found for task '{name}' in module '{module}'")]
    TagNotFound {
        module: String,
        name: String,
        tag: String,
    },

    #[error("Task '{name}' with tag '{tag}' registered twice in module '{module}'")]
    DuplicateTag {
        module: String,
        name: String,
        tag: String,
    },

    #[error("Task '{task}' is missing required arguments: {}", missing.join(", "))]
    MissingArguments { task: String, missing: Vec<String> },
}

/// Errors raised by template substitution and code statements.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A placeholder path does not exist in the context.
    #[error("Cannot resolve '{0}' from the context")]
    Unresolved(String),

    /// A code statement is not `[global] <name> = <expression>`.
    #[error("Invalid statement on line {line}: '{statement}'")]
    InvalidStatement { line: usize, statement: String },
}

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Required parameters are absent from the caller input.
    #[error("Missing required parameters: {}", .0.join(", "))]
    MissingParameters(Vec<String>),

    #[error("Parameter '{name}': {source}")]
    Param {
        name: String,
        #[source]
        source: ParamError,
    },

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The body of a code or task stage failed.
    #[error("Stage '{stage}' failed with {kind}: {message}")]
    StageExecution {
        stage: String,
        kind: String,
        message: String,
        source_text: Option<String>,
    },

    /// The shell process could not be run, timed out, or exited non-zero
    /// while shell failures are configured to be fatal.
    #[error("Shell stage '{stage}' failed: {message}")]
    Shell { stage: String, message: String },
}

impl WorkflowError {
    /// Wraps a parameter coercion error with the parameter name.
    pub fn param(name: impl Into<String>, source: ParamError) -> Self {
        Self::Param {
            name: name.into(),
            source,
        }
    }
}

/// Convenience result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_parameters_lists_every_name() {
        let err = WorkflowError::MissingParameters(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(err.to_string(), "Missing required parameters: a, b");
    }

    #[test]
    fn test_missing_arguments_display() {
        let err = TaskError::MissingArguments {
            task: "mod/f@t".to_string(),
            missing: vec!["source".to_string(), "sink".to_string()],
        };
        assert!(err.to_string().contains("source, sink"));
    }

    #[test]
    fn test_param_error_carries_name() {
        let err = WorkflowError::param(
            "count",
            ParamError::Type {
                expected: "int".to_string(),
                value: "\"abc\"".to_string(),
            },
        );
        assert!(err.to_string().starts_with("Parameter 'count'"));
    }
}
