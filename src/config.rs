//! Engine configuration.
//!
//! This module provides the settings a pipeline run depends on: where YAML
//! definitions live, how shell stages are spawned, and in which order jobs
//! execute.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::registry::TaskCatalog;

/// Order in which a pipeline runs its jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOrder {
    /// Jobs run in the order they are declared; `needs` is not consulted.
    #[default]
    Declaration,
    /// Jobs run after every job they `need`; cycles are rejected.
    Dependency,
}

impl fmt::Display for ExecutionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOrder::Declaration => write!(f, "declaration"),
            ExecutionOrder::Dependency => write!(f, "dependency"),
        }
    }
}

impl FromStr for ExecutionOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "declaration" => Ok(ExecutionOrder::Declaration),
            "dependency" => Ok(ExecutionOrder::Dependency),
            other => Err(format!(
                "expected 'declaration' or 'dependency', got '{}'",
                other
            )),
        }
    }
}

/// Configuration for the workflow engine.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Directory scanned for YAML pipeline definitions.
    pub conf_path: PathBuf,

    // Shell settings
    /// Program invoked as `<program> -c <command>` by shell stages.
    pub shell_program: String,
    /// Upper bound on a single shell stage.
    pub shell_timeout: Duration,
    /// Whether a non-zero shell exit aborts the run.
    pub fail_on_shell_error: bool,
    /// Maximum captured length of stdout and stderr each.
    pub max_output_length: usize,

    /// Job scheduling order.
    pub execution_order: ExecutionOrder,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            conf_path: PathBuf::from("./conf"),

            shell_program: "sh".to_string(),
            shell_timeout: Duration::from_secs(3600), // 1 hour
            fail_on_shell_error: false,
            max_output_length: 100_000,

            execution_order: ExecutionOrder::Declaration,
        }
    }
}

impl WorkflowConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `WORKFLOW_CONF_PATH`: Definition directory (default: ./conf)
    /// - `WORKFLOW_SHELL`: Shell program (default: sh)
    /// - `WORKFLOW_SHELL_TIMEOUT_SECS`: Shell stage timeout (default: 3600)
    /// - `WORKFLOW_FAIL_ON_SHELL_ERROR`: Abort on non-zero exit (default: false)
    /// - `WORKFLOW_MAX_OUTPUT_LENGTH`: Captured output limit (default: 100000)
    /// - `WORKFLOW_EXECUTION_ORDER`: `declaration` or `dependency`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("WORKFLOW_CONF_PATH") {
            config.conf_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("WORKFLOW_SHELL") {
            config.shell_program = val;
        }

        if let Ok(val) = std::env::var("WORKFLOW_SHELL_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "WORKFLOW_SHELL_TIMEOUT_SECS")?;
            config.shell_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("WORKFLOW_FAIL_ON_SHELL_ERROR") {
            config.fail_on_shell_error = parse_env_bool(&val, "WORKFLOW_FAIL_ON_SHELL_ERROR")?;
        }

        if let Ok(val) = std::env::var("WORKFLOW_MAX_OUTPUT_LENGTH") {
            config.max_output_length = parse_env_value(&val, "WORKFLOW_MAX_OUTPUT_LENGTH")?;
        }

        if let Ok(val) = std::env::var("WORKFLOW_EXECUTION_ORDER") {
            config.execution_order =
                val.parse()
                    .map_err(|message| ConfigError::InvalidValue {
                        key: "WORKFLOW_EXECUTION_ORDER".to_string(),
                        message,
                    })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shell_program.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "shell_program cannot be empty".to_string(),
            ));
        }

        if self.shell_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "shell_timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_output_length == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_output_length must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the definition directory.
    pub fn with_conf_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.conf_path = path.into();
        self
    }

    /// Builder method to set the shell program.
    pub fn with_shell_program(mut self, program: impl Into<String>) -> Self {
        self.shell_program = program.into();
        self
    }

    /// Builder method to set the shell timeout.
    pub fn with_shell_timeout(mut self, timeout: Duration) -> Self {
        self.shell_timeout = timeout;
        self
    }

    /// Builder method to make non-zero shell exits fatal.
    pub fn with_fail_on_shell_error(mut self, enabled: bool) -> Self {
        self.fail_on_shell_error = enabled;
        self
    }

    /// Builder method to set the captured output limit.
    pub fn with_max_output_length(mut self, length: usize) -> Self {
        self.max_output_length = length;
        self
    }

    /// Builder method to set the job execution order.
    pub fn with_execution_order(mut self, order: ExecutionOrder) -> Self {
        self.execution_order = order;
        self
    }
}

/// Collaborators shared by every stage of a run.
#[derive(Clone)]
pub struct Runtime {
    pub config: WorkflowConfig,
    pub tasks: Arc<TaskCatalog>,
}

impl Runtime {
    pub fn new(config: WorkflowConfig, tasks: Arc<TaskCatalog>) -> Self {
        Self { config, tasks }
    }

    /// Runtime with default settings and only the builtin task module.
    pub fn with_defaults() -> Self {
        Self::new(
            WorkflowConfig::default(),
            Arc::new(TaskCatalog::with_builtin_tasks()),
        )
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
