//! Pipelines: typed parameters plus named jobs.
//!
//! A pipeline run goes through these steps:
//!
//! 1. **Parameter check**: every required parameter must be supplied
//! 2. **Coercion**: each declared parameter is received through its
//!    [`ParamSpec`] and stored under `params`
//! 3. **Jobs**: run one after another in the configured
//!    [`ExecutionOrder`], each mutating the shared [`Context`]
//!
//! # Example
//!
//! ```rust,ignore
//! use workflow_engine::config::Runtime;
//! use workflow_engine::pipeline::{Loader, Pipeline};
//!
//! let loader = Loader::new("conf/");
//! let pipeline = Pipeline::from_loader(&loader, "ingest-daily", &Map::new())?;
//!
//! let mut params = Map::new();
//! params.insert("run-date".into(), json!("2024-01-01"));
//! let context = pipeline.execute(params, &Runtime::with_defaults()).await?;
//! println!("{}", context.stage_outputs("hello").unwrap());
//! ```

pub mod job;
pub mod loader;
mod order;

pub use job::{Job, Strategy};
pub use loader::Loader;

use std::time::Instant;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::{ExecutionOrder, Runtime};
use crate::context::Context;
use crate::error::{ConfigError, Result, WorkflowError};
use crate::params::ParamSpec;

/// Decoded body of a pipeline definition; other keys (like `type`) are
/// ignored.
#[derive(Debug, Deserialize)]
struct Definition {
    #[serde(default)]
    params: IndexMap<String, ParamSpec>,
    jobs: IndexMap<String, Job>,
}

/// A named set of parameters and jobs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pipeline {
    pub name: String,
    pub params: IndexMap<String, ParamSpec>,
    pub jobs: IndexMap<String, Job>,
}

impl Pipeline {
    /// Builds a pipeline from a decoded definition.
    ///
    /// # Errors
    ///
    /// `MissingKey("jobs")` when the definition has no jobs, `Json` when a
    /// field does not decode, `Param` when a parameter definition is invalid.
    pub fn from_config(name: impl Into<String>, config: Map<String, Value>) -> Result<Self> {
        if !config.contains_key("jobs") {
            return Err(ConfigError::MissingKey("jobs".to_string()).into());
        }

        let definition: Definition =
            serde_json::from_value(Value::Object(config)).map_err(ConfigError::from)?;

        for (param, spec) in &definition.params {
            spec.validate()
                .map_err(|e| WorkflowError::param(param.clone(), e))?;
        }

        Ok(Self {
            name: name.into(),
            params: definition.params,
            jobs: definition.jobs,
        })
    }

    /// Loads the definition `name` through `loader` and builds it.
    pub fn from_loader(loader: &Loader, name: &str, externals: &Map<String, Value>) -> Result<Self> {
        let config = loader.load(name, externals)?;
        Self::from_config(name, config)
    }

    pub fn job(&self, name: &str) -> std::result::Result<&Job, ConfigError> {
        self.jobs
            .get(name)
            .ok_or_else(|| ConfigError::JobNotFound(name.to_string()))
    }

    /// Job names in the order a run with `order` executes them.
    pub fn job_order(&self, order: ExecutionOrder) -> std::result::Result<Vec<&str>, ConfigError> {
        order::job_order(&self.jobs, order)
    }

    /// Required parameters absent from `raw_params`, in declaration order.
    pub fn missing_params(&self, raw_params: &Map<String, Value>) -> Vec<String> {
        self.params
            .iter()
            .filter(|(name, spec)| spec.required() && !raw_params.contains_key(name.as_str()))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Coerces `raw_params` through the declared parameters.
    ///
    /// Undeclared keys pass through unchanged; declared ones missing from the
    /// input receive their default.
    pub fn receive_params(&self, raw_params: Map<String, Value>) -> Result<Map<String, Value>> {
        let missing = self.missing_params(&raw_params);
        if !missing.is_empty() {
            return Err(WorkflowError::MissingParameters(missing));
        }

        let mut merged = raw_params;
        for (name, spec) in &self.params {
            let value = spec
                .receive(merged.get(name))
                .map_err(|e| WorkflowError::param(name.clone(), e))?;
            merged.insert(name.clone(), value);
        }
        Ok(merged)
    }

    /// Runs the pipeline and returns the final context.
    ///
    /// Each call owns its own context, so a pipeline can be executed
    /// concurrently.
    ///
    /// # Errors
    ///
    /// The first error from parameter handling, scheduling or any stage
    /// aborts the run; no partial context is returned.
    pub async fn execute(&self, raw_params: Map<String, Value>, runtime: &Runtime) -> Result<Context> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", pipeline = %self.name, run_id = %run_id);

        async {
            let start = Instant::now();
            let params = self.receive_params(raw_params)?;
            debug!(params = ?params, "Received parameters");

            let order = runtime.config.execution_order;
            let jobs = self.job_order(order)?;
            info!(jobs = jobs.len(), order = %order, "Starting pipeline run");

            let mut context = Context::with_params(params);
            for name in jobs {
                self.jobs[name].execute(name, &mut context, runtime).await?;
            }

            info!(elapsed = ?start.elapsed(), "Pipeline run completed");
            Ok(context)
        }
        .instrument(span)
        .await
    }

    /// Names of the declared parameters.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::config::WorkflowConfig;

    fn definition(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not a mapping: {}", other),
        }
    }

    fn sample() -> Pipeline {
        Pipeline::from_config(
            "sample",
            definition(json!({
                "type": "pipeline",
                "params": {
                    "run-date": {"type": "datetime", "required": true},
                    "source": {"type": "str", "required": true},
                    "name": {"type": "str", "default": "world"},
                    "limit": {"type": "int", "default": 10},
                    "mode": {"type": "choice", "options": ["full", "delta"]}
                },
                "jobs": {
                    "greet": {
                        "stages": [
                            {"name": "Start"},
                            {"name": "calc", "id": "calc", "run": "x = 1 + 1\ngreeting = \"hello \" ~ params.name"}
                        ]
                    }
                }
            })),
        )
        .unwrap()
    }

    #[test]
    fn test_from_config_requires_jobs() {
        let err = Pipeline::from_config("p", definition(json!({"params": {}}))).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Config(ConfigError::MissingKey(key)) if key == "jobs"
        ));
    }

    #[test]
    fn test_from_config_validates_params() {
        let err = Pipeline::from_config(
            "p",
            definition(json!({"params": {"n": {"type": "int"}}, "jobs": {}})),
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::Param { name, .. } if name == "n"));
    }

    #[test]
    fn test_params_and_jobs_keep_declaration_order() {
        let pipeline = sample();
        assert_eq!(
            pipeline.param_names().collect::<Vec<_>>(),
            vec!["run-date", "source", "name", "limit", "mode"]
        );
        assert!(pipeline.job("greet").is_ok());
        assert!(matches!(
            pipeline.job("nope"),
            Err(ConfigError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_required_params_all_listed() {
        let err = sample()
            .execute(Map::new(), &Runtime::with_defaults())
            .await
            .unwrap_err();
        match err {
            WorkflowError::MissingParameters(names) => {
                assert_eq!(names, vec!["run-date", "source"])
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_coerces_params_and_runs_jobs() {
        let params = definition(json!({
            "run-date": "2024-01-01",
            "source": 42,
            "extra": true
        }));

        let context = sample()
            .execute(params, &Runtime::with_defaults())
            .await
            .unwrap();

        assert_eq!(
            context.params(),
            json!({
                "run-date": "2024-01-01T00:00:00",
                "source": "42",
                "extra": true,
                "name": "world",
                "limit": 10,
                "mode": "full"
            })
            .as_object()
        );
        assert_eq!(
            context.stage_outputs("calc"),
            Some(&json!({"x": 2, "greeting": "hello world"}))
        );
    }

    #[tokio::test]
    async fn test_invalid_param_value() {
        let params = definition(json!({
            "run-date": "2024-01-01",
            "source": "s3",
            "mode": "weekly"
        }));
        let err = sample()
            .execute(params, &Runtime::with_defaults())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Param { name, .. } if name == "mode"));
    }

    #[tokio::test]
    async fn test_dependency_order_run() {
        let pipeline = Pipeline::from_config(
            "ordered",
            definition(json!({
                "jobs": {
                    "second": {
                        "needs": ["first"],
                        "stages": [{"name": "s", "id": "s", "run": "after = stages.f.outputs.v + 1"}]
                    },
                    "first": {
                        "stages": [{"name": "f", "id": "f", "run": "v = 1"}]
                    }
                }
            })),
        )
        .unwrap();

        let declaration = pipeline
            .execute(Map::new(), &Runtime::with_defaults())
            .await;
        assert!(declaration.is_err());

        let mut runtime = Runtime::with_defaults();
        runtime.config = WorkflowConfig::default().with_execution_order(ExecutionOrder::Dependency);
        let context = pipeline.execute(Map::new(), &runtime).await.unwrap();
        assert_eq!(context.stage_outputs("s"), Some(&json!({"after": 2})));
    }
}
