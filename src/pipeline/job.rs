//! Jobs: ordered stages plus scheduling metadata.

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};

use crate::config::Runtime;
use crate::context::Context;
use crate::error::{ConfigError, Result};
use crate::stage::Stage;

/// Build-matrix declaration of a job.
///
/// Stored with the job but never expanded into variants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Strategy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matrix: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl Strategy {
    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty() && self.include.is_empty() && self.exclude.is_empty()
    }
}

/// A named group of stages inside a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Job {
    #[serde(default)]
    pub stages: Vec<Stage>,
    /// Jobs that must finish first when running in dependency order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "Strategy::is_empty")]
    pub strategy: Strategy,
}

impl Job {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            ..Self::default()
        }
    }

    pub fn with_needs<I, S>(mut self, needs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.needs = needs.into_iter().map(Into::into).collect();
        self
    }

    /// Runs every stage in declared order against `context`.
    ///
    /// The first failing stage aborts the job.
    pub async fn execute(&self, name: &str, context: &mut Context, runtime: &Runtime) -> Result<()> {
        let span = info_span!("job", job = %name);

        async {
            if !self.strategy.is_empty() {
                warn!(
                    matrix = ?self.strategy.matrix,
                    include = ?self.strategy.include,
                    exclude = ?self.strategy.exclude,
                    "Job strategy is not expanded; running stages once"
                );
            }

            info!(stages = self.stages.len(), "Executing job");
            for stage in &self.stages {
                stage.execute(context, runtime).await?;
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Finds a stage by its `id`.
    pub fn stage(&self, job: &str, id: &str) -> std::result::Result<&Stage, ConfigError> {
        self.stages
            .iter()
            .find(|stage| stage.id() == Some(id))
            .ok_or_else(|| ConfigError::StageNotFound {
                job: job.to_string(),
                stage: id.to_string(),
            })
    }
}
