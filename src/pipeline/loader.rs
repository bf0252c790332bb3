//! Loads named definitions from a directory of YAML files.
//!
//! Every `*.yaml` / `*.yml` file below the configuration path is a mapping of
//! definition name to definition:
//!
//! ```yaml
//! ingest-daily:
//!   type: pipeline
//!   params:
//!     run-date: {type: datetime}
//!   jobs:
//!     extract:
//!       stages:
//!         - name: Start
//! ```
//!
//! Files are visited in path order, so the first file defining a name wins.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::ConfigError;

/// Scans a configuration directory for definitions.
#[derive(Debug, Clone)]
pub struct Loader {
    conf_path: PathBuf,
}

impl Loader {
    pub fn new(conf_path: impl Into<PathBuf>) -> Self {
        Self {
            conf_path: conf_path.into(),
        }
    }

    pub fn conf_path(&self) -> &Path {
        &self.conf_path
    }

    /// Returns the definition called `name`.
    ///
    /// Keys of `externals` overwrite the top-level keys of the definition.
    ///
    /// # Errors
    ///
    /// `PipelineNotFound` when no file defines `name`, `Parse` when a file is
    /// not a YAML mapping.
    pub fn load(
        &self,
        name: &str,
        externals: &Map<String, Value>,
    ) -> Result<Map<String, Value>, ConfigError> {
        for path in self.files()? {
            let mut definitions = read_definitions(&path)?;
            let Some(definition) = definitions.remove(name) else {
                continue;
            };

            let mut definition = match definition {
                Value::Object(map) => map,
                _ => {
                    return Err(ConfigError::Parse {
                        path: path.display().to_string(),
                        message: format!("definition '{}' is not a mapping", name),
                    })
                }
            };

            debug!(name, path = %path.display(), "Loaded definition");
            for (key, value) in externals {
                definition.insert(key.clone(), value.clone());
            }
            return Ok(definition);
        }

        Err(ConfigError::PipelineNotFound(name.to_string()))
    }

    /// Every definition name, sorted and deduplicated.
    pub fn names(&self) -> Result<Vec<String>, ConfigError> {
        self.collect_names(|_| true)
    }

    /// Names of the definitions that declare `jobs`.
    pub fn pipeline_names(&self) -> Result<Vec<String>, ConfigError> {
        self.collect_names(|definition| {
            definition
                .as_object()
                .is_some_and(|map| map.contains_key("jobs"))
        })
    }

    fn collect_names<F>(&self, keep: F) -> Result<Vec<String>, ConfigError>
    where
        F: Fn(&Value) -> bool,
    {
        let mut names = Vec::new();
        for path in self.files()? {
            for (name, definition) in read_definitions(&path)? {
                if keep(&definition) {
                    names.push(name);
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// YAML files below the configuration path, in path order.
    fn files(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.conf_path).sort_by_file_name() {
            let entry = entry.map_err(|e| ConfigError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let is_yaml = entry
                .path()
                .extension()
                .map(|ext| ext == "yaml" || ext == "yml")
                .unwrap_or(false);

            if is_yaml {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }
}

/// Parses one file into its name → definition mapping.
fn read_definitions(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Map::new());
    }

    let parse_error = |message: String| ConfigError::Parse {
        path: path.display().to_string(),
        message,
    };

    match serde_yaml::from_str::<Value>(&content).map_err(|e| parse_error(e.to_string()))? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(parse_error("top level must be a mapping".to_string())),
    }
}
