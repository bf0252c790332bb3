//! The run context shared by every job and stage of one pipeline run.
//!
//! The context is a JSON object with two reserved keys:
//!
//! - `params`: coerced pipeline parameters
//! - `stages`: `stage-id -> { outputs: ... }`, filled as stages with an id complete
//!
//! Stages receive it as `&mut Context` so that every write is visible to the
//! stages and jobs that follow and to the caller of `Pipeline::execute`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved key holding the coerced parameters.
pub const PARAMS_KEY: &str = "params";

/// Reserved key holding stage outputs.
pub const STAGES_KEY: &str = "stages";

/// Key of the outputs object inside a stage entry.
pub const OUTPUTS_KEY: &str = "outputs";

/// Mutable key/value store threaded through a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(Map<String, Value>);

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Creates a context holding only `params`.
    pub fn with_params(params: Map<String, Value>) -> Self {
        let mut ctx = Self::new();
        ctx.insert(PARAMS_KEY, Value::Object(params));
        ctx
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the coerced parameters, if any were set.
    pub fn params(&self) -> Option<&Map<String, Value>> {
        self.0.get(PARAMS_KEY).and_then(Value::as_object)
    }

    /// Returns `stages[id].outputs`, if that stage recorded outputs.
    pub fn stage_outputs(&self, id: &str) -> Option<&Value> {
        self.0
            .get(STAGES_KEY)
            .and_then(|stages| stages.get(id))
            .and_then(|stage| stage.get(OUTPUTS_KEY))
    }

    /// Writes `stages[id] = { outputs }`, replacing any previous entry.
    ///
    /// `stages` is created when absent, or replaced when it is not an object.
    pub fn set_stage_outputs(&mut self, id: &str, outputs: Value) {
        let stages = self
            .0
            .entry(STAGES_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !stages.is_object() {
            *stages = Value::Object(Map::new());
        }
        if let Value::Object(stages) = stages {
            let mut entry = Map::new();
            entry.insert(OUTPUTS_KEY.to_string(), outputs);
            stages.insert(id.to_string(), Value::Object(entry));
        }
    }

    /// Ids of the stages that recorded outputs, in completion order.
    pub fn stage_ids(&self) -> Vec<&str> {
        self.0
            .get(STAGES_KEY)
            .and_then(Value::as_object)
            .map(|stages| stages.keys().map(|k| k.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Context {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_params() {
        let mut params = Map::new();
        params.insert("name".to_string(), json!("demo"));
        let ctx = Context::with_params(params);

        assert_eq!(ctx.params().unwrap()["name"], "demo");
        assert!(ctx.stage_ids().is_empty());
    }

    #[test]
    fn test_set_stage_outputs_creates_stages() {
        let mut ctx = Context::new();
        ctx.set_stage_outputs("extract", json!({"rows": 3}));

        assert_eq!(ctx.stage_outputs("extract"), Some(&json!({"rows": 3})));
        assert_eq!(
            ctx.get(STAGES_KEY),
            Some(&json!({"extract": {"outputs": {"rows": 3}}}))
        );
    }

    #[test]
    fn test_set_stage_outputs_last_write_wins() {
        let mut ctx = Context::new();
        ctx.set_stage_outputs("x", json!({"v": 1}));
        ctx.set_stage_outputs("x", json!({"v": 2}));

        assert_eq!(ctx.stage_outputs("x"), Some(&json!({"v": 2})));
        assert_eq!(ctx.stage_ids(), vec!["x"]);
    }

    #[test]
    fn test_set_stage_outputs_replaces_non_object_stages() {
        let mut ctx = Context::new();
        ctx.insert(STAGES_KEY, json!("not a map"));
        ctx.set_stage_outputs("a", json!(1));
        assert_eq!(ctx.stage_outputs("a"), Some(&json!(1)));
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let mut ctx = Context::new();
        ctx.insert("k", json!(true));
        assert_eq!(serde_json::to_value(&ctx).unwrap(), json!({"k": true}));
    }
}
