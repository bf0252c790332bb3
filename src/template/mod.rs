//! Placeholder substitution for stage arguments.
//!
//! Stage `vars`, task `args` and shell scripts may reference values of the run
//! context with `${{ path.to.value }}`. Path segments are object keys or array
//! indices:
//!
//! ```ignore
//! use workflow_engine::template::substitute;
//!
//! // context: {"params": {"name": "demo"}, "stages": {"count": {"outputs": {"rows": 3}}}}
//! substitute("${{ stages.count.outputs.rows }}", &ctx)?; // -> 3 (a number)
//! substitute("hello ${{ params.name }}", &ctx)?;          // -> "hello demo"
//! ```

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::TemplateError;

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{\{\s*(?P<path>[A-Za-z0-9_\-.]+)\s*\}\}")
            .expect("placeholder pattern is valid")
    })
}

/// Substitutes every placeholder of `template` with values from `context`.
///
/// A template made of exactly one placeholder yields the referenced value
/// unchanged, keeping its JSON type. Otherwise the placeholders are rendered
/// into the string: strings verbatim, everything else as JSON.
///
/// # Errors
///
/// Returns `TemplateError::Unresolved` for a path missing from the context.
pub fn substitute(template: &str, context: &Context) -> Result<Value, TemplateError> {
    let re = placeholder();

    if let Some(caps) = re.captures(template) {
        let whole = caps.get(0).expect("group 0 always matches");
        if whole.start() == 0 && whole.end() == template.len() {
            return lookup(context.as_map(), &caps["path"]).cloned();
        }
    } else {
        return Ok(Value::String(template.to_string()));
    }

    let mut failure = None;
    let rendered = re.replace_all(template, |caps: &Captures| {
        match lookup(context.as_map(), &caps["path"]) {
            Ok(value) => render(value),
            Err(e) => {
                failure.get_or_insert(e);
                String::new()
            }
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(Value::String(rendered.into_owned())),
    }
}

/// Substitutes a template and renders the result as a string.
pub fn substitute_str(template: &str, context: &Context) -> Result<String, TemplateError> {
    substitute(template, context).map(|value| render(&value))
}

/// Applies [`substitute`] to every string nested in `value`.
pub fn substitute_value(value: &Value, context: &Context) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => substitute(s, context),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute_value(item, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => substitute_map(map, context).map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Applies [`substitute_value`] to every value of a map.
pub fn substitute_map(
    map: &Map<String, Value>,
    context: &Context,
) -> Result<Map<String, Value>, TemplateError> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), substitute_value(value, context)?)))
        .collect()
}

/// Follows a dotted path through nested objects and arrays.
fn lookup<'a>(root: &'a Map<String, Value>, path: &str) -> Result<&'a Value, TemplateError> {
    let unresolved = || TemplateError::Unresolved(path.to_string());
    let mut segments = path.split('.');

    let first = segments.next().ok_or_else(unresolved)?;
    let mut current = root.get(first).ok_or_else(unresolved)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(unresolved)?;
    }

    Ok(current)
}

/// String form of a value inside a larger template.
pub(crate) fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
