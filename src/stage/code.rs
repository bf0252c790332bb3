//! Code stage: inline statements evaluated by the embedded expression engine.
//!
//! `run` holds one statement per line:
//!
//! ```yaml
//! - name: Compute totals
//!   id: totals
//!   vars:
//!     rows: ${{ stages.extract.outputs.rows }}
//!   run: |
//!     # comments and blank lines are skipped
//!     total = rows | length
//!     label = "rows: " ~ total
//!     global counter = counter + 1
//! ```
//!
//! Expressions use Tera syntax and only see the run context, the stage's
//! globals, its `vars` and the locals bound by earlier statements. Only the
//! locals become the stage outputs; a global overwrites the top-level context
//! key of the same name when that key already exists.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tera::Tera;
use thiserror::Error;
use tracing::debug;

use super::set_outputs;
use crate::context::Context;
use crate::error::{Result, TemplateError, WorkflowError};
use crate::template::substitute;

/// Binding used to carry an expression's value out of the template.
const RESULT_BINDING: &str = "__result";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodeStage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    /// Statements, one per line.
    pub run: String,
    /// Extra bindings, substituted against the context before the run.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,
}

/// Bindings produced by one evaluation.
#[derive(Debug, Default, PartialEq)]
struct Evaluation {
    vars: Map<String, Value>,
    locals: Map<String, Value>,
    globals: Map<String, Value>,
}

#[derive(Debug, Error)]
enum CodeError {
    #[error(transparent)]
    Statement(#[from] TemplateError),

    #[error("line {line}: {message}")]
    Evaluation { line: usize, message: String },
}

impl CodeError {
    fn kind(&self) -> &'static str {
        match self {
            CodeError::Statement(_) => "SyntaxError",
            CodeError::Evaluation { .. } => "EvaluationError",
        }
    }
}

/// A parsed `[global] name = expression` line.
struct Statement<'a> {
    global: bool,
    name: &'a str,
    expression: &'a str,
}

static STATEMENT: OnceLock<Regex> = OnceLock::new();

fn parse_statement(line: &str) -> Option<Statement<'_>> {
    let re = STATEMENT.get_or_init(|| {
        Regex::new(r"^(?:(?P<global>global)\s+)?(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*=(?P<expr>[^=].*)$")
            .expect("statement pattern is valid")
    });

    let caps = re.captures(line)?;
    let expression = caps.name("expr")?.as_str().trim();
    if expression.is_empty() {
        return None;
    }

    Some(Statement {
        global: caps.name("global").is_some(),
        name: caps.name("name")?.as_str(),
        expression,
    })
}

impl CodeStage {
    pub fn new(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            run: run.into(),
            vars: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.vars.insert(key.into(), template.into());
        self
    }

    pub(crate) fn execute(&self, context: &mut Context) -> Result<()> {
        let mut vars = Map::new();
        for (key, template) in &self.vars {
            vars.insert(key.clone(), substitute(template, context)?);
        }

        let evaluation =
            evaluate(&self.run, context, vars).map_err(|e| WorkflowError::StageExecution {
                stage: self.name.clone(),
                kind: e.kind().to_string(),
                message: e.to_string(),
                source_text: Some(self.run.clone()),
            })?;

        for (key, value) in evaluation.globals {
            if context.contains_key(&key) {
                context.insert(key, value);
            }
        }

        set_outputs(
            self.id.as_deref(),
            Value::Object(evaluation.locals),
            context,
        );
        Ok(())
    }
}

/// Evaluates `source` statement by statement.
///
/// `vars` are visible to every expression but are not locals, so they never
/// reach the outputs.
fn evaluate(
    source: &str,
    context: &Context,
    vars: Map<String, Value>,
) -> std::result::Result<Evaluation, CodeError> {
    let mut evaluation = Evaluation {
        vars,
        ..Evaluation::default()
    };

    for (index, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let statement = parse_statement(line).ok_or_else(|| TemplateError::InvalidStatement {
            line: index + 1,
            statement: line.to_string(),
        })?;

        let value = eval_expression(statement.expression, context, &evaluation).map_err(
            |message| CodeError::Evaluation {
                line: index + 1,
                message,
            },
        )?;
        debug!(name = statement.name, global = statement.global, "Bound value");

        let target = if statement.global {
            &mut evaluation.globals
        } else {
            &mut evaluation.locals
        };
        target.insert(statement.name.to_string(), value);
    }

    Ok(evaluation)
}

/// Evaluates one Tera expression and returns its JSON value.
fn eval_expression(
    expression: &str,
    context: &Context,
    evaluation: &Evaluation,
) -> std::result::Result<Value, String> {
    let mut scope = context.as_map().clone();
    scope.extend(evaluation.globals.clone());
    scope.extend(evaluation.vars.clone());
    scope.extend(evaluation.locals.clone());

    let tera_context = tera::Context::from_serialize(&scope).map_err(|e| error_chain(&e))?;
    let template = format!(
        "{{% set {result} = {expression} %}}{{{{ {result} | json_encode() }}}}",
        result = RESULT_BINDING,
        expression = expression
    );

    let rendered = Tera::one_off(&template, &tera_context, false).map_err(|e| error_chain(&e))?;
    serde_json::from_str(&rendered).map_err(|e| e.to_string())
}

/// Joins an error with its sources, innermost last.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(stage: &CodeStage, ctx: &mut Context) -> Result<()> {
        stage.execute(ctx)
    }

    #[test]
    fn test_parse_statement() {
        let s = parse_statement("x = 1 + 1").unwrap();
        assert!(!s.global);
        assert_eq!(s.name, "x");
        assert_eq!(s.expression, "1 + 1");

        let s = parse_statement("global total=total + 1").unwrap();
        assert!(s.global);
        assert_eq!(s.name, "total");

        assert!(parse_statement("x == 1").is_none());
        assert!(parse_statement("print(x)").is_none());
        assert!(parse_statement("x =").is_none());
    }

    #[test]
    fn test_simple_assignment_outputs() {
        let stage = CodeStage::new("calc", "x = 1 + 1").with_id("calc");
        let mut ctx = Context::new();
        run(&stage, &mut ctx).unwrap();
        assert_eq!(ctx.stage_outputs("calc"), Some(&json!({"x": 2})));
    }

    #[test]
    fn test_statements_see_context_vars_and_earlier_locals() {
        let stage = CodeStage::new(
            "greet",
            "# build a greeting\n\nprefix = \"hello \" ~ who\nmessage = prefix ~ \"!\"\nlimit = params.limit * 2",
        )
        .with_id("greet")
        .with_var("who", "${{ params.name }}");

        let mut ctx = Context::new();
        ctx.insert("params", json!({"name": "demo", "limit": 5}));
        run(&stage, &mut ctx).unwrap();

        assert_eq!(
            ctx.stage_outputs("greet"),
            Some(&json!({
                "prefix": "hello demo",
                "message": "hello demo!",
                "limit": 10
            }))
        );
    }

    #[test]
    fn test_vars_are_not_outputs() {
        let stage = CodeStage::new("c", "x = 1").with_id("c").with_var("y", "2");
        let mut ctx = Context::new();
        run(&stage, &mut ctx).unwrap();
        assert_eq!(ctx.stage_outputs("c"), Some(&json!({"x": 1})));
    }

    #[test]
    fn test_locals_shadow_vars() {
        let stage = CodeStage::new("c", "y = y ~ \"!\"\nz = y").with_id("c").with_var("y", "hi");
        let mut ctx = Context::new();
        run(&stage, &mut ctx).unwrap();
        assert_eq!(ctx.stage_outputs("c"), Some(&json!({"y": "hi!", "z": "hi!"})));
    }

    #[test]
    fn test_globals_overwrite_existing_context_keys_only() {
        let stage = CodeStage::new("count", "global counter = counter + 1\nglobal fresh = 1");
        let mut ctx = Context::new();
        ctx.insert("counter", json!(41));
        run(&stage, &mut ctx).unwrap();

        assert_eq!(ctx.get("counter"), Some(&json!(42)));
        assert!(!ctx.contains_key("fresh"));
        assert!(!ctx.contains_key("stages"));
    }

    #[test]
    fn test_invalid_statement_is_stage_error() {
        let stage = CodeStage::new("bad", "import os");
        let err = run(&stage, &mut Context::new()).unwrap_err();
        match err {
            WorkflowError::StageExecution {
                stage,
                kind,
                source_text,
                ..
            } => {
                assert_eq!(stage, "bad");
                assert_eq!(kind, "SyntaxError");
                assert_eq!(source_text.as_deref(), Some("import os"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_undefined_name_is_evaluation_error() {
        let stage = CodeStage::new("bad", "x = missing + 1");
        let err = run(&stage, &mut Context::new()).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::StageExecution { ref kind, .. } if kind == "EvaluationError"
        ));
    }

    #[test]
    fn test_unresolved_var_propagates_as_template_error() {
        let stage = CodeStage::new("v", "x = 1").with_var("y", "${{ params.nope }}");
        let err = run(&stage, &mut Context::new()).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Template(TemplateError::Unresolved(_))
        ));
    }
}
