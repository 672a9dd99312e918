//! Templated configuration fields.
//!
//! Executors render user-written templates (`{{ api.data.id }}`) against the
//! current context. The engine is a seam: anything that can compile a
//! template and render it against a context will do. The default is
//! minijinja with chainable undefined values, so unknown paths render as an
//! empty string, plus a `json` helper usable as `{{ json(x) }}` or
//! `{{ x | json }}`.
//!
//! Compile and render failures are configuration errors: they mean the user
//! wrote a bad template, not that something downstream is flaky.

use crate::context::ExecutionContext;
use crate::error::NodeError;
use minijinja::{Environment, UndefinedBehavior, Value};

/// A template that has been checked and can be rendered repeatedly.
pub trait CompiledTemplate: Send + Sync {
    /// Renders against a context.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Configuration`] if rendering fails.
    fn render(&self, context: &ExecutionContext) -> Result<String, NodeError>;
}

/// Compiles template strings.
pub trait TemplateEngine: Send + Sync {
    /// Compiles a template.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Configuration`] if the template does not parse.
    fn compile(&self, template: &str) -> Result<Box<dyn CompiledTemplate>, NodeError>;

    /// Compiles and renders in one go.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Configuration`] on compile or render failure.
    fn render(&self, template: &str, context: &ExecutionContext) -> Result<String, NodeError> {
        self.compile(template)?.render(context)
    }
}

/// The default minijinja-backed engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct JinjaTemplates;

impl JinjaTemplates {
    /// Creates the engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    env.add_function("json", json_helper);
    env.add_filter("json", json_helper);
    env
}

fn json_helper(value: Value) -> Result<String, minijinja::Error> {
    serde_json::to_string(&value).map_err(|e| {
        minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string())
    })
}

fn template_error(e: &minijinja::Error) -> NodeError {
    NodeError::configuration(format!("template error: {e}"))
}

struct JinjaTemplate {
    source: String,
}

impl CompiledTemplate for JinjaTemplate {
    fn render(&self, context: &ExecutionContext) -> Result<String, NodeError> {
        environment()
            .render_str(&self.source, Value::from_serialize(context.as_map()))
            .map_err(|e| template_error(&e))
    }
}

impl TemplateEngine for JinjaTemplates {
    fn compile(&self, template: &str) -> Result<Box<dyn CompiledTemplate>, NodeError> {
        environment()
            .template_from_str(template)
            .map_err(|e| template_error(&e))?;
        Ok(Box::new(JinjaTemplate {
            source: template.to_string(),
        }))
    }
}
