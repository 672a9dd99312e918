//! The data context threaded through a run.
//!
//! Each executor receives the current context and returns a new one with its
//! result bound under a variable name. Binding an existing name replaces the
//! earlier value: the last writer wins, and nothing warns about it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Prefix reserved for scratch keys that must not outlive a step.
pub const INTERNAL_KEY_PREFIX: &str = "__";

/// An immutable-update mapping from variable name to JSON value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext(Map<String, JsonValue>);

impl ExecutionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from caller-supplied data.
    ///
    /// Objects become the initial variables; `null` yields an empty context;
    /// any other value is bound under `input`.
    #[must_use]
    pub fn from_initial_data(data: Option<JsonValue>) -> Self {
        match data {
            None | Some(JsonValue::Null) => Self::new(),
            Some(JsonValue::Object(map)) => Self(map),
            Some(other) => Self::new().with_variable("input", other),
        }
    }

    /// Returns a new context with `name` bound to `value`.
    #[must_use]
    pub fn with_variable(&self, name: impl Into<String>, value: JsonValue) -> Self {
        let mut map = self.0.clone();
        map.insert(name.into(), value);
        Self(map)
    }

    /// Returns a copy without any scratch keys.
    #[must_use]
    pub fn without_internal_keys(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(key, _)| !key.starts_with(INTERNAL_KEY_PREFIX))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }

    /// Returns the value bound to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.0.get(name)
    }

    /// Returns true if `name` is bound.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Returns the number of bound variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the bound variable names.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Returns the variables as a JSON map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, JsonValue> {
        &self.0
    }

    /// Converts the context into a JSON object, e.g. for persisting as output.
    #[must_use]
    pub fn into_json(self) -> JsonValue {
        JsonValue::Object(self.0)
    }
}

impl From<Map<String, JsonValue>> for ExecutionContext {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}
