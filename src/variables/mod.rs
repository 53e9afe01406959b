// src/variables/mod.rs

//! Variable scopes.
//!
//! - [`VariableScope`] is an ordered key-value list (insertion order kept).
//! - [`ScopeSet`] bundles the five scopes a script or request sees.
//! - [`Substitutor`] expands `{{name}}` placeholders against a `ScopeSet`.
//!
//! Scripts never hand back whole scopes; they report [`ScopeMutations`], an
//! ordered journal per scope, so the same writes can be replayed into shared
//! state, a partition, or a parent run.

pub mod scope_set;
pub mod substitute;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use scope_set::ScopeSet;
pub use substitute::Substitutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScopeName {
    Local,
    Data,
    CollectionVariables,
    Environment,
    Globals,
}

impl ScopeName {
    pub const ALL: [ScopeName; 5] = [
        ScopeName::Local,
        ScopeName::Data,
        ScopeName::CollectionVariables,
        ScopeName::Environment,
        ScopeName::Globals,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScopeName::Local => "local",
            ScopeName::Data => "data",
            ScopeName::CollectionVariables => "collectionVariables",
            ScopeName::Environment => "environment",
            ScopeName::Globals => "globals",
        }
    }
}

impl fmt::Display for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exported variables carry free-form types (`string`, `any`, ...); only
/// `secret` changes behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VariableKind {
    Secret,
    #[default]
    Default,
}

impl From<String> for VariableKind {
    fn from(kind: String) -> Self {
        if kind.eq_ignore_ascii_case("secret") {
            VariableKind::Secret
        } else {
            VariableKind::Default
        }
    }
}

impl From<VariableKind> for String {
    fn from(kind: VariableKind) -> Self {
        match kind {
            VariableKind::Secret => "secret".to_string(),
            VariableKind::Default => "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub key: String,

    #[serde(default)]
    pub value: Value,

    #[serde(default, rename = "type")]
    pub kind: VariableKind,

    #[serde(default)]
    pub disabled: bool,
}

impl Variable {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind: VariableKind::Default,
            disabled: false,
        }
    }

    pub fn secret(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            kind: VariableKind::Secret,
            ..Self::new(key, value)
        }
    }

    pub fn is_secret(&self) -> bool {
        self.kind == VariableKind::Secret
    }
}

/// Render a variable value the way it is substituted into request text.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One write recorded by a script execution.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableMutation {
    Set { key: String, value: Value },
    Unset { key: String },
    Clear,
}

/// Ordered key-value variable list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableScope {
    values: Vec<Variable>,
}

impl VariableScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut scope = Self::new();
        for (k, v) in pairs {
            scope.set(k, v);
        }
        scope
    }

    pub fn from_variables(values: Vec<Variable>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.values.iter()
    }

    pub fn variable(&self, key: &str) -> Option<&Variable> {
        self.values.iter().find(|v| v.key == key)
    }

    /// Value of an enabled variable.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variable(key)
            .filter(|v| !v.disabled)
            .map(|v| &v.value)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).map(value_to_string)
    }

    /// Upsert. An existing variable keeps its position and kind.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.values.iter_mut().find(|v| v.key == key) {
            Some(existing) => {
                existing.value = value;
                existing.disabled = false;
            }
            None => self.values.push(Variable::new(key, value)),
        }
    }

    pub fn insert(&mut self, variable: Variable) {
        match self.values.iter_mut().find(|v| v.key == variable.key) {
            Some(existing) => *existing = variable,
            None => self.values.push(variable),
        }
    }

    pub fn unset(&mut self, key: &str) -> bool {
        let before = self.values.len();
        self.values.retain(|v| v.key != key);
        before != self.values.len()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn apply(&mut self, mutations: &[VariableMutation]) {
        for mutation in mutations {
            match mutation {
                VariableMutation::Set { key, value } => self.set(key.clone(), value.clone()),
                VariableMutation::Unset { key } => {
                    self.unset(key);
                }
                VariableMutation::Clear => self.clear(),
            }
        }
    }

    /// Upsert every variable of `other` into `self`.
    pub fn overlay(&mut self, other: &VariableScope) {
        for variable in other.iter() {
            self.insert(variable.clone());
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .filter(|v| !v.disabled)
            .map(|v| (v.key.clone(), v.value.clone()))
            .collect()
    }
}

/// Per-scope mutation journal reported by one or more script executions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeMutations(BTreeMap<ScopeName, Vec<VariableMutation>>);

impl ScopeMutations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, scope: ScopeName, mutation: VariableMutation) {
        self.0.entry(scope).or_default().push(mutation);
    }

    pub fn set(&mut self, scope: ScopeName, key: impl Into<String>, value: impl Into<Value>) {
        self.push(
            scope,
            VariableMutation::Set {
                key: key.into(),
                value: value.into(),
            },
        );
    }

    pub fn unset(&mut self, scope: ScopeName, key: impl Into<String>) {
        self.push(scope, VariableMutation::Unset { key: key.into() });
    }

    /// Append `other` after the mutations already recorded.
    pub fn extend(&mut self, other: ScopeMutations) {
        for (scope, mutations) in other.0 {
            self.0.entry(scope).or_default().extend(mutations);
        }
    }

    pub fn get(&self, scope: ScopeName) -> &[VariableMutation] {
        self.0.get(&scope).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScopeName, &[VariableMutation])> {
        self.0.iter().map(|(scope, m)| (*scope, m.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    /// Copy without the given scope (used to keep per-iteration data rows
    /// out of persisted state).
    pub fn without(&self, scope: ScopeName) -> ScopeMutations {
        let mut out = self.clone();
        out.0.remove(&scope);
        out
    }
}
