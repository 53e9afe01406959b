use std::sync::Arc;

use serde_json::Value;

use super::{ScopeMutations, ScopeName, Variable, VariableScope};

/// The variable scopes visible to one item execution.
///
/// Each scope sits behind an `Arc`; writes go through [`Arc::make_mut`], so a
/// clone of a `ScopeSet` is cheap and scopes nobody wrote to keep their
/// identity.
#[derive(Debug, Clone, Default)]
pub struct ScopeSet {
    pub local: Arc<VariableScope>,
    pub data: Arc<VariableScope>,
    pub collection_variables: Arc<VariableScope>,
    pub environment: Arc<VariableScope>,
    pub globals: Arc<VariableScope>,
}

impl ScopeSet {
    pub fn new(
        collection_variables: VariableScope,
        environment: VariableScope,
        globals: VariableScope,
    ) -> Self {
        Self {
            local: Arc::default(),
            data: Arc::default(),
            collection_variables: Arc::new(collection_variables),
            environment: Arc::new(environment),
            globals: Arc::new(globals),
        }
    }

    pub fn scope(&self, name: ScopeName) -> &Arc<VariableScope> {
        match name {
            ScopeName::Local => &self.local,
            ScopeName::Data => &self.data,
            ScopeName::CollectionVariables => &self.collection_variables,
            ScopeName::Environment => &self.environment,
            ScopeName::Globals => &self.globals,
        }
    }

    pub fn scope_mut(&mut self, name: ScopeName) -> &mut VariableScope {
        Arc::make_mut(self.slot(name))
    }

    fn slot(&mut self, name: ScopeName) -> &mut Arc<VariableScope> {
        match name {
            ScopeName::Local => &mut self.local,
            ScopeName::Data => &mut self.data,
            ScopeName::CollectionVariables => &mut self.collection_variables,
            ScopeName::Environment => &mut self.environment,
            ScopeName::Globals => &mut self.globals,
        }
    }

    pub fn apply(&mut self, mutations: &ScopeMutations) {
        for (name, scope_mutations) in mutations.iter() {
            if scope_mutations.is_empty() {
                continue;
            }
            self.scope_mut(name).apply(scope_mutations);
        }
    }

    /// Take every scope of the `in_flight` snapshot that diverged from this
    /// one. A diverged scope replaces the persisted one whole, so unsets and
    /// clears carry over along with writes.
    pub fn overlay(&mut self, in_flight: &ScopeSet) {
        for name in ScopeName::ALL {
            let incoming = in_flight.scope(name);
            if Arc::ptr_eq(incoming, self.scope(name)) {
                continue;
            }
            *self.slot(name) = Arc::clone(incoming);
        }
    }

    /// Look a key up by precedence: local, data, environment, collection,
    /// globals.
    pub fn resolve(&self, key: &str) -> Option<&Value> {
        self.resolve_variable(key).map(|v| &v.value)
    }

    /// Like [`ScopeSet::resolve`], returning the whole enabled variable.
    pub fn resolve_variable(&self, key: &str) -> Option<&Variable> {
        [
            &self.local,
            &self.data,
            &self.environment,
            &self.collection_variables,
            &self.globals,
        ]
        .into_iter()
        .find_map(|scope| scope.variable(key).filter(|v| !v.disabled))
    }
}
