use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;
use runwright::collection::{Collection, Request};
use runwright::exec::{
    BoxFuture, RequestResolver, SecretRequest, SecretResolution, SecretResolver,
};
use serde_json::Value;

/// Resolves request ids from a fixed table. Unknown ids are an error.
#[derive(Debug, Default)]
pub struct StaticRequestResolver {
    table: HashMap<String, Value>,
    calls: Mutex<Vec<String>>,
}

impl StaticRequestResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, request_id: &str, collection: &Collection) -> Self {
        let raw = serde_json::to_value(collection).expect("collection serialises");
        self.table.insert(request_id.to_string(), raw);
        self
    }

    /// Answer `request_id` with arbitrary JSON.
    pub fn with_raw(mut self, request_id: &str, raw: Value) -> Self {
        self.table.insert(request_id.to_string(), raw);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl RequestResolver for StaticRequestResolver {
    fn resolve<'a>(&'a self, request_id: &'a str) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(request_id.to_string());
            self.table
                .get(request_id)
                .cloned()
                .ok_or_else(|| anyhow!("no such request"))
        })
    }
}

/// Resolves secrets by key from a fixed table; missing keys get an error
/// resolution.
#[derive(Debug, Default)]
pub struct StaticSecretResolver {
    values: HashMap<String, String>,
    fail: bool,
    seen: Mutex<Vec<SecretRequest>>,
}

impl StaticSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    /// Fail the whole batch.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn seen(&self) -> Vec<SecretRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl SecretResolver for StaticSecretResolver {
    fn resolve<'a>(
        &'a self,
        secrets: Vec<SecretRequest>,
        _request: &'a Request,
    ) -> BoxFuture<'a, anyhow::Result<Vec<SecretResolution>>> {
        Box::pin(async move {
            self.seen.lock().unwrap().extend(secrets.iter().cloned());
            if self.fail {
                return Err(anyhow!("vault unavailable"));
            }
            Ok(secrets
                .iter()
                .map(|s| match self.values.get(&s.variable.key) {
                    Some(value) => SecretResolution {
                        resolved_value: Some(value.clone()),
                        ..SecretResolution::default()
                    },
                    None => SecretResolution {
                        error: Some(format!("unknown secret '{}'", s.variable.key)),
                        ..SecretResolution::default()
                    },
                })
                .collect())
        })
    }
}
