use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::{ScopeSet, value_to_string};

/// Upper bound on placeholder expansion passes, so self-referencing
/// variables terminate.
pub const MAX_SUBSTITUTION_PASSES: usize = 19;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([^{}]+)\}\}").expect("placeholder pattern is valid")
});

/// Expands `{{name}}` placeholders. Unknown names are left as written.
#[derive(Debug, Clone, Copy)]
pub struct Substitutor<'a> {
    scopes: &'a ScopeSet,
    hold_secrets: bool,
}

impl<'a> Substitutor<'a> {
    pub fn new(scopes: &'a ScopeSet) -> Self {
        Self {
            scopes,
            hold_secrets: false,
        }
    }

    /// Leave placeholders of secret variables untouched, so they can be
    /// expanded once the secret resolver has run.
    pub fn holding_secrets(mut self) -> Self {
        self.hold_secrets = true;
        self
    }

    pub fn lookup(&self, key: &str) -> Option<String> {
        let variable = self.scopes.resolve_variable(key.trim())?;
        if self.hold_secrets && variable.is_secret() {
            return None;
        }
        Some(value_to_string(&variable.value))
    }

    pub fn substitute(&self, input: &str) -> String {
        let mut current = input.to_string();

        for _ in 0..MAX_SUBSTITUTION_PASSES {
            if !current.contains("{{") {
                break;
            }
            let replaced = PLACEHOLDER.replace_all(&current, |caps: &Captures<'_>| {
                self.lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
            });
            match replaced {
                Cow::Borrowed(_) => break,
                Cow::Owned(next) => {
                    if next == current {
                        break;
                    }
                    current = next;
                }
            }
        }

        current
    }
}
