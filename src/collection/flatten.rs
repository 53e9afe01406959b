// src/collection/flatten.rs

//! Linearise the item tree into the list the cursor walks.
//!
//! Every leaf carries what it inherits from its ancestors:
//! - events of each kind, concatenated root-to-leaf (every level runs, not
//!   just the innermost);
//! - the effective auth, where a closer scope overrides a farther one
//!   (request > item groups > collection).

use std::sync::Arc;

use crate::collection::model::{Auth, Collection, Event, Item, ItemNode, Script};
use crate::types::Listen;

/// A runnable item together with everything inherited from its ancestors.
#[derive(Debug, Clone)]
pub struct FlatItem {
    pub item: Arc<Item>,
    /// Names of enclosing groups, outermost first.
    pub path: Vec<String>,
    /// Effective auth (`None` for no auth).
    pub auth: Option<Auth>,
    /// Prerequest scripts, root-to-leaf.
    pub prerequest: Vec<Script>,
    /// Test scripts, root-to-leaf.
    pub test: Vec<Script>,
}

impl FlatItem {
    pub fn scripts(&self, listen: Listen) -> &[Script] {
        match listen {
            Listen::Prerequest => &self.prerequest,
            Listen::Test => &self.test,
        }
    }
}

/// One level of the ancestor chain.
struct Level<'a> {
    name: &'a str,
    auth: Option<&'a Auth>,
    events: &'a [Event],
}

pub fn flatten(collection: &Collection) -> Vec<FlatItem> {
    let mut chain = vec![Level {
        name: collection.name.as_str(),
        auth: collection.auth.as_ref(),
        events: &collection.events,
    }];
    let mut out = Vec::new();
    walk(&collection.items, &mut chain, &mut out);
    out
}

fn walk<'a>(nodes: &'a [ItemNode], chain: &mut Vec<Level<'a>>, out: &mut Vec<FlatItem>) {
    for node in nodes {
        match node {
            ItemNode::Group(group) => {
                chain.push(Level {
                    name: group.name.as_str(),
                    auth: group.auth.as_ref(),
                    events: &group.events,
                });
                walk(&group.items, chain, out);
                chain.pop();
            }
            ItemNode::Item(item) => out.push(flatten_item(item, chain)),
        }
    }
}

fn flatten_item(item: &Item, chain: &[Level<'_>]) -> FlatItem {
    let request_auth = item.request.as_ref().and_then(|r| r.auth.as_ref());
    let auths = chain
        .iter()
        .map(|level| level.auth)
        .chain(std::iter::once(request_auth));

    FlatItem {
        item: Arc::new(item.clone()),
        path: chain.iter().skip(1).map(|l| l.name.to_string()).collect(),
        auth: resolve_auth(auths),
        prerequest: collect_scripts(chain, item, Listen::Prerequest),
        test: collect_scripts(chain, item, Listen::Test),
    }
}

/// Walk auth definitions root-to-leaf; each explicit definition overrides
/// what came before it, `inherit` (or nothing) keeps it.
pub fn resolve_auth<'a>(root_to_leaf: impl IntoIterator<Item = Option<&'a Auth>>) -> Option<Auth> {
    let mut effective: Option<&Auth> = None;
    for auth in root_to_leaf.into_iter().flatten() {
        if auth.is_inherit() {
            continue;
        }
        effective = Some(auth);
    }
    effective.filter(|a| !a.is_noauth()).cloned()
}

fn collect_scripts(chain: &[Level<'_>], item: &Item, listen: Listen) -> Vec<Script> {
    chain
        .iter()
        .flat_map(|level| level.events.iter())
        .chain(item.events.iter())
        .filter(|event| event.listen == listen)
        .map(|event| event.script.clone())
        .collect()
}

/// Position of the item whose id (preferred) or name equals `target`.
pub fn find_position(items: &[FlatItem], target: &str) -> Option<usize> {
    items
        .iter()
        .position(|f| !f.item.id.is_empty() && f.item.id == target)
        .or_else(|| items.iter().position(|f| f.item.name == target))
}
