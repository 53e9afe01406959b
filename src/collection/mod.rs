// src/collection/mod.rs

//! Collection data model and linearisation.
//!
//! - [`model`] is the serde-backed tree of item groups and items.
//! - [`flatten`] resolves the tree into the ordered list of runnable items
//!   with inherited auth and events.

pub mod flatten;
pub mod model;

pub use flatten::{FlatItem, find_position, flatten, resolve_auth};
pub use model::{
    Auth, Body, ClientCertificate, Collection, Event, FileBody, FormParam, FormParamKind, Header,
    Item, ItemGroup, ItemNode, Param, ProxyConfig, Request, Script,
};
