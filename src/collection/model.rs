// src/collection/model.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Listen;
use crate::variables::VariableScope;

/// A collection as read from JSON.
///
/// ```json
/// {
///   "id": "c1",
///   "name": "demo",
///   "auth": { "type": "bearer", "params": { "token": "{{token}}" } },
///   "event": [{ "listen": "prerequest", "script": { "exec": ["..."] } }],
///   "variable": [{ "key": "base", "value": "https://api.example.com" }],
///   "item": [
///     { "name": "folder", "item": [ { "name": "get", "request": { "url": "{{base}}/x" } } ] }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Collection {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "item")]
    pub items: Vec<ItemNode>,

    #[serde(default)]
    pub auth: Option<Auth>,

    #[serde(default, rename = "event")]
    pub events: Vec<Event>,

    #[serde(default, rename = "variable")]
    pub variables: VariableScope,
}

/// A node of the item tree. Anything carrying an `item` array is a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemNode {
    Group(ItemGroup),
    Item(Item),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemGroup {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "item")]
    pub items: Vec<ItemNode>,

    #[serde(default)]
    pub auth: Option<Auth>,

    #[serde(default, rename = "event")]
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub request: Option<Request>,

    #[serde(default, rename = "event")]
    pub events: Vec<Event>,
}

impl Item {
    /// Display label: name, falling back to id.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub url: String,

    #[serde(default, rename = "header")]
    pub headers: Vec<Header>,

    #[serde(default)]
    pub body: Option<Body>,

    #[serde(default)]
    pub auth: Option<Auth>,

    /// Explicit per-request proxy; when absent the proxy stage decides.
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,

    /// Filled by the certificate stage.
    #[serde(skip)]
    pub certificate: Option<ClientCertificate>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: default_method(),
            url: String::new(),
            headers: Vec::new(),
            body: None,
            auth: None,
            proxy: None,
            certificate: None,
        }
    }
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    /// Case-insensitive lookup of an enabled header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| !h.disabled && h.key.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Replace (case-insensitively) or append a header.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|h| h.key.eq_ignore_ascii_case(name))
        {
            Some(h) => {
                h.value = value;
                h.disabled = false;
            }
            None => self.headers.push(Header::new(name, value)),
        }
    }

    pub fn add_query_param(&mut self, key: &str, value: &str) {
        let (base, fragment) = match self.url.split_once('#') {
            Some((b, f)) => (b.to_string(), Some(f.to_string())),
            None => (self.url.clone(), None),
        };
        let sep = if base.contains('?') { '&' } else { '?' };
        let mut url = format!("{base}{sep}{key}={value}");
        if let Some(f) = fragment {
            url.push('#');
            url.push_str(&f);
        }
        self.url = url;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,

    #[serde(default)]
    pub value: String,

    #[serde(default)]
    pub disabled: bool,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            disabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum Body {
    #[serde(rename = "raw")]
    Raw { raw: String },

    #[serde(rename = "urlencoded")]
    UrlEncoded { urlencoded: Vec<Param> },

    #[serde(rename = "formdata")]
    FormData { formdata: Vec<FormParam> },

    #[serde(rename = "file")]
    File { file: FileBody },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub key: String,

    #[serde(default)]
    pub value: String,

    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormParamKind {
    #[default]
    Text,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormParam {
    pub key: String,

    #[serde(default, rename = "type")]
    pub kind: FormParamKind,

    #[serde(default)]
    pub value: String,

    /// Path of the file to upload (file params only).
    #[serde(default)]
    pub src: Option<String>,

    #[serde(default)]
    pub disabled: bool,

    /// File bytes, filled by the file stage.
    #[serde(skip)]
    pub content: Option<Vec<u8>>,
}

impl FormParam {
    pub fn text(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: FormParamKind::Text,
            value: value.into(),
            src: None,
            disabled: false,
            content: None,
        }
    }

    pub fn file(key: impl Into<String>, src: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: FormParamKind::File,
            value: String::new(),
            src: Some(src.into()),
            disabled: false,
            content: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileBody {
    #[serde(default)]
    pub src: Option<String>,

    #[serde(skip)]
    pub content: Option<Vec<u8>>,
}

/// Authorization definition. `type = "inherit"` defers to the parent,
/// `type = "noauth"` explicitly disables inherited auth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Auth {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl Auth {
    pub const INHERIT: &'static str = "inherit";
    pub const NOAUTH: &'static str = "noauth";

    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn is_inherit(&self) -> bool {
        self.kind == Self::INHERIT
    }

    pub fn is_noauth(&self) -> bool {
        self.kind == Self::NOAUTH
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub listen: Listen,
    pub script: Script,
}

impl Event {
    pub fn new(listen: Listen, script: Script) -> Self {
        Self { listen, script }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub id: String,

    /// Source lines.
    #[serde(default)]
    pub exec: Vec<String>,
}

impl Script {
    pub fn new(id: impl Into<String>, source: &str) -> Self {
        Self {
            id: id.into(),
            exec: source.lines().map(str::to_string).collect(),
        }
    }

    pub fn source(&self) -> String {
        self.exec.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,

    #[serde(default)]
    pub tunnel: bool,
}

/// Client certificate material attached to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCertificate {
    pub key: Option<Vec<u8>>,
    pub cert: Option<Vec<u8>>,
    pub passphrase: Option<String>,
}
