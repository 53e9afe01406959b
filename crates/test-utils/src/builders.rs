#![allow(dead_code)]

use runwright::collection::{
    Auth, Body, Collection, Event, Header, Item, ItemGroup, ItemNode, Request, Script,
};
use runwright::types::Listen;
use runwright::variables::Variable;

/// Base URL used by builder-made requests.
pub const BASE_URL: &str = "http://api.test";

/// URL an [`ItemBuilder`] gives the item called `name` by default.
pub fn url_for(name: &str) -> String {
    format!("{BASE_URL}/{name}")
}

fn event(listen: Listen, owner: &str, n: usize, source: &str) -> Event {
    let kind = match listen {
        Listen::Prerequest => "prerequest",
        Listen::Test => "test",
    };
    Event::new(listen, Script::new(format!("{owner}:{kind}:{n}"), source))
}

/// Builder for `Collection` to simplify test setup.
pub struct CollectionBuilder {
    collection: Collection,
}

impl CollectionBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            collection: Collection {
                id: name.to_string(),
                name: name.to_string(),
                ..Collection::default()
            },
        }
    }

    pub fn variable(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.collection.variables.set(key, value);
        self
    }

    pub fn secret(mut self, key: &str, value: &str) -> Self {
        self.collection.variables.insert(Variable::secret(key, value));
        self
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.collection.auth = Some(auth);
        self
    }

    pub fn prerequest(mut self, source: &str) -> Self {
        let n = self.collection.events.len();
        let name = self.collection.name.clone();
        self.collection
            .events
            .push(event(Listen::Prerequest, &name, n, source));
        self
    }

    pub fn test(mut self, source: &str) -> Self {
        let n = self.collection.events.len();
        let name = self.collection.name.clone();
        self.collection.events.push(event(Listen::Test, &name, n, source));
        self
    }

    pub fn item(mut self, item: ItemBuilder) -> Self {
        self.collection.items.push(ItemNode::Item(item.build()));
        self
    }

    /// Shorthand for `item(ItemBuilder::new(name))`.
    pub fn request(self, name: &str) -> Self {
        self.item(ItemBuilder::new(name))
    }

    pub fn group(mut self, group: GroupBuilder) -> Self {
        self.collection.items.push(ItemNode::Group(group.build()));
        self
    }

    pub fn build(self) -> Collection {
        self.collection
    }
}

/// Builder for `Item`. Every item gets `GET {BASE_URL}/{name}` unless told
/// otherwise.
pub struct ItemBuilder {
    item: Item,
}

impl ItemBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            item: Item {
                id: format!("id-{name}"),
                name: name.to_string(),
                request: Some(Request::new("GET", url_for(name))),
                events: Vec::new(),
            },
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.item.id = id.to_string();
        self
    }

    pub fn method(mut self, method: &str) -> Self {
        self.request_mut().method = method.to_string();
        self
    }

    pub fn url(mut self, url: &str) -> Self {
        self.request_mut().url = url.to_string();
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.request_mut().headers.push(Header::new(key, value));
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.request_mut().body = Some(body);
        self
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.request_mut().auth = Some(auth);
        self
    }

    pub fn no_request(mut self) -> Self {
        self.item.request = None;
        self
    }

    pub fn prerequest(mut self, source: &str) -> Self {
        let n = self.item.events.len();
        let ev = event(Listen::Prerequest, &self.item.name, n, source);
        self.item.events.push(ev);
        self
    }

    pub fn test(mut self, source: &str) -> Self {
        let n = self.item.events.len();
        let ev = event(Listen::Test, &self.item.name, n, source);
        self.item.events.push(ev);
        self
    }

    fn request_mut(&mut self) -> &mut Request {
        self.item.request.get_or_insert_with(Request::default)
    }

    pub fn build(self) -> Item {
        self.item
    }
}

/// Builder for `ItemGroup` (a folder).
pub struct GroupBuilder {
    group: ItemGroup,
}

impl GroupBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            group: ItemGroup {
                id: format!("group-{name}"),
                name: name.to_string(),
                ..ItemGroup::default()
            },
        }
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.group.auth = Some(auth);
        self
    }

    pub fn prerequest(mut self, source: &str) -> Self {
        let n = self.group.events.len();
        let ev = event(Listen::Prerequest, &self.group.name, n, source);
        self.group.events.push(ev);
        self
    }

    pub fn test(mut self, source: &str) -> Self {
        let n = self.group.events.len();
        let ev = event(Listen::Test, &self.group.name, n, source);
        self.group.events.push(ev);
        self
    }

    pub fn item(mut self, item: ItemBuilder) -> Self {
        self.group.items.push(ItemNode::Item(item.build()));
        self
    }

    pub fn request(self, name: &str) -> Self {
        self.item(ItemBuilder::new(name))
    }

    pub fn group(mut self, group: GroupBuilder) -> Self {
        self.group.items.push(ItemNode::Group(group.build()));
        self
    }

    pub fn build(self) -> ItemGroup {
        self.group
    }
}
