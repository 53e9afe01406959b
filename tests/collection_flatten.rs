// tests/collection_flatten.rs

use runwright::collection::{Auth, Collection, flatten, find_position};
use runwright::types::Listen;
use runwright_test_utils::{CollectionBuilder, GroupBuilder, ItemBuilder};

fn script_ids(scripts: &[runwright::collection::Script]) -> Vec<String> {
    scripts.iter().map(|s| s.id.clone()).collect()
}

#[test]
fn test_flatten_is_depth_first() {
    let collection = CollectionBuilder::new("c")
        .request("a")
        .group(
            GroupBuilder::new("g1")
                .request("b")
                .group(GroupBuilder::new("g2").request("c")),
        )
        .request("d")
        .build();

    let items = flatten(&collection);
    let names: Vec<_> = items.iter().map(|f| f.item.name.clone()).collect();
    assert_eq!(names, vec!["a", "b", "c", "d"]);
    assert_eq!(items[2].path, vec!["g1".to_string(), "g2".to_string()]);
    assert!(items[0].path.is_empty());
}

#[test]
fn test_events_run_root_to_leaf() {
    let collection = CollectionBuilder::new("root")
        .prerequest("log root")
        .test("log root-test")
        .group(
            GroupBuilder::new("folder")
                .prerequest("log folder")
                .item(ItemBuilder::new("leaf").prerequest("log leaf")),
        )
        .build();

    let items = flatten(&collection);
    let leaf = &items[0];
    assert_eq!(
        script_ids(leaf.scripts(Listen::Prerequest)),
        vec!["root:prerequest:0", "folder:prerequest:0", "leaf:prerequest:0"]
    );
    assert_eq!(script_ids(leaf.scripts(Listen::Test)), vec!["root:test:1"]);
}

#[test]
fn test_request_auth_beats_group_and_collection() {
    let collection = CollectionBuilder::new("c")
        .auth(Auth::new("bearer").with_param("token", "root"))
        .group(
            GroupBuilder::new("g")
                .auth(Auth::new("apikey").with_param("key", "k"))
                .request("group-auth")
                .item(ItemBuilder::new("own").auth(Auth::new("bearer").with_param("token", "own"))),
        )
        .request("root-auth")
        .build();

    let items = flatten(&collection);
    assert_eq!(items[0].auth.as_ref().map(|a| a.kind.as_str()), Some("apikey"));
    assert_eq!(
        items[1].auth.as_ref().and_then(|a| a.param("token")),
        Some("own")
    );
    assert_eq!(
        items[2].auth.as_ref().and_then(|a| a.param("token")),
        Some("root")
    );
}

#[test]
fn test_inherit_keeps_parent_auth_and_noauth_stops_it() {
    let collection = CollectionBuilder::new("c")
        .auth(Auth::new("bearer").with_param("token", "t"))
        .item(ItemBuilder::new("inherits").auth(Auth::new("inherit")))
        .group(GroupBuilder::new("open").auth(Auth::new("noauth")).request("anon"))
        .build();

    let items = flatten(&collection);
    assert_eq!(items[0].auth.as_ref().map(|a| a.kind.as_str()), Some("bearer"));
    assert!(items[1].auth.is_none());
}

#[test]
fn test_find_position_prefers_id_over_name() {
    let collection = CollectionBuilder::new("c")
        .item(ItemBuilder::new("x").id("y"))
        .item(ItemBuilder::new("y").id("z"))
        .build();
    let items = flatten(&collection);

    assert_eq!(find_position(&items, "y"), Some(0));
    assert_eq!(find_position(&items, "x"), Some(0));
    assert_eq!(find_position(&items, "z"), Some(1));
    assert_eq!(find_position(&items, "nope"), None);
}

#[test]
fn test_collection_json_nodes_with_items_are_groups() {
    let raw = r#"{
        "name": "api",
        "item": [
            { "name": "folder", "item": [ { "name": "inner", "request": { "url": "{{base}}/x" } } ] },
            { "name": "top", "request": { "method": "POST", "url": "{{base}}/y" } }
        ]
    }"#;
    let collection: Collection = serde_json::from_str(raw).unwrap();
    let items = flatten(&collection);

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].path, vec!["folder".to_string()]);
    let top = items[1].item.request.as_ref().unwrap();
    assert_eq!(top.method, "POST");
    assert_eq!(top.url, "{{base}}/y");
}
