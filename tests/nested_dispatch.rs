// tests/nested_dispatch.rs

use std::sync::Arc;
use std::time::Duration;

use runwright::collection::Collection;
use runwright::engine::{
    ConsoleSink, Cursor, MAX_NESTING_DEPTH, NestedDispatcher, NestedRequest, Observer,
    ParentFrame, RunController, RunOptions, RunReport,
};
use runwright::errors::NestedError;
use runwright::exec::{RequestResolver, SkipFlag};
use runwright::types::Lifecycle;
use runwright::variables::{ScopeName, ScopeSet, VariableScope};
use runwright_test_utils::{
    BASE_URL, CollectionBuilder, Harness, ItemBuilder, RecordingObserver, StaticRequestResolver,
    init_tracing, url_for, with_timeout,
};
use serde_json::json;
use tokio::sync::watch;

async fn run_with(
    h: &Harness,
    resolver: Option<StaticRequestResolver>,
    collection: Collection,
) -> RunReport {
    let mut collaborators = h.collaborators();
    if let Some(resolver) = resolver {
        let resolver: Arc<dyn RequestResolver> = Arc::new(resolver);
        collaborators = collaborators.with_request_resolver(resolver);
    }
    let observer: Arc<dyn Observer> = h.observer.clone();
    let controller = RunController::new(collection, RunOptions::default(), collaborators);
    with_timeout(controller.run(observer)).await
}

fn child_login() -> Collection {
    CollectionBuilder::new("child")
        .item(
            ItemBuilder::new("login")
                .url(&format!("{BASE_URL}/login?q={{{{q}}}}&who={{{{who}}}}"))
                .prerequest("log hello from child\nset collection token fromchild"),
        )
        .build()
}

#[tokio::test]
async fn test_nested_run_returns_response_and_mutations() {
    init_tracing();
    let h = Harness::new();
    let resolver = StaticRequestResolver::new().with("req-login", &child_login());
    let parent = CollectionBuilder::new("parent")
        .item(
            ItemBuilder::new("a")
                .test("set environment who parent\nrun req-login q=7\nrecord token"),
        )
        .build();

    let report = run_with(&h, Some(resolver), parent).await;

    assert!(report.is_success());
    assert_eq!(
        h.requester.sent_urls(),
        vec![url_for("a"), format!("{BASE_URL}/login?q=7&who=parent")]
    );
    assert_eq!(h.host.recorded_values("token"), vec![Some("fromchild".to_string())]);
    assert_eq!(
        report.scopes.collection_variables.get_string("token").as_deref(),
        Some("fromchild")
    );
    // The override only lived in the child's local scope.
    assert!(report.scopes.local.get("q").is_none());

    let calls = h.host.nested_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].request_id, "req-login");
    assert_eq!(calls[0].caller_depth, 0);
    assert_eq!(calls[0].response_code, Some(200));
    assert!(!calls[0].rejected);
    assert!(calls[0].error.is_none());

    // Child triggers stay out of the parent's observer, console output
    // is forwarded.
    assert_eq!(h.observer.count("item"), 1);
    assert_eq!(h.observer.count("request"), 1);
    assert_eq!(h.observer.console_messages(), vec!["hello from child"]);

    assert_eq!(h.host.dispose_calls(), 1);
    assert_eq!(h.host.clear_timers_calls(), 1);
}

#[tokio::test]
async fn test_nesting_depth_is_limited() {
    let h = Harness::new();
    let looping = CollectionBuilder::new("loop")
        .item(ItemBuilder::new("again").test("run req-loop"))
        .build();
    let resolver = StaticRequestResolver::new().with("req-loop", &looping);
    let parent = CollectionBuilder::new("parent")
        .item(ItemBuilder::new("a").test("run req-loop"))
        .build();

    let report = run_with(&h, Some(resolver), parent).await;

    assert!(report.is_success());
    let mut calls = h.host.nested_calls();
    calls.sort_by_key(|c| c.caller_depth);
    assert_eq!(calls.len(), MAX_NESTING_DEPTH + 1);
    let rejected: Vec<_> = calls.iter().filter(|c| c.rejected).collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].caller_depth, MAX_NESTING_DEPTH);
    let expected = NestedError::DepthExceeded {
        max: MAX_NESTING_DEPTH,
    }
    .to_string();
    assert_eq!(rejected[0].error.as_deref(), Some(expected.as_str()));
    assert_eq!(
        expected,
        "Exceeded max depth of 5 for nested request execution"
    );
    assert_eq!(h.observer.console_messages(), vec![expected]);
    assert_eq!(h.requester.sent().len(), MAX_NESTING_DEPTH + 1);
}

#[tokio::test]
async fn test_resolution_failures_go_back_to_script() {
    let empty = CollectionBuilder::new("empty").build();
    let cases: Vec<(Option<StaticRequestResolver>, &str, &str)> = vec![
        (None, "x", "no request resolver configured"),
        (Some(StaticRequestResolver::new()), "x", "no such request"),
        (
            Some(StaticRequestResolver::new().with_raw("x", json!({}))),
            "x",
            "resolver returned nothing",
        ),
        (
            Some(StaticRequestResolver::new().with_raw("x", json!(null))),
            "x",
            "resolver returned nothing",
        ),
        (
            Some(StaticRequestResolver::new().with("x", &empty)),
            "x",
            "collection contains no request",
        ),
        (
            Some(StaticRequestResolver::new().with_raw("x", json!({"item": 5}))),
            "x",
            "did not resolve to a runnable collection",
        ),
    ];

    for (resolver, id, expected) in cases {
        let h = Harness::new();
        let parent = CollectionBuilder::new("parent")
            .item(ItemBuilder::new("a").test(&format!("run {id}\nrecord done")))
            .build();

        let report = run_with(&h, resolver, parent).await;

        assert!(report.is_success(), "{expected}");
        let calls = h.host.nested_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].rejected);
        let error = calls[0].error.clone().unwrap_or_default();
        assert!(error.contains(expected), "{error} should mention {expected}");
        // The script carried on after the failure.
        assert_eq!(h.host.recorded().len(), 1);
        assert_eq!(h.requester.sent_urls(), vec![url_for("a")]);
    }
}

#[tokio::test]
async fn test_child_failure_does_not_fail_parent() {
    let h = Harness::new();
    let failing = CollectionBuilder::new("child")
        .item(ItemBuilder::new("boom").test("throw child-boom"))
        .request("never")
        .build();
    let resolver = StaticRequestResolver::new().with("req", &failing);
    let parent = CollectionBuilder::new("parent")
        .item(ItemBuilder::new("a").test("run req"))
        .build();

    let report = run_with(&h, Some(resolver), parent).await;

    assert!(report.is_success());
    assert_eq!(h.observer.of("item")[0].error, None);
    let call = &h.host.nested_calls()[0];
    assert!(!call.rejected);
    assert_eq!(call.exception.as_deref(), Some("Error: child-boom"));
    assert_eq!(call.error.as_deref(), Some("Error: child-boom"));
    // The child stops at its first error.
    assert_eq!(
        h.requester.sent_urls(),
        vec![url_for("a"), url_for("boom")]
    );
}

fn frame(observer: &Arc<RecordingObserver>, persisted: ScopeSet) -> ParentFrame {
    let (_tx, rx) = watch::channel(Lifecycle::Running);
    let observer: Arc<dyn Observer> = observer.clone();
    let cursor = Cursor::new(1, 1);
    ParentFrame {
        cursor: cursor.clone(),
        persisted,
        skip: SkipFlag::default(),
        console: ConsoleSink::new(observer, rx, cursor),
    }
}

#[tokio::test]
async fn test_dispatch_layers_in_flight_and_overrides() {
    let h = Harness::new();
    let resolver: Arc<dyn RequestResolver> =
        Arc::new(StaticRequestResolver::new().with("req-login", &child_login()));
    let collaborators = h.collaborators().with_request_resolver(resolver);
    let dispatcher = NestedDispatcher::new(&RunOptions::default(), &collaborators);

    let persisted = ScopeSet::new(
        VariableScope::new(),
        VariableScope::from_pairs([("who", "persisted")]),
        VariableScope::new(),
    );
    let mut in_flight = persisted.clone();
    in_flight
        .scope_mut(ScopeName::Environment)
        .set("who", "in-flight");
    let request = NestedRequest::new("req-login")
        .with_overrides(VariableScope::from_pairs([("q", "1")]))
        .with_in_flight(in_flight);

    let outcome = dispatcher
        .dispatch(&frame(&h.observer, persisted), request)
        .await
        .unwrap();

    assert_eq!(
        h.requester.sent_urls(),
        vec![format!("{BASE_URL}/login?q=1&who=in-flight")]
    );
    assert_eq!(outcome.response.map(|r| r.code), Some(200));
    assert!(outcome.error.is_none());
    let token = outcome.mutations.get(ScopeName::CollectionVariables);
    assert_eq!(token.len(), 1);
    assert!(dispatcher.active().is_empty());
    assert_eq!(dispatcher.depth(), 0);
    // Borrowed by the child; never disposed from here.
    assert_eq!(h.host.dispose_calls(), 0);
}

#[tokio::test]
async fn test_dispatch_carries_in_flight_unset_to_child() {
    let h = Harness::new();
    let resolver: Arc<dyn RequestResolver> =
        Arc::new(StaticRequestResolver::new().with("req-login", &child_login()));
    let collaborators = h.collaborators().with_request_resolver(resolver);
    let dispatcher = NestedDispatcher::new(&RunOptions::default(), &collaborators);

    let persisted = ScopeSet::new(
        VariableScope::from_pairs([("kept", "yes")]),
        VariableScope::from_pairs([("who", "persisted")]),
        VariableScope::new(),
    );
    let mut in_flight = persisted.clone();
    in_flight.scope_mut(ScopeName::Environment).unset("who");
    let request = NestedRequest::new("req-login").with_in_flight(in_flight);

    dispatcher
        .dispatch(&frame(&h.observer, persisted), request)
        .await
        .unwrap();

    assert_eq!(
        h.requester.sent_urls(),
        vec![format!("{BASE_URL}/login?q={{{{q}}}}&who={{{{who}}}}")]
    );
}

#[tokio::test]
async fn test_cancelled_dispatch_leaves_no_active_record() {
    let h = Harness::new();
    let hanging = CollectionBuilder::new("child")
        .item(ItemBuilder::new("stuck").prerequest("hang"))
        .build();
    let resolver: Arc<dyn RequestResolver> =
        Arc::new(StaticRequestResolver::new().with("req-stuck", &hanging));
    let collaborators = h.collaborators().with_request_resolver(resolver);
    let dispatcher = NestedDispatcher::new(&RunOptions::default(), &collaborators);
    let parent = frame(&h.observer, ScopeSet::default());

    let mut dispatch = Box::pin(dispatcher.dispatch(&parent, NestedRequest::new("req-stuck")));
    tokio::select! {
        _ = &mut dispatch => panic!("hanging child run finished"),
        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
    }
    let active = dispatcher.active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].request_id, "req-stuck");
    assert_eq!(active[0].nesting_depth, 1);

    drop(dispatch);
    assert!(dispatcher.active().is_empty());
    assert!(h.requester.sent().is_empty());
}

#[tokio::test]
async fn test_dispatch_discards_response_once_parent_moved_on() {
    let h = Harness::new();
    let resolver: Arc<dyn RequestResolver> =
        Arc::new(StaticRequestResolver::new().with("req-login", &child_login()));
    let collaborators = h.collaborators().with_request_resolver(resolver);
    let dispatcher = NestedDispatcher::new(&RunOptions::default(), &collaborators);

    let parent = frame(&h.observer, ScopeSet::default());
    parent.skip.mark();
    let outcome = dispatcher
        .dispatch(&parent, NestedRequest::new("req-login"))
        .await
        .unwrap();

    assert!(outcome.response.is_none());
    assert!(outcome.exception.is_none());
    // Mutations still come back; they were already made.
    assert!(!outcome.mutations.is_empty());
}

#[tokio::test]
async fn test_dispatch_from_deepest_run_is_rejected_before_resolving() {
    let h = Harness::new();
    let resolver = Arc::new(StaticRequestResolver::new().with("req-login", &child_login()));
    let dyn_resolver: Arc<dyn RequestResolver> = resolver.clone();
    let collaborators = h.collaborators().with_request_resolver(dyn_resolver);
    let options = RunOptions {
        nesting_depth: MAX_NESTING_DEPTH,
        ..RunOptions::default()
    };
    let dispatcher = NestedDispatcher::new(&options, &collaborators);

    let err = dispatcher
        .dispatch(&frame(&h.observer, ScopeSet::default()), NestedRequest::new("req-login"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        NestedError::DepthExceeded {
            max: MAX_NESTING_DEPTH
        }
    );
    assert!(resolver.calls().is_empty());
    assert!(h.requester.sent().is_empty());
}

fn assert_send<T: Send>(_: &T) {}

#[tokio::test]
async fn test_run_and_dispatch_futures_are_send() {
    let h = Harness::new();
    let resolver: Arc<dyn RequestResolver> =
        Arc::new(StaticRequestResolver::new().with("req-login", &child_login()));
    let collaborators = h.collaborators().with_request_resolver(resolver);
    let dispatcher = NestedDispatcher::new(&RunOptions::default(), &collaborators);
    let parent = frame(&h.observer, ScopeSet::default());

    let dispatch = dispatcher.dispatch(&parent, NestedRequest::new("req-login"));
    assert_send(&dispatch);
    assert!(dispatch.await.is_ok());

    let observer: Arc<dyn Observer> = h.observer.clone();
    let run = RunController::new(child_login(), RunOptions::default(), h.collaborators())
        .run(observer);
    assert_send(&run);
    assert!(run.await.is_success());
}
