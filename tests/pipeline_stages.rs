// tests/pipeline_stages.rs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use runwright::collection::{
    Auth, Body, FileBody, FormParam, Item, ProxyConfig, Request,
};
use runwright::engine::{ConsoleSink, Cursor};
use runwright::errors::PipelineError;
use runwright::exec::{BoxFuture, SystemProxyResolver};
use runwright::fs::mock::MockFileResolver;
use runwright::pipeline::{
    AuthRegistry, CertificateEntry, CertificateList, Payload, Pipeline, ProxyList, ProxyRule,
    STAGE_ORDER, StageContext, UrlPatterns,
};
use runwright::types::Lifecycle;
use runwright::variables::{ScopeName, ScopeSet, Variable, VariableScope};
use runwright_test_utils::{RecordingObserver, StaticSecretResolver};
use tokio::sync::watch;

fn context(observer: &Arc<RecordingObserver>) -> StageContext {
    let (_tx, rx) = watch::channel(Lifecycle::Running);
    StageContext {
        auth: Arc::new(AuthRegistry::with_defaults()),
        files: None,
        secrets: None,
        system_proxy: None,
        proxies: None,
        certificates: Arc::new(CertificateList::default()),
        console: ConsoleSink::new(observer.clone(), rx, Cursor::new(1, 1)),
    }
}

fn scopes() -> ScopeSet {
    ScopeSet::new(
        VariableScope::from_pairs([("base", "https://api.example.com"), ("id", "42")]),
        VariableScope::from_pairs([("token", "env-token")]),
        VariableScope::new(),
    )
}

fn payload(request: Option<Request>, auth: Option<Auth>, scopes: ScopeSet) -> Payload {
    let item = Item {
        id: "item-1".to_string(),
        name: "item".to_string(),
        request,
        events: Vec::new(),
    };
    Payload::new(Arc::new(item), auth, scopes, Cursor::new(1, 1))
}

fn patterns(p: &[&str]) -> UrlPatterns {
    UrlPatterns::new(p).unwrap()
}

#[tokio::test]
async fn test_all_stages_run_in_order_and_substitute() {
    let observer = Arc::new(RecordingObserver::new());
    let ctx = context(&observer);
    let mut request = Request::new("GET", "{{base}}/users/{{id}}");
    request.headers.push(runwright::collection::Header::new("X-Id", "{{id}}"));
    request.body = Some(Body::Raw {
        raw: r#"{"id": "{{id}}", "unknown": "{{nope}}"}"#.to_string(),
    });
    let mut payload = payload(Some(request), None, scopes());

    let report = Pipeline::run(&mut payload, &ctx).await.unwrap();

    assert_eq!(report.completed, STAGE_ORDER.to_vec());
    assert!(report.warnings.is_empty());
    let resolved = payload.into_request().unwrap();
    assert_eq!(resolved.url, "https://api.example.com/users/42");
    assert_eq!(resolved.header("x-id"), Some("42"));
    assert_eq!(
        resolved.body,
        Some(Body::Raw {
            raw: r#"{"id": "42", "unknown": "{{nope}}"}"#.to_string()
        })
    );
}

#[tokio::test]
async fn test_missing_request_is_a_structural_failure() {
    let observer = Arc::new(RecordingObserver::new());
    let mut payload = payload(None, None, scopes());

    let err = Pipeline::run(&mut payload, &context(&observer))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PipelineError::MissingRequest {
            item: "item".to_string()
        }
    );
    assert!(payload.item.is_none());
}

#[tokio::test]
async fn test_inherited_bearer_auth_is_substituted_and_signed() {
    let observer = Arc::new(RecordingObserver::new());
    let auth = Auth::new("bearer").with_param("token", "{{token}}");
    let mut payload = payload(Some(Request::new("GET", "{{base}}/me")), Some(auth), scopes());

    Pipeline::run(&mut payload, &context(&observer)).await.unwrap();

    let request = payload.into_request().unwrap();
    assert_eq!(request.header("Authorization"), Some("Bearer env-token"));
}

#[tokio::test]
async fn test_apikey_in_query() {
    let observer = Arc::new(RecordingObserver::new());
    let auth = Auth::new("apikey")
        .with_param("key", "api_key")
        .with_param("value", "{{id}}")
        .with_param("in", "query");
    let mut payload = payload(Some(Request::new("GET", "{{base}}/x?a=1")), Some(auth), scopes());

    Pipeline::run(&mut payload, &context(&observer)).await.unwrap();

    assert_eq!(
        payload.into_request().unwrap().url,
        "https://api.example.com/x?a=1&api_key=42"
    );
}

#[tokio::test]
async fn test_unknown_auth_kind_warns_and_continues() {
    let observer = Arc::new(RecordingObserver::new());
    let mut payload = payload(
        Some(Request::new("GET", "{{base}}")),
        Some(Auth::new("hawk")),
        scopes(),
    );

    let report = Pipeline::run(&mut payload, &context(&observer)).await.unwrap();

    assert_eq!(report.completed.len(), STAGE_ORDER.len());
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("hawk"));
    assert_eq!(observer.console_messages(), report.warnings);
}

#[tokio::test]
async fn test_secrets_resolved_after_auth_signing() {
    let observer = Arc::new(RecordingObserver::new());
    let resolver = Arc::new(StaticSecretResolver::new().with("token", "s3cr3t"));
    let mut ctx = context(&observer);
    ctx.secrets = Some(resolver.clone());

    let mut environment = VariableScope::new();
    environment.insert(Variable::secret("token", "vault://token"));
    let scopes = ScopeSet::new(VariableScope::new(), environment, VariableScope::new());
    let auth = Auth::new("bearer").with_param("token", "{{token}}");
    let mut payload = payload(Some(Request::new("GET", "https://x.test/{{token}}")), Some(auth), scopes);

    let report = Pipeline::run(&mut payload, &ctx).await.unwrap();

    assert!(report.secret_errors.is_empty());
    let seen = resolver.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].scope, ScopeName::Environment);
    assert_eq!(seen[0].context["item"], "item-1");
    assert_eq!(seen[0].context["iteration"], 0);

    assert_eq!(payload.scopes.environment.get_string("token").as_deref(), Some("s3cr3t"));
    let request = payload.into_request().unwrap();
    assert_eq!(request.header("Authorization"), Some("Bearer s3cr3t"));
    assert_eq!(request.url, "https://x.test/s3cr3t");
}

#[tokio::test]
async fn test_secret_failures_are_collected_not_fatal() {
    let observer = Arc::new(RecordingObserver::new());
    let mut ctx = context(&observer);
    ctx.secrets = Some(Arc::new(StaticSecretResolver::new().with("known", "v")));

    let mut globals = VariableScope::new();
    globals.insert(Variable::secret("known", "ref-a"));
    globals.insert(Variable::secret("unknown", "ref-b"));
    let scopes = ScopeSet::new(VariableScope::new(), VariableScope::new(), globals);
    let mut payload = payload(Some(Request::new("GET", "https://x.test")), None, scopes);

    let report = Pipeline::run(&mut payload, &ctx).await.unwrap();

    assert_eq!(report.completed.len(), STAGE_ORDER.len());
    assert_eq!(report.secret_errors.len(), 1);
    assert_eq!(report.secret_errors[0].key, "unknown");
    assert_eq!(report.secret_errors[0].scope, ScopeName::Globals);
    assert_eq!(report.warnings.len(), 1);
}

#[tokio::test]
async fn test_secret_resolver_failure_marks_every_secret() {
    let observer = Arc::new(RecordingObserver::new());
    let mut ctx = context(&observer);
    ctx.secrets = Some(Arc::new(StaticSecretResolver::failing()));

    let mut environment = VariableScope::new();
    environment.insert(Variable::secret("a", "1"));
    environment.insert(Variable::secret("b", "2"));
    let scopes = ScopeSet::new(VariableScope::new(), environment, VariableScope::new());
    let mut payload = payload(Some(Request::new("GET", "https://x.test")), None, scopes);

    let report = Pipeline::run(&mut payload, &ctx).await.unwrap();
    assert_eq!(report.secret_errors.len(), 2);
    assert!(report.secret_errors[0].error.contains("vault unavailable"));
}

#[tokio::test]
async fn test_form_data_drops_unloadable_files() {
    let observer = Arc::new(RecordingObserver::new());
    let files = Arc::new(MockFileResolver::new());
    files.add_file("upload.txt", b"hello".to_vec());
    files.add_dir("folder");
    let mut ctx = context(&observer);
    ctx.files = Some(files.clone());

    let mut request = Request::new("POST", "https://x.test");
    request.body = Some(Body::FormData {
        formdata: vec![
            FormParam::text("name", "value"),
            FormParam::file("good", "upload.txt"),
            FormParam::file("missing", "nope.txt"),
            FormParam::file("dir", "folder"),
            FormParam::file("empty", "  "),
        ],
    });
    let mut payload = payload(Some(request), None, scopes());

    let report = Pipeline::run(&mut payload, &ctx).await.unwrap();

    let Some(Body::FormData { formdata }) = payload.into_request().unwrap().body else {
        panic!("form data body expected");
    };
    let keys: Vec<_> = formdata.iter().map(|p| p.key.as_str()).collect();
    assert_eq!(keys, vec!["name", "good"]);
    assert_eq!(formdata[1].content.as_deref(), Some(&b"hello"[..]));
    assert_eq!(report.warnings.len(), 3);
    assert!(report.warnings.iter().any(|w| w.contains("not a regular file")));
}

#[tokio::test]
async fn test_file_body_without_resolver_is_dropped() {
    let observer = Arc::new(RecordingObserver::new());
    let mut request = Request::new("PUT", "https://x.test");
    request.body = Some(Body::File {
        file: FileBody {
            src: Some("payload.bin".to_string()),
            content: None,
        },
    });
    let mut payload = payload(Some(request), None, scopes());

    let report = Pipeline::run(&mut payload, &context(&observer)).await.unwrap();

    assert!(payload.into_request().unwrap().body.is_none());
    assert!(report.warnings[0].contains("no file resolver"));
}

#[tokio::test]
async fn test_file_body_read_through_plain_read() {
    let observer = Arc::new(RecordingObserver::new());
    let files = Arc::new(MockFileResolver::read_only());
    files.add_file("payload.bin", vec![1, 2, 3]);
    let mut ctx = context(&observer);
    ctx.files = Some(files.clone());

    let mut request = Request::new("PUT", "https://x.test");
    request.body = Some(Body::File {
        file: FileBody {
            src: Some("payload.bin".to_string()),
            content: None,
        },
    });
    let mut payload = payload(Some(request), None, scopes());

    Pipeline::run(&mut payload, &ctx).await.unwrap();

    let Some(Body::File { file }) = payload.into_request().unwrap().body else {
        panic!("file body expected");
    };
    assert_eq!(file.content, Some(vec![1, 2, 3]));
    assert_eq!(files.reads(), vec![PathBuf::from("payload.bin")]);
}

fn proxy(host: &str) -> ProxyConfig {
    ProxyConfig {
        host: host.to_string(),
        port: 3128,
        tunnel: false,
    }
}

#[tokio::test]
async fn test_static_proxy_list_match_and_bypass() {
    let observer = Arc::new(RecordingObserver::new());
    let rules = ProxyList::new(vec![
        ProxyRule::new(patterns(&["https://*.example.com/*"]), proxy("corp"), &["internal.example.com"])
            .unwrap(),
        ProxyRule::new(patterns(&["<all_urls>"]), proxy("off"), &[] as &[&str])
            .unwrap()
            .disabled(true),
    ]);
    let mut ctx = context(&observer);
    ctx.proxies = Some(Arc::new(rules));

    for (url, expected) in [
        ("https://api.example.com/v1", Some("corp")),
        ("https://internal.example.com/v1", None),
        ("https://other.test/v1", None),
    ] {
        let mut payload = payload(Some(Request::new("GET", url)), None, ScopeSet::default());
        Pipeline::run(&mut payload, &ctx).await.unwrap();
        let request = payload.into_request().unwrap();
        assert_eq!(request.proxy.map(|p| p.host).as_deref(), expected, "{url}");
    }
}

#[tokio::test]
async fn test_explicit_request_proxy_is_kept() {
    let observer = Arc::new(RecordingObserver::new());
    let mut ctx = context(&observer);
    ctx.proxies = Some(Arc::new(ProxyList::new(vec![
        ProxyRule::new(patterns(&["<all_urls>"]), proxy("list"), &[] as &[&str]).unwrap(),
    ])));

    let mut request = Request::new("GET", "https://x.test");
    request.proxy = Some(proxy("mine"));
    let mut payload = payload(Some(request), None, ScopeSet::default());
    Pipeline::run(&mut payload, &ctx).await.unwrap();

    assert_eq!(payload.into_request().unwrap().proxy.unwrap().host, "mine");
}

struct SystemProxy(Option<&'static str>);

impl SystemProxyResolver for SystemProxy {
    fn system_proxy<'a>(
        &'a self,
        _url: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<ProxyConfig>>> {
        Box::pin(async move {
            match self.0 {
                Some(host) => Ok(Some(proxy(host))),
                None => Err(anyhow!("no system settings")),
            }
        })
    }
}

#[tokio::test]
async fn test_system_proxy_first_then_static_list() {
    let observer = Arc::new(RecordingObserver::new());
    let list = Arc::new(ProxyList::new(vec![
        ProxyRule::new(patterns(&["<all_urls>"]), proxy("list"), &[] as &[&str]).unwrap(),
    ]));

    let mut ctx = context(&observer);
    ctx.proxies = Some(list.clone());
    ctx.system_proxy = Some(Arc::new(SystemProxy(Some("system"))));
    let mut first = payload(Some(Request::new("GET", "https://x.test")), None, ScopeSet::default());
    Pipeline::run(&mut first, &ctx).await.unwrap();
    assert_eq!(first.into_request().unwrap().proxy.unwrap().host, "system");

    ctx.system_proxy = Some(Arc::new(SystemProxy(None)));
    let mut second = payload(Some(Request::new("GET", "https://x.test")), None, ScopeSet::default());
    let report = Pipeline::run(&mut second, &ctx).await.unwrap();
    assert_eq!(second.into_request().unwrap().proxy.unwrap().host, "list");
    assert_eq!(report.warnings.len(), 1);
}

fn certificates() -> CertificateList {
    CertificateList::new(vec![CertificateEntry {
        patterns: patterns(&["https://secure.test"]),
        key: Some(PathBuf::from("client.key")),
        cert: Some(PathBuf::from("client.crt")),
        passphrase: Some("pw".to_string()),
    }])
}

#[tokio::test]
async fn test_certificate_attached_for_matching_url() {
    let observer = Arc::new(RecordingObserver::new());
    let files = Arc::new(MockFileResolver::new());
    files.add_file("client.key", b"KEY".to_vec());
    files.add_unreadable("client.crt");
    let mut ctx = context(&observer);
    ctx.files = Some(files);
    ctx.certificates = Arc::new(certificates());

    let mut matching = payload(Some(Request::new("GET", "https://secure.test/a")), None, ScopeSet::default());
    let report = Pipeline::run(&mut matching, &ctx).await.unwrap();
    let certificate = matching.into_request().unwrap().certificate.unwrap();
    assert_eq!(certificate.key.as_deref(), Some(&b"KEY"[..]));
    assert!(certificate.cert.is_none());
    assert_eq!(certificate.passphrase.as_deref(), Some("pw"));
    assert_eq!(report.warnings.len(), 1);

    let mut other = payload(Some(Request::new("GET", "https://plain.test/a")), None, ScopeSet::default());
    Pipeline::run(&mut other, &ctx).await.unwrap();
    assert!(other.into_request().unwrap().certificate.is_none());
}

#[tokio::test]
async fn test_certificate_without_file_resolver_warns() {
    let observer = Arc::new(RecordingObserver::new());
    let mut ctx = context(&observer);
    ctx.certificates = Arc::new(certificates());

    let mut payload = payload(Some(Request::new("GET", "https://secure.test/a")), None, ScopeSet::default());
    let report = Pipeline::run(&mut payload, &ctx).await.unwrap();

    assert!(payload.into_request().unwrap().certificate.is_none());
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(observer.count("console"), 1);
}

#[test]
fn test_url_patterns() {
    let p = patterns(&["http+https://localhost:8080/api/*", "https://*.example.com"]);
    assert!(p.matches("http://localhost:8080/api/users"));
    assert!(p.matches("https://LOCALHOST:8080/api/users?x=1"));
    assert!(!p.matches("ftp://localhost:8080/api/users"));
    assert!(p.matches("https://a.example.com/deep/path"));
    assert!(!p.matches("https://example.org/"));
    assert!(!UrlPatterns::default().matches("https://a.example.com"));
    assert!(UrlPatterns::new(&["https://[bad"]).is_err());
}
