// tests/config_loader.rs

use std::io::Write;
use std::time::Duration;

use runwright::config::{
    load_and_validate, load_collection, load_data_file, load_or_default, load_variables_file,
};
use runwright::errors::RunError;
use runwright::exec::ProxyResolver;
use serde_json::json;
use tempfile::NamedTempFile;

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

fn expect_config_error(contents: &str) -> String {
    let file = write_temp(contents);
    match load_and_validate(file.path()) {
        Err(RunError::ConfigError(msg)) => msg,
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_full_config_converts_to_run_options() {
    let file = write_temp(
        r#"
[run]
iteration_count = 3
stop_on_error = true
verbose = true

[run.timeout]
script = "5s"
global = "2m"
request = "750ms"

[run.parallel]
partitions = 4

[[proxy]]
match = ["https://*.example.com/*"]
host = " proxy.local "
port = 3128
bypass = ["internal.example.com"]

[[certificate]]
match = ["https://secure.example.com/*"]
key = "certs/client.key"
cert = "certs/client.crt"
passphrase = "pw"
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    let options = cfg.run_options().unwrap();

    assert_eq!(options.iteration_count, 3);
    assert!(options.stop_on_error);
    assert!(!options.abort_on_error);
    assert!(options.verbose);
    assert_eq!(options.timeout.script, Some(Duration::from_secs(5)));
    assert_eq!(options.timeout.global, Some(Duration::from_secs(120)));
    assert_eq!(options.timeout.request, Some(Duration::from_millis(750)));
    assert_eq!(options.partitions(), Some(4));
    assert_eq!(options.nesting_depth, 0);
    assert!(options.data.is_empty());

    let proxy = options.proxies.resolve("https://api.example.com/v1").unwrap();
    assert_eq!(proxy.host, "proxy.local");
    assert_eq!(proxy.port, 3128);
    assert!(options.proxies.resolve("https://internal.example.com/v1").is_none());

    let cert = options
        .certificates
        .find("https://secure.example.com/login")
        .unwrap();
    assert_eq!(cert.passphrase.as_deref(), Some("pw"));
    assert!(options.certificates.find("https://other.example.com/").is_none());
}

#[test]
fn test_empty_config_uses_defaults() {
    let file = write_temp("");
    let options = load_and_validate(file.path()).unwrap().run_options().unwrap();

    assert_eq!(options.iteration_count, 1);
    assert_eq!(options.partitions(), None);
    assert_eq!(options.timeout.script, None);
    assert!(options.proxies.is_empty());
    assert!(options.certificates.is_empty());
}

#[test]
fn test_proxy_without_match_applies_everywhere() {
    let file = write_temp(
        r#"
[[proxy]]
host = "proxy.local"
port = 8080
tunnel = true
"#,
    );
    let proxies = load_and_validate(file.path()).unwrap().proxy_list().unwrap();

    let proxy = proxies.resolve("http://anything.test/x").unwrap();
    assert!(proxy.tunnel);
}

#[test]
fn test_disabled_proxy_never_applies() {
    let file = write_temp(
        r#"
[[proxy]]
host = "proxy.local"
port = 8080
disabled = true
"#,
    );
    let proxies = load_and_validate(file.path()).unwrap().proxy_list().unwrap();
    assert!(proxies.resolve("http://anything.test/x").is_none());
}

#[test]
fn test_missing_default_config_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Runwright.toml");

    let cfg = load_or_default(&path).unwrap();
    assert_eq!(cfg.run.iteration_count, 1);

    match load_and_validate(&path) {
        Err(RunError::IoError(_)) => {}
        other => panic!("Expected IoError, got: {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_zero_iterations_rejected() {
    let msg = expect_config_error("[run]\niteration_count = 0\n");
    assert_eq!(msg, "[run].iteration_count must be >= 1 (got 0)");
}

#[test]
fn test_zero_partitions_rejected() {
    let msg = expect_config_error("[run.parallel]\npartitions = 0\n");
    assert_eq!(msg, "[run.parallel].partitions must be >= 1 (got 0)");
}

#[test]
fn test_invalid_duration_rejected() {
    let msg = expect_config_error("[run.timeout]\nscript = \"soon\"\n");
    assert!(msg.starts_with("[run.timeout].script has invalid duration 'soon'"), "{msg}");
}

#[test]
fn test_invalid_proxy_entries_rejected() {
    let msg = expect_config_error("[[proxy]]\nhost = \"  \"\nport = 1\n");
    assert_eq!(msg, "[[proxy]] #0 has an empty host");

    let msg = expect_config_error("[[proxy]]\nhost = \"p\"\nport = 0\n");
    assert_eq!(msg, "[[proxy]] #0 port must be non-zero");

    let msg = expect_config_error("[[proxy]]\nmatch = []\nhost = \"p\"\nport = 1\n");
    assert_eq!(msg, "[[proxy]] #0 needs at least one `match` pattern");

    let msg = expect_config_error(
        "[[proxy]]\nhost = \"p\"\nport = 1\n\n[[proxy]]\nmatch = [\"https://[oops\"]\nhost = \"q\"\nport = 2\n",
    );
    assert!(msg.starts_with("[[proxy]] #1:"), "{msg}");
}

#[test]
fn test_certificate_needs_key_or_cert() {
    let msg = expect_config_error("[[certificate]]\nmatch = [\"<all_urls>\"]\n");
    assert_eq!(msg, "[[certificate]] #0 needs a `key` or a `cert`");
}

#[test]
fn test_unknown_fields_are_rejected() {
    let file = write_temp("[run]\niterations = 3\n");
    match load_and_validate(file.path()) {
        Err(RunError::TomlError(e)) => assert!(e.to_string().contains("iterations")),
        Err(e) => panic!("Expected TomlError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_load_variables_file_accepts_export_and_list() {
    let export = write_temp(
        &json!({
            "name": "staging",
            "values": [
                { "key": "base", "value": "https://staging.test" },
                { "key": "token", "value": "vault://t", "type": "secret" },
                { "key": "old", "value": "x", "disabled": true }
            ]
        })
        .to_string(),
    );
    let scope = load_variables_file(export.path()).unwrap();
    assert_eq!(scope.len(), 3);
    assert_eq!(scope.get_string("base").as_deref(), Some("https://staging.test"));
    assert!(scope.variable("token").unwrap().is_secret());
    assert!(scope.variable("old").unwrap().disabled);

    let list = write_temp(&json!([{ "key": "a", "value": 1, "type": "string" }]).to_string());
    let scope = load_variables_file(list.path()).unwrap();
    assert_eq!(scope.get("a"), Some(&json!(1)));
    assert!(!scope.variable("a").unwrap().is_secret());
}

#[test]
fn test_load_data_file_rows() {
    let file = write_temp(&json!([{ "user": "u1", "n": 1 }, { "user": "u2" }]).to_string());
    let rows = load_data_file(file.path()).unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("n"), Some(&json!(1)));
    assert_eq!(rows[1].get_string("user").as_deref(), Some("u2"));
}

#[test]
fn test_load_data_file_rejects_non_object_rows() {
    let file = write_temp(&json!([{ "user": "u1" }, 5]).to_string());
    match load_data_file(file.path()) {
        Err(RunError::ConfigError(msg)) => {
            assert!(msg.contains("row 1 must be an object, got 5"), "{msg}");
        }
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_load_collection_json() {
    let file = write_temp(
        &json!({
            "id": "c1",
            "name": "demo",
            "variable": [{ "key": "base", "value": "https://api.test" }],
            "item": [
                { "name": "folder", "item": [
                    { "name": "get", "request": { "url": "{{base}}/x" } }
                ]},
                { "name": "post", "request": { "method": "POST", "url": "{{base}}/y" } }
            ]
        })
        .to_string(),
    );

    let collection = load_collection(file.path()).unwrap();
    assert_eq!(collection.name, "demo");
    assert_eq!(collection.items.len(), 2);
    assert_eq!(collection.variables.get_string("base").as_deref(), Some("https://api.test"));

    let bad = write_temp("{ not json");
    assert!(matches!(load_collection(bad.path()), Err(RunError::JsonError(_))));
}
