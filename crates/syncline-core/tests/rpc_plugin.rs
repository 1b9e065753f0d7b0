//! End-to-end tests for the out-of-process plugin host.
//!
//! Each test spawns a scripted guest (a small shell script) as the plugin
//! process, exercising the real spawn/handshake/dispense/call/close path
//! over actual pipes.

#![cfg(unix)]

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use syncline_core::event::{Event, Operation, PipelineEvent, PkField};
use syncline_core::plugin::rpc::{Handshake, RpcPluginConfig, RpcPluginHost};
use syncline_core::plugin::PluginError;
use syncline_core::processor::{Processor, ProcessorError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn write_guest_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    init_tracing();
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn handshake_line() -> String {
    serde_json::to_string(&Handshake::current()).unwrap()
}

/// A guest that dispenses and echoes every processed event back unchanged.
/// Any other method (including `Init`) is answered with an error, so a
/// setup that succeeds against this guest proves `Init` was never called.
fn echo_guest(dir: &TempDir) -> PathBuf {
    let body = format!(
        r#"#!/bin/sh
printf '%s\n' '{handshake}'
n=0
while IFS= read -r line; do
  n=$((n+1))
  case "$line" in
    *'"method":"Dispense"'*) printf '{{"id":%s,"result":"processor"}}\n' "$n" ;;
    *'"method":"Process"'*)
      body=${{line#*'"params":'}}
      body=${{body%\}}}}
      printf '{{"id":%s,"result":%s}}\n' "$n" "$body" ;;
    *) printf '{{"id":%s,"error":"unknown method"}}\n' "$n" ;;
  esac
done
"#,
        handshake = handshake_line()
    );
    write_guest_script(dir, "echo-guest", &body)
}

fn sample_event() -> Box<dyn PipelineEvent> {
    Box::new(Event::new(
        "inventory",
        vec![PkField::new("sku", "X-100"), PkField::new("site", "eu-1")],
        Operation::Write,
        br#"{"qty":5}"#.to_vec(),
    ))
}

#[tokio::test]
async fn test_echo_guest_round_trips_events() {
    let dir = TempDir::new().unwrap();
    let host = RpcPluginHost::new(RpcPluginConfig::new(echo_guest(&dir)))
        .await
        .unwrap();

    let result = host.process(sample_event()).await.unwrap();
    let event = result.expect("echo guest must return an event");

    assert_eq!(event.event_type(), "inventory");
    assert_eq!(event.operation(), Operation::Write);
    assert_eq!(event.raw(), br#"{"qty":5}"#);
    assert_eq!(
        event.primary_keys(),
        &vec![PkField::new("sku", "X-100"), PkField::new("site", "eu-1")]
    );

    host.shutdown().await;
}

#[tokio::test]
async fn test_close_is_idempotent_and_ends_the_connection() {
    let dir = TempDir::new().unwrap();
    let host = RpcPluginHost::new(RpcPluginConfig::new(echo_guest(&dir)))
        .await
        .unwrap();

    host.close().await.unwrap();
    host.close().await.unwrap();

    let err = host.process(sample_event()).await.unwrap_err();
    assert!(matches!(err, ProcessorError::Rpc(_)));
}

#[tokio::test]
async fn test_mismatched_cookie_fails_setup_before_any_call() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("process-was-called");

    let mut bad = Handshake::current();
    bad.cookie_value = "intruder".to_string();
    let body = format!(
        r#"#!/bin/sh
printf '%s\n' '{handshake}'
while IFS= read -r line; do
  case "$line" in
    *'"method":"Process"'*) : > "{marker}" ;;
  esac
done
"#,
        handshake = serde_json::to_string(&bad).unwrap(),
        marker = marker.display(),
    );
    let script = write_guest_script(&dir, "imposter-guest", &body);

    let err = RpcPluginHost::new(RpcPluginConfig::new(script))
        .await
        .unwrap_err();
    match err {
        PluginError::Initialization(message) => assert!(message.contains("magic cookie")),
        other => panic!("expected initialization error, got {other:?}"),
    }
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_missing_executable_fails_setup() {
    let err = RpcPluginHost::new(RpcPluginConfig::new("/nonexistent/plugin-binary"))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Initialization(_)));
}

#[tokio::test]
async fn test_non_empty_init_options_call_init_exactly_once() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("init-calls");

    let body = format!(
        r#"#!/bin/sh
printf '%s\n' '{handshake}'
n=0
while IFS= read -r line; do
  n=$((n+1))
  case "$line" in
    *'"method":"Dispense"'*) printf '{{"id":%s,"result":"processor"}}\n' "$n" ;;
    *'"method":"Init"'*)
      printf 'called\n' >> "{marker}"
      printf '{{"id":%s,"result":null}}\n' "$n" ;;
    *'"method":"Process"'*)
      body=${{line#*'"params":'}}
      body=${{body%\}}}}
      printf '{{"id":%s,"result":%s}}\n' "$n" "$body" ;;
  esac
done
"#,
        handshake = handshake_line(),
        marker = marker.display(),
    );
    let script = write_guest_script(&dir, "init-guest", &body);

    let mut options = serde_json::Map::new();
    options.insert("key".to_string(), serde_json::json!("value"));
    let host = RpcPluginHost::new(RpcPluginConfig::new(script).with_init_options(options))
        .await
        .unwrap();

    let calls = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(calls.lines().count(), 1);

    // Further processing never re-initializes.
    host.process(sample_event()).await.unwrap();
    let calls = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(calls.lines().count(), 1);

    host.shutdown().await;
}

#[tokio::test]
async fn test_init_failure_is_fatal_and_blocks_process() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("process-was-called");

    let body = format!(
        r#"#!/bin/sh
printf '%s\n' '{handshake}'
n=0
while IFS= read -r line; do
  n=$((n+1))
  case "$line" in
    *'"method":"Dispense"'*) printf '{{"id":%s,"result":"processor"}}\n' "$n" ;;
    *'"method":"Init"'*) printf '{{"id":%s,"error":"bad credentials"}}\n' "$n" ;;
    *'"method":"Process"'*) : > "{marker}" ;;
  esac
done
"#,
        handshake = handshake_line(),
        marker = marker.display(),
    );
    let script = write_guest_script(&dir, "failing-init-guest", &body);

    let mut options = serde_json::Map::new();
    options.insert("key".to_string(), serde_json::json!("value"));
    let err = RpcPluginHost::new(RpcPluginConfig::new(script).with_init_options(options))
        .await
        .unwrap_err();

    match err {
        PluginError::Initialization(message) => assert!(message.contains("bad credentials")),
        other => panic!("expected initialization error, got {other:?}"),
    }
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_guest_application_error_does_not_poison_the_connection() {
    let dir = TempDir::new().unwrap();
    let flag = dir.path().join("already-failed-once");

    let body = format!(
        r#"#!/bin/sh
printf '%s\n' '{handshake}'
n=0
while IFS= read -r line; do
  n=$((n+1))
  case "$line" in
    *'"method":"Dispense"'*) printf '{{"id":%s,"result":"processor"}}\n' "$n" ;;
    *'"method":"Process"'*)
      if [ -e "{flag}" ]; then
        body=${{line#*'"params":'}}
        body=${{body%\}}}}
        printf '{{"id":%s,"result":%s}}\n' "$n" "$body"
      else
        : > "{flag}"
        printf '{{"id":%s,"error":"flaky upstream"}}\n' "$n"
      fi ;;
  esac
done
"#,
        handshake = handshake_line(),
        flag = flag.display(),
    );
    let script = write_guest_script(&dir, "flaky-guest", &body);

    let host = RpcPluginHost::new(RpcPluginConfig::new(script)).await.unwrap();

    let err = host.process(sample_event()).await.unwrap_err();
    match err {
        ProcessorError::Execution(message) => assert!(message.contains("flaky upstream")),
        other => panic!("expected execution error, got {other:?}"),
    }

    // The connection stays usable for the next event.
    let event = host.process(sample_event()).await.unwrap();
    assert!(event.is_some());

    host.shutdown().await;
}

#[tokio::test]
async fn test_discarding_guest_yields_none() {
    let dir = TempDir::new().unwrap();
    let body = format!(
        r#"#!/bin/sh
printf '%s\n' '{handshake}'
n=0
while IFS= read -r line; do
  n=$((n+1))
  case "$line" in
    *'"method":"Dispense"'*) printf '{{"id":%s,"result":"processor"}}\n' "$n" ;;
    *'"method":"Process"'*) printf '{{"id":%s,"result":null}}\n' "$n" ;;
  esac
done
"#,
        handshake = handshake_line(),
    );
    let script = write_guest_script(&dir, "discard-guest", &body);

    let host = RpcPluginHost::new(RpcPluginConfig::new(script)).await.unwrap();
    let result = host.process(sample_event()).await.unwrap();
    assert!(result.is_none());

    host.shutdown().await;
}

#[tokio::test]
async fn test_stuck_guest_hits_the_call_deadline() {
    let dir = TempDir::new().unwrap();
    let body = format!(
        r#"#!/bin/sh
printf '%s\n' '{handshake}'
n=0
while IFS= read -r line; do
  n=$((n+1))
  case "$line" in
    *'"method":"Dispense"'*) printf '{{"id":%s,"result":"processor"}}\n' "$n" ;;
    *'"method":"Process"'*) sleep 30 ;;
  esac
done
"#,
        handshake = handshake_line(),
    );
    let script = write_guest_script(&dir, "stuck-guest", &body);

    let host = RpcPluginHost::new(
        RpcPluginConfig::new(script)
            .with_call_timeout(Duration::from_millis(200))
            .with_shutdown_grace(Duration::from_millis(200)),
    )
    .await
    .unwrap();

    let err = host.process(sample_event()).await.unwrap_err();
    assert!(matches!(err, ProcessorError::Timeout));

    host.shutdown().await;
}
