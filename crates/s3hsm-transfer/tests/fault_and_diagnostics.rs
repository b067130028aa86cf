//! Integration test: fault injection ordering and diagnostics routing
//!
//! Fault injection runs before the engine touches the backend, the same way
//! the CLI drives it. Diagnostics must land in the dispatch handed to the
//! engine.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use s3hsm_storage::MemoryConnector;
use s3hsm_transfer::{Engine, FaultInjection, InjectedFailure, LocationSettings};
use tempfile::TempDir;
use tracing::Dispatch;

/// Shared in-memory log sink for a fmt subscriber.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capturing_dispatch() -> (Dispatch, Captured) {
    let captured = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(captured.clone())
        .finish();
    (Dispatch::new(subscriber), captured)
}

/// What the CLI does: inject, then run the operation.
async fn guarded_store(
    fault: &FaultInjection,
    engine: &Engine,
    src: &std::path::Path,
) -> Result<u64, InjectedFailure> {
    fault.inject().await?;
    Ok(engine
        .store("obj", src, "hsm", true)
        .await
        .expect("store should succeed")
        .bytes)
}

#[tokio::test]
async fn injected_failure_never_connects() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    std::fs::write(&src, b"payload").unwrap();

    let connector = Arc::new(MemoryConnector::new().unwrap());
    let engine = Engine::new(
        connector.clone(),
        LocationSettings::default(),
        Dispatch::none(),
    );
    let fault = FaultInjection::new(None, Some(42)).unwrap();

    let err = guarded_store(&fault, &engine, &src).await.unwrap_err();
    assert_eq!(err.code(), 42);
    assert_eq!(connector.connect_count(), 0);
}

#[tokio::test]
async fn injected_delay_precedes_connect() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    std::fs::write(&src, b"payload").unwrap();

    let connector = Arc::new(MemoryConnector::new().unwrap());
    let engine = Engine::new(
        connector.clone(),
        LocationSettings::default(),
        Dispatch::none(),
    );
    let delay = Duration::from_millis(300);
    let fault = FaultInjection::new(Some(delay), None).unwrap();

    let start = Instant::now();
    let bytes = guarded_store(&fault, &engine, &src).await.unwrap();
    assert!(start.elapsed() >= delay);
    assert_eq!(bytes, 7);
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn diagnostics_go_to_engine_dispatch() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    std::fs::write(&src, b"payload").unwrap();

    let (dispatch, captured) = capturing_dispatch();
    let connector = Arc::new(MemoryConnector::new().unwrap());
    let engine = Engine::new(connector, LocationSettings::default(), dispatch);

    let stored = engine.store("obj", &src, "hsm", true).await.unwrap();
    let _ = engine
        .retrieve("s3://hsm/missing", &tmp.path().join("out"))
        .await
        .unwrap_err();

    let logs = captured.contents();
    assert!(logs.contains("phase change"), "{logs}");
    assert!(logs.contains("transferring"), "{logs}");
    assert!(logs.contains("operation complete"), "{logs}");
    assert!(logs.contains("operation failed"), "{logs}");

    let key_hex = stored.location.encode();
    let key_hex = key_hex.rsplit("ekey=").next().unwrap();
    assert!(!logs.contains(key_hex), "key material must never be logged");
}

#[tokio::test]
async fn failures_say_whether_the_location_was_bad() {
    let tmp = TempDir::new().unwrap();
    let (dispatch, captured) = capturing_dispatch();
    let engine = Engine::new(
        Arc::new(MemoryConnector::new().unwrap()),
        LocationSettings::default(),
        dispatch,
    );

    let _ = engine
        .retrieve("s3://hsm/a/%2e%2e/b", &tmp.path().join("out"))
        .await
        .unwrap_err();
    let logs = captured.contents();
    assert!(logs.contains("bad_location=true"), "{logs}");
    assert!(!logs.contains("bad_location=false"), "{logs}");

    let _ = engine.purge("s3://hsm/missing").await.unwrap_err();
    let logs = captured.contents();
    assert!(logs.contains("bad_location=false"), "{logs}");
}

#[tokio::test]
async fn transfer_logs_record_encryption() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    std::fs::write(&src, b"payload").unwrap();

    let (dispatch, captured) = capturing_dispatch();
    let engine = Engine::new(
        Arc::new(MemoryConnector::new().unwrap()),
        LocationSettings::default(),
        dispatch,
    );

    let stored = engine.store("sealed-obj", &src, "hsm", true).await.unwrap();
    engine
        .retrieve(&stored.location.encode(), &tmp.path().join("sealed.out"))
        .await
        .unwrap();
    engine.store("plain-obj", &src, "hsm", false).await.unwrap();

    let logs = captured.contents();
    let line = |msg: &str, key: &str| {
        logs.lines()
            .find(|l| l.contains(msg) && l.contains(key))
            .unwrap_or_else(|| panic!("no {msg} line for {key}: {logs}"))
            .to_string()
    };
    assert!(line("storing", "sealed-obj").contains("encrypted=true"));
    assert!(line("retrieving", "sealed-obj").contains("encrypted=true"));
    assert!(line("storing", "plain-obj").contains("encrypted=false"));
}
