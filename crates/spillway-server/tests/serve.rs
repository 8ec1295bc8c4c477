//! End-to-end tests over a real listener

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use spillway_server::{ServerConfig, SinkConfig, StorageConfig, run};
use spillway_sink::ObjectStoreSinkConfig;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn object_store_sink(root: &Path) -> SinkConfig {
    SinkConfig::ObjectStore(ObjectStoreSinkConfig {
        root: root.to_path_buf(),
    })
}

/// Every delivered object under `root`, oldest first
fn delivered_objects(root: &Path) -> Vec<PathBuf> {
    fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, out);
            } else if path.extension().is_some_and(|ext| ext == "jsonl") {
                out.push(path);
            }
        }
    }
    let mut out = Vec::new();
    walk(root, &mut out);
    out.sort();
    out
}

fn delivered_event_names(root: &Path) -> Vec<String> {
    delivered_objects(root)
        .iter()
        .flat_map(|path| {
            std::fs::read_to_string(path)
                .unwrap()
                .lines()
                .map(|line| {
                    let value: Value = serde_json::from_str(line).unwrap();
                    value["ev"].as_str().unwrap().to_string()
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_drains_buffer_to_sink() {
    let objects = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        sink: object_store_sink(objects.path()),
        ..ServerConfig::default()
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(run(config, listener, shutdown.clone()));

    let client = client();
    for ev in ["first", "second", "third"] {
        let response = client
            .post(format!("http://{addr}/events"))
            .header("content-type", "application/json")
            .body(format!(r#"{{"ev":"{ev}","uid":"u-1"}}"#))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 202);
        assert_eq!(response.text().await.unwrap(), "Buffered");
    }

    let invalid = client
        .post(format!("http://{addr}/events"))
        .body(r#"{"uid":"u-1"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), 400);

    // Below every threshold, nothing is delivered yet
    assert!(delivered_objects(objects.path()).is_empty());

    shutdown.cancel();
    server.await.unwrap().unwrap();

    assert_eq!(
        delivered_event_names(objects.path()),
        vec!["first", "second", "third"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_delivers_persisted_events() {
    let data = tempfile::tempdir().unwrap();
    let objects = tempfile::tempdir().unwrap();

    // First process: no sink, so accepted events can only be persisted
    let first = ServerConfig {
        storage: StorageConfig::Redb {
            data_dir: data.path().to_path_buf(),
        },
        ..ServerConfig::default()
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(run(first, listener, shutdown.clone()));

    let client = client();
    for ev in ["a", "b"] {
        let response = client
            .post(format!("http://{addr}/events"))
            .body(format!(r#"{{"ev":"{ev}","uid":"u-1"}}"#))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 202);
    }

    shutdown.cancel();
    server.await.unwrap().unwrap();
    assert!(delivered_objects(objects.path()).is_empty());

    // Let the stopped timer tasks release the database
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Second process: recovers the partition and drains it on shutdown
    let second = ServerConfig {
        storage: StorageConfig::Redb {
            data_dir: data.path().to_path_buf(),
        },
        sink: object_store_sink(objects.path()),
        ..ServerConfig::default()
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    run(second, listener, shutdown).await.unwrap();

    assert_eq!(delivered_event_names(objects.path()), vec!["a", "b"]);
}
