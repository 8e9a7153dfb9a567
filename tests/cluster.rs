//! End-to-end tests: real node runtimes on ephemeral loopback ports with
//! temp-dir stores, exercised through the same clients the binary uses.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use mirrorsync::client::ControlClient;
use mirrorsync::download::FailoverDownloader;
use mirrorsync::error::Error;
use mirrorsync::events::{Event, EventBus};
use mirrorsync::node::{NodeIdentity, NodeRuntime};
use mirrorsync::store::LocalStore;
use mirrorsync::sync::{FileOutcome, PlannedDownload, PullSync, PushSync};
use mirrorsync::transfer::{FetchOutcome, TransferClient};

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

fn write_file(dir: &Path, name: &str, content: &[u8]) {
    std::fs::write(dir.join(name), content).unwrap();
}

fn control() -> ControlClient {
    ControlClient::new(Duration::from_secs(2)).unwrap()
}

fn transfer(events: &EventBus) -> TransferClient {
    TransferClient::new(
        Duration::from_millis(500),
        Duration::from_secs(2),
        Duration::from_millis(250),
        events.clone(),
    )
    .unwrap()
}

async fn start_node(identity: NodeIdentity, events: &EventBus) -> mirrorsync::node::NodeHandle {
    NodeRuntime::new(identity, events.clone())
        .await
        .unwrap()
        .start()
        .await
        .unwrap()
}

// ---- Node runtime surface ----

#[tokio::test]
async fn range_framing_full_partial_unsatisfiable() {
    let dir = tempfile::tempdir().unwrap();
    let content = pattern(100, 3);
    write_file(dir.path(), "a.bin", &content);

    let events = EventBus::new();
    let node = start_node(NodeIdentity::primary("127.0.0.1:0", dir.path()), &events).await;
    let base = format!("http://{}", node.address());
    let http = reqwest::Client::new();

    // Full framing
    let resp = http.get(format!("{}/files/a.bin", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), &content[..]);

    // Partial framing with the range actually served and the total size
    let resp = http
        .get(format!("{}/files/a.bin", base))
        .header("Range", "bytes=40-")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 206);
    assert_eq!(
        resp.headers().get("content-range").unwrap().to_str().unwrap(),
        "bytes 40-99/100"
    );
    assert_eq!(resp.bytes().await.unwrap().as_ref(), &content[40..]);

    // Resume at or beyond the end
    let resp = http
        .get(format!("{}/files/a.bin", base))
        .header("Range", "bytes=100-")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 416);

    // Unknown name
    let resp = http.get(format!("{}/files/nope.bin", base)).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    node.hard_stop().await;
}

#[tokio::test]
async fn role_gating_rejects_writes_on_primary() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "keep.bin", b"keep");

    let events = EventBus::new();
    let node = start_node(NodeIdentity::primary("127.0.0.1:0", dir.path()), &events).await;
    let base = format!("http://{}", node.address());
    let http = reqwest::Client::new();

    let resp = http
        .put(format!("{}/files/evil.bin", base))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = http.delete(format!("{}/files/keep.bin", base)).send().await.unwrap();
    assert_eq!(resp.status(), 403);

    // The store is unmodified
    let names = control().list_files(&node.address()).await.unwrap();
    assert_eq!(names, vec!["keep.bin".to_string()]);

    node.hard_stop().await;
}

#[tokio::test]
async fn replica_accepts_write_and_idempotent_delete() {
    let dir = tempfile::tempdir().unwrap();
    let events = EventBus::new();
    let node = start_node(NodeIdentity::replica(1, "127.0.0.1:0", dir.path()), &events).await;
    let base = format!("http://{}", node.address());
    let http = reqwest::Client::new();

    let resp = http
        .put(format!("{}/files/up.bin", base))
        .body(pattern(64, 9))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(std::fs::read(dir.path().join("up.bin")).unwrap(), pattern(64, 9));

    let resp = http.delete(format!("{}/files/up.bin", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    // Deleting again is still success
    let resp = http.delete(format!("{}/files/up.bin", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    node.hard_stop().await;
}

#[tokio::test]
async fn manifest_reports_sizes() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "a.bin", &pattern(100, 1));
    write_file(dir.path(), "b.bin", &pattern(200, 2));

    let events = EventBus::new();
    let node = start_node(NodeIdentity::primary("127.0.0.1:0", dir.path()), &events).await;

    let mut manifest = control().manifest(&node.address()).await.unwrap();
    manifest.sort_by(|x, y| x.name.cmp(&y.name));
    assert_eq!(manifest.len(), 2);
    assert_eq!(manifest[0].size, Some(100));
    assert_eq!(manifest[1].size, Some(200));

    node.hard_stop().await;
}

// ---- Registry ----

#[tokio::test]
async fn registry_http_roundtrip_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let events = EventBus::new();
    let node = start_node(NodeIdentity::primary("127.0.0.1:0", dir.path()), &events).await;
    let base = format!("http://{}", node.address());
    let http = reqwest::Client::new();

    for _ in 0..2 {
        let resp = http
            .post(format!("{}/replicas", base))
            .json(&serde_json::json!({ "address": "127.0.0.1:9001" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let replicas = control().replicas(&node.address()).await.unwrap();
    assert_eq!(replicas, vec!["127.0.0.1:9001".to_string()]);

    for _ in 0..2 {
        let resp = http
            .delete(format!("{}/replicas/127.0.0.1:9001", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    assert!(control().replicas(&node.address()).await.unwrap().is_empty());

    node.hard_stop().await;
}

#[tokio::test]
async fn registry_surface_forbidden_on_replica() {
    let dir = tempfile::tempdir().unwrap();
    let events = EventBus::new();
    let node = start_node(NodeIdentity::replica(1, "127.0.0.1:0", dir.path()), &events).await;

    let resp = reqwest::Client::new()
        .get(format!("http://{}/replicas", node.address()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    node.hard_stop().await;
}

// ---- Pull sync ----

#[tokio::test]
async fn pull_sync_converges_and_is_idempotent() {
    let primary_dir = tempfile::tempdir().unwrap();
    let a = pattern(100, 1);
    let b = pattern(200, 2);
    write_file(primary_dir.path(), "a", &a);
    write_file(primary_dir.path(), "b", &b);

    let replica_dir = tempfile::tempdir().unwrap();
    write_file(replica_dir.path(), "a", &a[..40]); // partial prior transfer
    write_file(replica_dir.path(), "c", &pattern(10, 3)); // extraneous

    let events = EventBus::new();
    let node = start_node(NodeIdentity::primary("127.0.0.1:0", primary_dir.path()), &events).await;

    let store = LocalStore::open(replica_dir.path()).await.unwrap();
    let engine = PullSync::new(
        1,
        store,
        node.address(),
        control(),
        transfer(&events),
        events.clone(),
    );

    let report = engine.run().await.unwrap();
    assert!(report.is_success());
    assert_eq!(
        report.plan.downloads,
        vec![
            PlannedDownload { name: "a".into(), resume_from: 40 },
            PlannedDownload { name: "b".into(), resume_from: 0 },
        ]
    );
    assert_eq!(report.plan.deletes, vec!["c".to_string()]);
    assert!(matches!(report.results[0].1, FileOutcome::Downloaded { bytes: 60 }));

    assert_eq!(std::fs::read(replica_dir.path().join("a")).unwrap(), a);
    assert_eq!(std::fs::read(replica_dir.path().join("b")).unwrap(), b);
    assert!(!replica_dir.path().join("c").exists());

    // Second run with no primary-side changes: empty plan
    let report = engine.run().await.unwrap();
    assert!(report.plan.is_empty());

    node.hard_stop().await;
}

#[tokio::test]
async fn pull_sync_repairs_oversized_local_copy() {
    let primary_dir = tempfile::tempdir().unwrap();
    let a = pattern(100, 7);
    write_file(primary_dir.path(), "a", &a);

    let replica_dir = tempfile::tempdir().unwrap();
    write_file(replica_dir.path(), "a", &pattern(150, 8)); // larger than authoritative

    let events = EventBus::new();
    let node = start_node(NodeIdentity::primary("127.0.0.1:0", primary_dir.path()), &events).await;

    let store = LocalStore::open(replica_dir.path()).await.unwrap();
    let engine = PullSync::new(
        1,
        store,
        node.address(),
        control(),
        transfer(&events),
        events.clone(),
    );

    let report = engine.run().await.unwrap();
    assert_eq!(report.plan.deletes, vec!["a".to_string()]);
    assert_eq!(
        report.plan.downloads,
        vec![PlannedDownload { name: "a".into(), resume_from: 0 }]
    );
    assert_eq!(std::fs::read(replica_dir.path().join("a")).unwrap(), a);

    node.hard_stop().await;
}

// ---- Transfer / resume ----

#[tokio::test]
async fn resume_fetch_completes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let content = pattern(1000, 5);
    write_file(dir.path(), "big.bin", &content);

    let events = EventBus::new();
    let node = start_node(NodeIdentity::primary("127.0.0.1:0", dir.path()), &events).await;

    let dest_dir = tempfile::tempdir().unwrap();
    let dest = dest_dir.path().join("big.bin");
    std::fs::write(&dest, &content[..400]).unwrap(); // interrupted earlier attempt

    let outcome = transfer(&events)
        .fetch_file(&node.address(), "big.bin", &dest, 400)
        .await
        .unwrap();
    assert_eq!(outcome, FetchOutcome::Completed { bytes_received: 600 });
    assert_eq!(std::fs::read(&dest).unwrap(), content);

    node.hard_stop().await;
}

#[tokio::test]
async fn resume_of_complete_file_is_already_complete() {
    let dir = tempfile::tempdir().unwrap();
    let content = pattern(256, 6);
    write_file(dir.path(), "done.bin", &content);

    let events = EventBus::new();
    let node = start_node(NodeIdentity::primary("127.0.0.1:0", dir.path()), &events).await;

    let dest_dir = tempfile::tempdir().unwrap();
    let dest = dest_dir.path().join("done.bin");
    std::fs::write(&dest, &content).unwrap();

    let outcome = transfer(&events)
        .fetch_file(&node.address(), "done.bin", &dest, 256)
        .await
        .unwrap();
    assert_eq!(outcome, FetchOutcome::AlreadyComplete);
    // Untouched
    assert_eq!(std::fs::read(&dest).unwrap(), content);

    node.hard_stop().await;
}

#[tokio::test]
async fn stalled_peer_hits_idle_timeout() {
    // Hand-rolled peer: sends headers plus a few bytes, then goes silent.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = sock.read(&mut buf).await;
        let head = "HTTP/1.1 200 OK\r\ncontent-length: 100\r\ncontent-type: application/octet-stream\r\n\r\n";
        sock.write_all(head.as_bytes()).await.unwrap();
        sock.write_all(&[0u8; 10]).await.unwrap();
        sock.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let events = EventBus::new();
    let client = TransferClient::new(
        Duration::from_millis(500),
        Duration::from_millis(300), // idle timeout under test
        Duration::from_millis(250),
        events.clone(),
    )
    .unwrap();

    let dest_dir = tempfile::tempdir().unwrap();
    let dest = dest_dir.path().join("stall.bin");
    let err = client.fetch_file(&address, "stall.bin", &dest, 0).await.unwrap_err();
    assert!(matches!(err, Error::IdleTimeout(_)), "got: {:?}", err);

    // Whatever arrived stays on disk for a later resume
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 10);
}

#[tokio::test]
async fn mid_stream_close_is_a_transfer_failure() {
    // Peer promises 100 bytes, delivers 40, then closes the socket.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = sock.read(&mut buf).await;
        let head = "HTTP/1.1 200 OK\r\ncontent-length: 100\r\ncontent-type: application/octet-stream\r\n\r\n";
        sock.write_all(head.as_bytes()).await.unwrap();
        sock.write_all(&[7u8; 40]).await.unwrap();
        sock.flush().await.unwrap();
    });

    let events = EventBus::new();
    let dest_dir = tempfile::tempdir().unwrap();
    let dest = dest_dir.path().join("cut.bin");
    let err = transfer(&events)
        .fetch_file(&address, "cut.bin", &dest, 0)
        .await
        .unwrap_err();
    assert!(err.is_transfer_failure(), "got: {:?}", err);
}

#[tokio::test]
async fn fetch_from_stopped_node_fails_and_preserves_partial_bytes() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "f.bin", &pattern(100, 1));

    let events = EventBus::new();
    let node = start_node(NodeIdentity::primary("127.0.0.1:0", dir.path()), &events).await;
    let address = node.address();
    node.hard_stop().await;

    let dest_dir = tempfile::tempdir().unwrap();
    let dest = dest_dir.path().join("f.bin");
    std::fs::write(&dest, pattern(30, 1)).unwrap(); // earlier partial attempt

    let err = transfer(&events)
        .fetch_file(&address, "f.bin", &dest, 30)
        .await
        .unwrap_err();
    assert!(err.is_transfer_failure(), "got: {:?}", err);
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 30);
}

// ---- Failover download ----

#[tokio::test]
async fn failover_tries_candidates_in_order_then_exhausts() {
    // Primary is reachable (so the registry snapshot works) but cannot
    // serve the file; both registered replicas are dead endpoints.
    let dir = tempfile::tempdir().unwrap();
    let events = EventBus::new();
    let node = start_node(NodeIdentity::primary("127.0.0.1:0", dir.path()), &events).await;

    let dead1 = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().to_string()
    };
    let dead2 = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().to_string()
    };
    let registry = node.registry().unwrap();
    registry.register(&dead1).await;
    registry.register(&dead2).await;
    let snapshot = registry.snapshot().await;

    let mut rx = events.subscribe();
    let downloader = FailoverDownloader::new(control(), transfer(&events), events.clone());
    let dest_dir = tempfile::tempdir().unwrap();

    let err = downloader
        .download(&node.address(), "ghost.bin", dest_dir.path())
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::ExhaustedFailover { attempted: 3, bytes_preserved: 0, .. }),
        "got: {:?}",
        err
    );

    // Each candidate was attempted exactly once, in list order
    let mut attempts = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Event::Status { message, .. } = event {
            if let Some(rest) = message.strip_prefix("Trying ghost.bin from ") {
                let endpoint = rest.split(' ').next().unwrap().to_string();
                attempts.push(endpoint);
            }
        }
    }
    let mut expected = vec![node.address()];
    expected.extend(snapshot);
    assert_eq!(attempts, expected);

    node.hard_stop().await;
}

#[tokio::test]
async fn failover_falls_through_to_a_replica() {
    // Primary serves the registry but not the file; the replica has it.
    let primary_dir = tempfile::tempdir().unwrap();
    let replica_dir = tempfile::tempdir().unwrap();
    let content = pattern(512, 4);
    write_file(replica_dir.path(), "only-here.bin", &content);

    let events = EventBus::new();
    let primary = start_node(NodeIdentity::primary("127.0.0.1:0", primary_dir.path()), &events).await;
    let replica = start_node(NodeIdentity::replica(1, "127.0.0.1:0", replica_dir.path()), &events).await;
    primary.registry().unwrap().register(&replica.address()).await;

    let downloader = FailoverDownloader::new(control(), transfer(&events), events.clone());
    let dest_dir = tempfile::tempdir().unwrap();
    let report = downloader
        .download(&primary.address(), "only-here.bin", dest_dir.path())
        .await
        .unwrap();

    assert_eq!(report.endpoint, replica.address());
    assert_eq!(std::fs::read(report.dest).unwrap(), content);

    primary.hard_stop().await;
    replica.hard_stop().await;
}

// ---- Push sync ----

#[tokio::test]
async fn push_sync_exchanges_missing_names() {
    let primary_dir = tempfile::tempdir().unwrap();
    let replica_dir = tempfile::tempdir().unwrap();
    let x = pattern(80, 1);
    let y = pattern(120, 2);
    write_file(primary_dir.path(), "x", &x);
    write_file(replica_dir.path(), "y", &y);

    let events = EventBus::new();
    let replica = start_node(NodeIdentity::replica(1, "127.0.0.1:0", replica_dir.path()), &events).await;

    let store = LocalStore::open(primary_dir.path()).await.unwrap();
    let engine = PushSync::new(store, control(), transfer(&events), events.clone());
    let report = engine.run(&replica.address()).await.unwrap();

    assert_eq!(report.uploaded, vec!["x".to_string()]);
    assert_eq!(report.fetched, vec!["y".to_string()]);
    assert_eq!(std::fs::read(replica_dir.path().join("x")).unwrap(), x);
    assert_eq!(std::fs::read(primary_dir.path().join("y")).unwrap(), y);

    replica.hard_stop().await;
}
