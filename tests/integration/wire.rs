//! Agent and collector talking over real sockets

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use process_monitor::{
    cancel::CancellationToken,
    config::ConfigEntry,
    monitors::Monitor,
    protocol,
    queue::ViolationQueue,
    storage::MemoryConfigStore,
    tracer::FakeTracer,
    transport::{ConfigSink, TcpConnector, TransportClient, TransportServer, ViolationReport},
};
use tokio::{
    spawn,
    sync::{mpsc, watch},
    task::spawn_blocking,
    time::timeout,
};

use crate::helpers::*;

const WAIT: Duration = Duration::from_secs(5);

struct Collector {
    addr: SocketAddr,
    config: watch::Sender<Arc<Vec<ConfigEntry>>>,
    reports: mpsc::UnboundedReceiver<ViolationReport>,
}

async fn collector(entries: Vec<ConfigEntry>) -> Collector {
    let (config, config_rx) = watch::channel(Arc::new(entries));
    let server = TransportServer::bind("127.0.0.1:0".parse().unwrap(), config_rx)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let (reports_tx, reports) = mpsc::unbounded_channel();
    spawn(server.run(reports_tx));

    Collector {
        addr,
        config,
        reports,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_agent_reports_violation_to_collector() {
    let mut collector = collector(vec![entry("proc.exe", 50)]).await;
    let addr = collector.addr;

    let thresholds = spawn_blocking(move || {
        let cancel = CancellationToken::new();
        let queue = ViolationQueue::new(&cancel);
        let monitor = Arc::new(Monitor::new(
            queue.clone(),
            Arc::new(FakeTracer::new()),
            Arc::new(ScriptedMetrics::default()),
            Arc::new(MemoryConfigStore::new()),
        ));
        let sink: Arc<dyn ConfigSink> = monitor.clone();
        let client = TransportClient::new(
            TcpConnector::new(addr),
            sink,
            queue.clone(),
            cancel.clone(),
            RETRY_DELAY,
        );

        client.start().unwrap();
        queue.push(violation(1234, 75));
        assert!(client.send_next());

        let thresholds = monitor.thresholds().snapshot();
        cancel.cancel();
        thresholds
    })
    .await
    .unwrap();

    assert_eq!(thresholds.len(), 1);
    assert!(thresholds.contains_key(&"proc.exe".into()));

    let report = timeout(WAIT, collector.reports.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.violation, violation(1234, 75));
    assert_eq!(report.peer.ip(), addr.ip());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_configuration_change_is_pushed_framed() {
    let collector = collector(vec![entry("a.exe", 10)]).await;
    let addr = collector.addr;

    let (handshake_tx, handshake_rx) = std::sync::mpsc::channel();
    let agent = spawn_blocking(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(WAIT)).unwrap();

        let initial = protocol::read_initial_config(&mut stream).unwrap();
        handshake_tx.send(()).unwrap();
        let update = protocol::read_config_frame(&mut stream).unwrap();
        (initial, update)
    });

    spawn_blocking(move || handshake_rx.recv_timeout(WAIT).unwrap())
        .await
        .unwrap();
    collector
        .config
        .send_replace(Arc::new(vec![entry("b.exe", 20)]));

    let (initial, update) = timeout(WAIT, agent).await.unwrap().unwrap();
    assert_eq!(initial, vec![entry("a.exe", 10)]);
    assert_eq!(update, vec![entry("b.exe", 20)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dead_peer_does_not_affect_others() {
    let mut collector = collector(vec![entry("a.exe", 10)]).await;
    let addr = collector.addr;

    spawn_blocking(move || {
        let mut dead = TcpStream::connect(addr).unwrap();
        protocol::read_initial_config(&mut dead).unwrap();
        // half a frame, then gone
        std::io::Write::write_all(&mut dead, &[32, 0]).unwrap();
        drop(dead);

        let mut alive = TcpStream::connect(addr).unwrap();
        protocol::read_initial_config(&mut alive).unwrap();
        protocol::write_violation(&mut alive, &violation(2, 90)).unwrap();
        alive
    })
    .await
    .unwrap();

    let report = timeout(WAIT, collector.reports.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.violation, violation(2, 90));
}

#[test]
fn test_shutdown_during_silent_handshake_is_prompt() {
    // connects complete through the backlog; nothing is ever written back
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let cancel = CancellationToken::new();
    let queue = ViolationQueue::new(&cancel);
    let sink: Arc<dyn ConfigSink> = Arc::new(Monitor::new(
        queue.clone(),
        Arc::new(FakeTracer::new()),
        Arc::new(ScriptedMetrics::default()),
        Arc::new(MemoryConfigStore::new()),
    ));
    let client = TransportClient::new(
        TcpConnector::new(addr),
        sink,
        queue,
        cancel.clone(),
        RETRY_DELAY,
    );

    let recovering = {
        let client = client.clone();
        thread::spawn(move || client.recover(1))
    };
    thread::sleep(Duration::from_millis(200));

    let cancelled_at = Instant::now();
    cancel.cancel();
    let reconnected = recovering.join().unwrap();
    let elapsed = cancelled_at.elapsed();

    assert!(!reconnected);
    assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");
    drop(listener);
}
