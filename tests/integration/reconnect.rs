//! Connection state machine tests against in-memory streams

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use process_monitor::{
    Threshold, error::AgentError, storage::MemoryConfigStore, transport::ConnectionState,
};

use crate::helpers::*;

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_initial_configuration_is_applied() {
    let h = Harness::new(MemoryConfigStore::new());
    let stream = FakeStream::default();
    stream.push_inbound(br#"[{"process":"a.exe","cpu":10,"memory":0,"disk":0,"network":0}]"#);
    h.connector.offer(stream);

    h.client.start().unwrap();

    assert_eq!(h.client.state(), ConnectionState::Connected);
    assert_eq!(h.client.generation(), 1);
    assert_eq!(h.monitor.thresholds().len(), 1);
    assert_eq!(
        h.monitor.thresholds().lookup(&"a.exe".into()),
        Some(Threshold::new(10, 0, 0, 0))
    );
    assert_eq!(h.store.saved(), Some(vec![entry("a.exe", 10)]));
}

#[test]
fn test_rejected_initial_configuration_is_fatal() {
    let h = Harness::new(MemoryConfigStore::new());
    h.tracer.reject_monitors(true);
    h.connector
        .offer(FakeStream::with_initial_config(&[entry("a.exe", 10)]));

    assert_matches!(h.client.start(), Err(AgentError::Tracer(_)));
    assert!(!h.client.is_connected());
}

#[test]
fn test_offline_start_uses_cached_configuration() {
    let h = Harness::new(MemoryConfigStore::with_entries(vec![entry("cached.exe", 20)]));

    h.client.start().unwrap();

    assert_eq!(h.client.state(), ConnectionState::Disconnected);
    assert!(h.monitor.thresholds().is_monitored(&"cached.exe".into()));
    // restoring does not write the cache back
    assert_eq!(h.store.save_count(), 0);
}

#[test]
fn test_offline_start_without_cache_fails() {
    let h = Harness::new(MemoryConfigStore::new());

    assert_matches!(h.client.start(), Err(AgentError::NoConfiguration(_)));
}

#[test]
fn test_concurrent_failures_reconnect_once() {
    let h = Harness::new(MemoryConfigStore::new());
    h.connector
        .offer(FakeStream::with_initial_config(&[entry("a.exe", 10)]));
    h.client.start().unwrap();
    h.connector
        .offer(FakeStream::with_initial_config(&[entry("b.exe", 20)]));

    let failed = h.client.generation();
    let barrier = Arc::new(Barrier::new(2));
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let client = h.client.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                client.recover(failed)
            })
        })
        .collect();

    for worker in workers {
        assert!(worker.join().unwrap());
    }
    assert_eq!(h.client.reconnects(), 1);
    assert_eq!(h.client.generation(), failed + 1);
    assert_eq!(h.connector.attempts(), 2);
    assert!(h.monitor.thresholds().is_monitored(&"b.exe".into()));
}

#[test]
fn test_stale_failure_does_not_reconnect_again() {
    let h = Harness::new(MemoryConfigStore::new());
    h.connector
        .offer(FakeStream::with_initial_config(&[entry("a.exe", 10)]));
    h.client.start().unwrap();
    h.connector
        .offer(FakeStream::with_initial_config(&[entry("a.exe", 10)]));

    assert!(h.client.recover(1));
    assert!(h.client.recover(1));

    assert_eq!(h.client.reconnects(), 1);
}

#[test]
fn test_backlog_survives_reconnect() {
    let h = Harness::new(MemoryConfigStore::new());
    let first = FakeStream::with_initial_config(&[entry("proc.exe", 50)]);
    let second = FakeStream::with_initial_config(&[entry("proc.exe", 50)]);
    h.connector.offer(first.clone());
    h.client.start().unwrap();
    h.connector.offer(second.clone());

    first.fail_writes();
    h.queue.push(violation(1, 60));
    h.queue.push(violation(2, 70));
    h.queue.push(violation(3, 80));

    // the in-flight violation is lost, the rest stays queued
    assert!(h.client.send_next());
    assert_eq!(h.client.reconnects(), 1);
    assert_eq!(h.queue.drain(), vec![violation(2, 70), violation(3, 80)]);

    h.queue.push(violation(2, 70));
    assert!(h.client.send_next());
    assert_eq!(second.written_violations(), vec![violation(2, 70)]);
    assert!(first.written_violations().is_empty());
}

#[test]
fn test_violations_are_written_in_queue_order() {
    let h = Harness::new(MemoryConfigStore::new());
    let stream = FakeStream::with_initial_config(&[entry("proc.exe", 50)]);
    h.connector.offer(stream.clone());
    h.client.start().unwrap();

    let sent: Vec<_> = (1..=5).map(|pid| violation(pid, 50 + pid)).collect();
    for v in &sent {
        h.queue.push(*v);
    }
    for _ in &sent {
        assert!(h.client.send_next());
    }

    assert_eq!(stream.written_violations(), sent);
}

#[test]
fn test_configuration_update_replaces_table() {
    let h = Harness::new(MemoryConfigStore::new());
    let stream = FakeStream::with_initial_config(&[entry("a.exe", 10)]);
    h.connector.offer(stream.clone());
    h.client.start().unwrap();

    let receiver = {
        let client = h.client.clone();
        thread::spawn(move || client.run_receiver())
    };
    stream.push_config_frame(&[entry("b.exe", 30)]);

    let thresholds = h.monitor.thresholds();
    assert!(wait_until(WAIT, || thresholds.is_monitored(&"b.exe".into())));
    assert_eq!(thresholds.lookup(&"a.exe".into()), None);
    assert_eq!(h.store.saved(), Some(vec![entry("b.exe", 30)]));

    h.cancel.cancel();
    receiver.join().unwrap();
}

#[test]
fn test_malformed_update_forces_reconnect() {
    let h = Harness::new(MemoryConfigStore::new());
    let first = FakeStream::with_initial_config(&[entry("a.exe", 10)]);
    h.connector.offer(first.clone());
    h.client.start().unwrap();
    h.connector
        .offer(FakeStream::with_initial_config(&[entry("c.exe", 5)]));

    let receiver = {
        let client = h.client.clone();
        thread::spawn(move || client.run_receiver())
    };
    let mut frame = 5u32.to_le_bytes().to_vec();
    frame.extend_from_slice(b"[{]}]");
    first.push_inbound(&frame);

    assert!(wait_until(WAIT, || h.client.generation() == 2));
    assert_eq!(h.client.reconnects(), 1);
    assert!(first.is_closed());
    // nothing from the broken frame was applied
    assert!(h.monitor.thresholds().is_monitored(&"c.exe".into()));
    assert!(!h.monitor.thresholds().is_monitored(&"a.exe".into()));

    h.cancel.cancel();
    receiver.join().unwrap();
}

#[test]
fn test_offline_agent_connects_once_collector_appears() {
    let h = Harness::new(MemoryConfigStore::with_entries(vec![entry("cached.exe", 20)]));
    h.client.start().unwrap();

    let receiver = {
        let client = h.client.clone();
        thread::spawn(move || client.run_receiver())
    };
    thread::sleep(RETRY_DELAY * 3);
    h.connector
        .offer(FakeStream::with_initial_config(&[entry("live.exe", 40)]));

    assert!(wait_until(WAIT, || h.client.is_connected()));
    assert_eq!(h.client.state(), ConnectionState::Connected);
    assert!(h.monitor.thresholds().is_monitored(&"live.exe".into()));
    assert!(!h.monitor.thresholds().is_monitored(&"cached.exe".into()));

    h.cancel.cancel();
    receiver.join().unwrap();
}

#[test]
fn test_shutdown_unblocks_workers() {
    let h = Harness::new(MemoryConfigStore::new());
    let stream = FakeStream::with_initial_config(&[entry("a.exe", 10)]);
    h.connector.offer(stream.clone());
    h.client.start().unwrap();

    let receiver = {
        let client = h.client.clone();
        thread::spawn(move || client.run_receiver())
    };
    let sender = {
        let client = h.client.clone();
        thread::spawn(move || client.run_sender())
    };
    thread::sleep(Duration::from_millis(50));

    h.cancel.cancel();
    receiver.join().unwrap();
    sender.join().unwrap();

    assert!(stream.is_closed());
    assert_eq!(h.client.state(), ConnectionState::Disconnected);
    assert_eq!(h.client.reconnects(), 0);
}

#[test]
fn test_shutdown_interrupts_pending_handshake() {
    let h = Harness::new(MemoryConfigStore::with_entries(vec![entry("cached.exe", 20)]));
    h.client.start().unwrap();

    // the collector accepts but never sends its configuration
    let silent = FakeStream::default();
    h.connector.offer(silent.clone());

    let recovering = {
        let client = h.client.clone();
        thread::spawn(move || client.recover(0))
    };
    assert!(wait_until(WAIT, || h.connector.attempts() == 2));
    thread::sleep(Duration::from_millis(50));

    let cancelled_at = Instant::now();
    h.cancel.cancel();
    let reconnected = recovering.join().unwrap();

    assert!(!reconnected);
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    assert!(silent.is_closed());
    assert_eq!(h.client.state(), ConnectionState::Disconnected);
}
