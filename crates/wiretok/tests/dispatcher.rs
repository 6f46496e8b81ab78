mod common;

use common::*;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use wiretok::{Dispatcher, PayloadFormat, TokenizerConfig, WorkerConfig};

fn wait_for(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out");
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn raw_config() -> WorkerConfig {
    WorkerConfig {
        format: PayloadFormat::Raw,
        tokenizer: TokenizerConfig {
            max_length: 16,
            ..TokenizerConfig::default()
        },
        ..WorkerConfig::default()
    }
}

#[test]
fn one_thread_per_queue_and_totals_on_join() {
    let h = harness(4, 64, raw_config());
    let device = h.device.clone();
    let pool = h.pool.clone();
    let dispatcher = Dispatcher::spawn(h.workers, CancellationToken::new()).unwrap();
    assert_eq!(dispatcher.len(), 4);

    for queue in 0..4 {
        for _ in 0..=queue {
            device.inject(queue, &request(b"hello")).unwrap();
        }
    }
    device.inject(2, &request_to(1, b"nope")).unwrap();

    wait_for(|| dispatcher.stats().rx_packets == 11);
    wait_for(|| dispatcher.stats().tx_packets + dispatcher.stats().dropped == 11);

    let per_worker = dispatcher.per_worker_stats();
    let rx: Vec<_> = per_worker.iter().map(|(id, s)| (*id, s.rx_packets)).collect();
    assert_eq!(rx, vec![(0, 1), (1, 2), (2, 4), (3, 4)]);

    dispatcher.shutdown();
    let totals = dispatcher.join().unwrap();
    assert_eq!(totals.rx_packets, 11);
    assert_eq!(totals.tx_packets, 10);
    assert_eq!(totals.wrong_port, 1);

    for queue in 0..4 {
        let sent = device.take_transmitted(queue).unwrap();
        assert_eq!(sent.len(), usize::from(queue) + 1);
        assert!(sent.iter().all(|f| payload_of(f) == b"101 10 11 12 12 13 102"));
    }
    assert_eq!(pool.available(), pool.capacity());
}

#[test]
fn cancelling_the_shared_token_stops_every_worker() {
    let h = harness(2, 8, raw_config());
    let token = CancellationToken::new();
    let dispatcher = Dispatcher::spawn(h.workers, token.clone()).unwrap();

    token.cancel();
    assert!(dispatcher.shutdown_token().is_cancelled());
    assert_eq!(dispatcher.join().unwrap(), Default::default());
}

#[test]
fn reload_reaches_running_workers() {
    let h = harness(1, 8, raw_config());
    let device = h.device.clone();
    let vocab = h.vocab.clone();
    let dispatcher = Dispatcher::spawn(h.workers, CancellationToken::new()).unwrap();

    vocab.publish(wiretok::Vocabulary::from_json_str(r#"{"x": 1}"#).unwrap());
    device.inject(0, &request(b"xo")).unwrap();
    wait_for(|| dispatcher.stats().tx_packets == 1);

    dispatcher.shutdown();
    dispatcher.join().unwrap();
    let sent = device.take_transmitted(0).unwrap();
    assert_eq!(payload_of(&sent[0]), b"101 1 102");
}
