mod common;

use common::*;
use serde_json::{Value, json};
use wiretok::{
    CodecConfig, FrameCodec, PacketQueue, PayloadFormat, StatsSnapshot, TokenizerConfig,
    Vocabulary, WorkerConfig, frame::HEADERS_LEN,
};

fn config(format: PayloadFormat, max_length: usize) -> WorkerConfig {
    WorkerConfig {
        format,
        tokenizer: TokenizerConfig {
            max_length,
            ..TokenizerConfig::default()
        },
        ..WorkerConfig::default()
    }
}

#[test]
fn hello_round_trip_over_raw_payloads() {
    let mut h = harness(1, 8, config(PayloadFormat::Raw, 8));
    h.device.inject(0, &request(b"hello")).unwrap();

    assert_eq!(h.workers[0].poll_once(), 1);

    let sent = h.device.take_transmitted(0).unwrap();
    assert_eq!(sent.len(), 1);

    let client_codec = FrameCodec::new(CodecConfig {
        listen_port: CLIENT_PORT,
        ..CodecConfig::default()
    });
    let reply = client_codec.parse(&sent[0]).unwrap();
    assert_eq!(reply.dst_addr, CLIENT);
    assert_eq!(reply.src_addr, SERVER);
    assert_eq!(reply.src_port, 67);
    assert_eq!(reply.payload, b"101 10 11 12 12 13 102");
}

#[test]
fn json_batches_keep_order_and_reject_non_text_elements() {
    let mut h = harness(1, 8, config(PayloadFormat::Json, 6));
    let mut body = Vec::new();
    PayloadFormat::Json
        .encode_request(&["oh", "hello"], &mut body)
        .unwrap();
    h.device.inject(0, &request(&body)).unwrap();
    h.device
        .inject(0, &request(json!({"texts": ["e", 7]}).to_string().as_bytes()))
        .unwrap();

    assert_eq!(h.workers[0].poll_once(), 2);
    let sent = h.device.take_transmitted(0).unwrap();
    assert_eq!(sent.len(), 2);

    let first: Value = serde_json::from_slice(payload_of(&sent[0])).unwrap();
    assert_eq!(
        first,
        json!({
            "input_ids": [[101, 13, 10, 102, 0, 0], [101, 10, 11, 12, 12, 102]],
            "attention_mask": [[1, 1, 1, 1, 0, 0], [1, 1, 1, 1, 1, 1]],
        })
    );

    let second: Value = serde_json::from_slice(payload_of(&sent[1])).unwrap();
    assert_eq!(
        second["input_ids"],
        json!([[101, 11, 102, 0, 0, 0], [0, 0, 0, 0, 0, 0]])
    );

    let stats = h.workers[0].stats().snapshot();
    assert_eq!(stats.element_errors, 1);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.tx_packets, 2);
}

#[test]
fn wrong_port_is_dropped_without_a_response() {
    let mut h = harness(1, 8, config(PayloadFormat::Raw, 8));
    h.device.inject(0, &request_to(68, b"hello")).unwrap();

    h.workers[0].poll_once();

    assert!(h.device.take_transmitted(0).unwrap().is_empty());
    let stats = h.workers[0].stats().snapshot();
    assert_eq!(stats.wrong_port, 1);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.tx_packets, 0);
}

#[test]
fn every_drop_reason_releases_its_buffer() {
    let mut h = harness(1, 16, config(PayloadFormat::Raw, 8));
    let mut wrong_protocol = request(b"x");
    wrong_protocol[12..14].copy_from_slice(&0x0800_u16.to_be_bytes());
    let mut bad_length = request(b"x");
    bad_length[18..20].copy_from_slice(&8_u16.to_be_bytes());

    h.device.inject(0, &[0_u8; 10]).unwrap();
    h.device.inject(0, &wrong_protocol).unwrap();
    h.device.inject(0, &request_to(99, b"x")).unwrap();
    h.device.inject(0, &bad_length).unwrap();
    h.device.inject(0, &request(b"ok")).unwrap();

    assert_eq!(h.workers[0].poll_once(), 5);

    let stats = h.workers[0].stats().snapshot();
    assert_eq!(
        (stats.malformed, stats.wrong_protocol, stats.wrong_port, stats.bad_length),
        (1, 1, 1, 1)
    );
    assert_eq!(stats.dropped, 4);
    assert_eq!(stats.tx_packets, 1);

    drop(h.device.take_transmitted(0).unwrap());
    assert_eq!(h.pool.available(), h.pool.capacity());
}

#[test]
fn partially_accepted_bursts_release_the_rest() {
    let mut h = harness(1, 16, config(PayloadFormat::Raw, 8));
    h.device.set_tx_limit(0, Some(2)).unwrap();
    for _ in 0..5 {
        h.device.inject(0, &request(b"hello")).unwrap();
    }

    assert_eq!(h.workers[0].poll_once(), 5);

    let stats = h.workers[0].stats().snapshot();
    assert_eq!(stats.tx_packets, 2);
    assert_eq!(stats.tx_rejected, 3);
    assert_eq!(stats.dropped, 3);
    assert_eq!(h.pool.in_use(), 2);

    assert_eq!(h.device.take_transmitted(0).unwrap().len(), 2);
    assert_eq!(h.pool.in_use(), 0);
}

#[test]
fn pool_exhaustion_drops_only_the_unanswerable_requests() {
    let mut h = harness(1, 3, config(PayloadFormat::Raw, 8));
    for _ in 0..3 {
        h.device.inject(0, &request(b"hello")).unwrap();
    }

    // The burst holds every buffer, so the first response cannot be
    // allocated. Each handled request frees its own buffer for the next one.
    assert_eq!(h.workers[0].poll_once(), 3);

    let stats = h.workers[0].stats().snapshot();
    assert_eq!(stats.pool_exhausted, 1);
    assert_eq!(stats.tx_packets, 2);

    drop(h.device.take_transmitted(0).unwrap());
    assert_eq!(h.pool.available(), 3);
}

#[test]
fn responses_follow_receive_order_within_a_queue() {
    let mut h = harness(1, 64, config(PayloadFormat::Raw, 4));
    let texts: [&[u8]; 4] = [b"h", b"e", b"l", b"o"];
    for text in texts {
        h.device.inject(0, &request(text)).unwrap();
    }

    h.workers[0].poll_once();

    let payloads: Vec<Vec<u8>> = h
        .device
        .take_transmitted(0)
        .unwrap()
        .iter()
        .map(|frame| payload_of(frame).to_vec())
        .collect();
    assert_eq!(
        payloads,
        vec![
            b"101 10 102".to_vec(),
            b"101 11 102".to_vec(),
            b"101 12 102".to_vec(),
            b"101 13 102".to_vec(),
        ]
    );
}

#[test]
fn bursts_are_capped_at_the_configured_size() {
    let config = WorkerConfig {
        burst_size: 2,
        ..config(PayloadFormat::Raw, 8)
    };
    let mut h = harness(1, 16, config);
    for _ in 0..5 {
        h.device.inject(0, &request(b"o")).unwrap();
    }

    assert_eq!(h.workers[0].poll_once(), 2);
    assert_eq!(h.workers[0].poll_once(), 2);
    assert_eq!(h.workers[0].poll_once(), 1);
    assert_eq!(h.workers[0].poll_once(), 0);
}

#[test]
fn queues_are_independent() {
    let mut h = harness(2, 16, config(PayloadFormat::Raw, 8));
    h.device.inject(1, &request(b"he")).unwrap();

    assert_eq!(h.workers[0].poll_once(), 0);
    assert_eq!(h.workers[1].poll_once(), 1);
    assert_eq!(h.workers[1].queue().queue_id(), 1);

    assert!(h.device.take_transmitted(0).unwrap().is_empty());
    assert_eq!(h.device.take_transmitted(1).unwrap().len(), 1);
    assert_eq!(h.workers[0].stats().snapshot(), StatsSnapshot::default());
}

#[test]
fn published_vocabulary_is_picked_up_at_the_next_burst() {
    let mut h = harness(1, 8, config(PayloadFormat::Raw, 8));
    h.device.inject(0, &request(b"hi")).unwrap();
    h.workers[0].poll_once();

    h.vocab
        .publish(Vocabulary::from_json_str(r#"{"h": 20, "i": 21}"#).unwrap());
    h.device.inject(0, &request(b"hi")).unwrap();
    h.workers[0].poll_once();

    let sent = h.device.take_transmitted(0).unwrap();
    assert_eq!(payload_of(&sent[0]), b"101 10 102");
    assert_eq!(payload_of(&sent[1]), b"101 20 21 102");
}

#[test]
fn oversized_requests_never_reach_the_tokenizer() {
    let config = WorkerConfig {
        codec: CodecConfig {
            max_packet_size: HEADERS_LEN + 4,
            ..CodecConfig::default()
        },
        ..config(PayloadFormat::Raw, 8)
    };
    let mut h = harness(1, 8, config);
    // A buffer-sized frame whose header claims more payload than allowed.
    let mut frame = request(b"1234");
    frame[18..20].copy_from_slice(&(8_u16 + 5).to_be_bytes());
    h.device.inject(0, &frame).unwrap();

    h.workers[0].poll_once();
    assert_eq!(h.workers[0].stats().snapshot().bad_length, 1);
}
