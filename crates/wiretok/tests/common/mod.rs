#![allow(dead_code)]

use std::sync::Arc;
use wiretok::{
    FrameHeader, HwAddr, PacketPool, Vocabulary, VocabularyCell, Worker, WorkerConfig,
    frame::{DEFAULT_ETHER_TYPE, DEFAULT_LISTEN_PORT, HEADERS_LEN},
    io::{LoopbackDevice, LoopbackQueue},
};

pub const CLIENT: HwAddr = HwAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
pub const SERVER: HwAddr = HwAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
pub const CLIENT_PORT: u16 = 40_000;

pub const HELLO_VOCAB: &str = r#"{"h": 10, "e": 11, "l": 12, "o": 13}"#;

pub fn vocab_cell(json: &str) -> Arc<VocabularyCell> {
    Arc::new(VocabularyCell::new(Vocabulary::from_json_str(json).unwrap()))
}

pub fn request_to(dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0; HEADERS_LEN + payload.len()];
    let len = FrameHeader {
        dst_addr: SERVER,
        src_addr: CLIENT,
        ether_type: DEFAULT_ETHER_TYPE,
        src_port: CLIENT_PORT,
        dst_port,
    }
    .encode(payload, &mut frame, usize::MAX)
    .unwrap();
    frame.truncate(len);
    frame
}

pub fn request(payload: &[u8]) -> Vec<u8> {
    request_to(DEFAULT_LISTEN_PORT, payload)
}

pub fn payload_of(frame: &[u8]) -> &[u8] {
    &frame[HEADERS_LEN..]
}

pub struct Harness {
    pub device: LoopbackDevice,
    pub pool: PacketPool,
    pub vocab: Arc<VocabularyCell>,
    pub workers: Vec<Worker<LoopbackQueue>>,
}

/// A loopback device with one worker per queue, sharing `pool_size` buffers.
pub fn harness(queues: u16, pool_size: usize, config: WorkerConfig) -> Harness {
    let pool = PacketPool::new(pool_size, config.codec.max_packet_size);
    let device = LoopbackDevice::new(queues, pool.clone());
    let vocab = vocab_cell(HELLO_VOCAB);
    let workers = device
        .queues()
        .into_iter()
        .map(|queue| Worker::new(queue, pool.clone(), Arc::clone(&vocab), &config))
        .collect();
    Harness {
        device,
        pool,
        vocab,
        workers,
    }
}
