use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};
use wiretok::{
    CodecConfig, PayloadFormat, TokenId, TokenizerConfig, WorkerConfig,
    frame::{HEADERS_LEN, LINK_HEADER_LEN},
};

/// Command-line arguments for the tokenization server.
///
/// Every option can also be set through the environment (or a `.env` file).
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct CliArgs {
    /// JSON vocabulary file mapping tokens to integer ids.
    #[arg(long = "vocab", env = "VOCAB_PATH")]
    pub vocab: PathBuf,

    /// Number of queues; each gets its own socket and worker thread.
    #[arg(long = "queues", env = "NUM_QUEUES", default_value_t = 1)]
    pub queues: u32,

    /// Address the tunnel sockets bind to.
    #[arg(long = "bind-addr", env = "BIND_ADDR", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind_addr: IpAddr,

    /// Port of queue 0; queue `i` binds `base_port + i`. 0 picks ephemeral
    /// ports.
    #[arg(long = "base-port", env = "BASE_PORT", default_value_t = 6767)]
    pub base_port: u16,

    /// Link-layer protocol tag accepted on receive (decimal or 0x-prefixed).
    #[arg(long = "ether-type", env = "ETHER_TYPE", default_value = "0x88B5", value_parser = parse_u16)]
    pub ether_type: u16,

    /// Transport destination port accepted on receive.
    #[arg(long = "listen-port", env = "LISTEN_PORT", default_value_t = wiretok::frame::DEFAULT_LISTEN_PORT)]
    pub listen_port: u16,

    /// Protocol tag written into responses. Defaults to `--ether-type`.
    #[arg(long = "response-ether-type", env = "RESPONSE_ETHER_TYPE", value_parser = parse_u16)]
    pub response_ether_type: Option<u16>,

    /// Fixed width of every token sequence.
    #[arg(long = "max-seq-len", env = "MAX_SEQ_LEN", default_value_t = 512)]
    pub max_seq_len: usize,

    /// Begin-of-sequence sentinel id.
    #[arg(long = "begin-id", env = "BEGIN_ID", default_value_t = 101)]
    pub begin_id: TokenId,

    /// End-of-sequence sentinel id.
    #[arg(long = "end-id", env = "END_ID", default_value_t = 102)]
    pub end_id: TokenId,

    /// Largest frame accepted or produced, headers included.
    #[arg(long = "max-packet-size", env = "MAX_PACKET_SIZE", default_value_t = wiretok::frame::DEFAULT_MAX_PACKET_SIZE)]
    pub max_packet_size: usize,

    /// Maximum frames pulled per receive burst.
    #[arg(long = "burst-size", env = "BURST_SIZE", default_value_t = 64)]
    pub burst_size: usize,

    /// Packet buffers per queue.
    #[arg(long = "pool-size", env = "POOL_SIZE", default_value_t = 1024)]
    pub pool_size: usize,

    /// Request/response payload encoding.
    #[arg(long = "payload-format", env = "PAYLOAD_FORMAT", default_value_t = PayloadFormat::Raw)]
    pub payload_format: PayloadFormat,

    /// Seconds between statistics log lines; 0 disables them.
    #[arg(long = "stats-interval-secs", env = "STATS_INTERVAL_SECS", default_value_t = 10)]
    pub stats_interval_secs: u64,

    /// Log output format.
    #[arg(long = "log-format", env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("`{s}` is not a 16-bit value: {e}"))
}

/// Validated server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub vocab_path: PathBuf,
    pub queues: u16,
    pub bind_addr: IpAddr,
    pub base_port: u16,
    pub pool_size: usize,
    pub worker: WorkerConfig,
    pub stats_interval: Option<Duration>,
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Socket address of queue `queue`.
    pub fn queue_addr(&self, queue: u16) -> SocketAddr {
        let port = if self.base_port == 0 {
            0
        } else {
            self.base_port + queue
        };
        SocketAddr::new(self.bind_addr, port)
    }

    /// Whether there are more busy-polling workers than cores.
    pub fn oversubscribed(&self) -> bool {
        usize::from(self.queues) > num_cpus::get()
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let Ok(queues) = u16::try_from(args.queues) else {
            bail!("--queues must be at most {}, got {}", u16::MAX, args.queues);
        };
        if queues == 0 {
            bail!("--queues must be at least 1");
        }
        if args.base_port != 0 && u32::from(args.base_port) + u32::from(queues) - 1 > u32::from(u16::MAX) {
            bail!(
                "--base-port {} leaves no port for {} queues",
                args.base_port,
                queues
            );
        }
        if args.burst_size == 0 {
            bail!("--burst-size must be at least 1");
        }
        if args.pool_size < args.burst_size.saturating_mul(2) {
            bail!(
                "--pool-size ({}) must be at least twice --burst-size ({})",
                args.pool_size,
                args.burst_size
            );
        }
        if args.max_seq_len == 0 {
            bail!("--max-seq-len must be at least 1");
        }
        let max_frame = usize::from(u16::MAX) + LINK_HEADER_LEN;
        if !(HEADERS_LEN < args.max_packet_size && args.max_packet_size <= max_frame) {
            bail!(
                "--max-packet-size must be in {}..={max_frame}, got {}",
                HEADERS_LEN + 1,
                args.max_packet_size
            );
        }
        if args.begin_id == args.end_id {
            bail!("--begin-id and --end-id must differ");
        }
        if i32::try_from(args.begin_id).is_err() || i32::try_from(args.end_id).is_err() {
            bail!("sentinel ids must fit in a signed 32-bit integer");
        }

        Ok(Self {
            vocab_path: args.vocab,
            queues,
            bind_addr: args.bind_addr,
            base_port: args.base_port,
            pool_size: args.pool_size,
            worker: WorkerConfig {
                burst_size: args.burst_size,
                format: args.payload_format,
                codec: CodecConfig {
                    ether_type: args.ether_type,
                    listen_port: args.listen_port,
                    response_ether_type: args.response_ether_type.unwrap_or(args.ether_type),
                    max_packet_size: args.max_packet_size,
                },
                tokenizer: TokenizerConfig {
                    max_length: args.max_seq_len,
                    begin_id: args.begin_id,
                    end_id: args.end_id,
                },
            },
            stats_interval: (args.stats_interval_secs > 0)
                .then(|| Duration::from_secs(args.stats_interval_secs)),
            log_format: args.log_format,
        })
    }
}
