use clap::Parser;
use std::path::PathBuf;

/// httptap: passive HTTP/1.x request/response capture on one TCP port
#[derive(Parser, Debug)]
#[command(name = "httptap", version, about)]
pub struct Cli {
    /// Path to a TOML config file; CLI flags override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// TCP port to monitor
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Capture engine: live_capture, afpacket, or pcap_file
    #[arg(short, long)]
    pub engine: Option<String>,

    /// Interface name (or capture file path with --engine pcap_file)
    #[arg(short = 'i', long)]
    pub device: Option<String>,

    /// Message expiration interval in milliseconds
    #[arg(long)]
    pub expiration_ms: Option<u64>,

    /// Capacity of the raw packet queue
    #[arg(long)]
    pub packet_queue: Option<usize>,

    /// Capacity of the reconstructed message queue
    #[arg(long)]
    pub message_queue: Option<usize>,

    /// Snapshot length (max bytes per captured frame)
    #[arg(short, long)]
    pub snaplen: Option<i32>,

    /// Read timeout in milliseconds for the capture handle
    #[arg(short = 't', long)]
    pub timeout_ms: Option<i32>,

    /// Disable promiscuous mode
    #[arg(long)]
    pub no_promiscuous: bool,

    /// Show full hex dumps of reconstructed messages
    #[arg(long)]
    pub hex_dump: bool,

    /// Only print the end-of-run summary
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// List available network interfaces and exit
    #[arg(short, long)]
    pub list_interfaces: bool,
}
