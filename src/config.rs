use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "config io error: {}", err),
            ConfigError::Parse(err) => write!(f, "config parse error: {}", err),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub core: CoreConfig,
    pub output: OutputConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&raw).map_err(ConfigError::Parse)
    }
}

/// How packets are acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// Buffered live capture from a device.
    LiveCapture,
    /// Live capture with immediate per-frame delivery (AF_PACKET path).
    AfPacket,
    /// Offline replay of a capture file.
    PcapFile,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::LiveCapture => write!(f, "live_capture"),
            Engine::AfPacket => write!(f, "afpacket"),
            Engine::PcapFile => write!(f, "pcap_file"),
        }
    }
}

impl FromStr for Engine {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live_capture" => Ok(Engine::LiveCapture),
            "afpacket" => Ok(Engine::AfPacket),
            "pcap_file" => Ok(Engine::PcapFile),
            other => Err(ConfigError::Invalid(format!(
                "unknown engine '{}' (expected live_capture, afpacket, or pcap_file)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub engine: Engine,
    /// Interface name, or the capture file path for the pcap_file engine.
    pub device: Option<String>,
    /// The monitored TCP port.
    pub port: u16,
    pub promiscuous: bool,
    pub snaplen: i32,
    pub timeout_ms: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            engine: Engine::LiveCapture,
            device: None,
            port: 80,
            promiscuous: true,
            snaplen: 65535,
            timeout_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// How long a message buffer may keep accumulating before it is
    /// flushed best-effort, in milliseconds.
    pub expiration_ms: u64,
    pub packet_queue_capacity: usize,
    pub message_queue_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            expiration_ms: 2000,
            packet_queue_capacity: 8192,
            message_queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OutputConfig {
    /// Print full hex dumps of reconstructed messages.
    pub hex_dump: bool,
    /// Only print the end-of-run summary.
    pub quiet: bool,
}
