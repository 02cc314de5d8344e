//! Packet source: opens a pcap handle per the configured engine and yields
//! raw frames to feed the dispatcher's packet queue.

use pcap::{Active, Capture, Device, Offline};
use std::fmt;

use crate::config::{CaptureConfig, Engine};

/// Errors from the capture engine.
#[derive(Debug)]
pub enum CaptureError {
    /// Failed to find a suitable network device.
    NoDevice(String),
    /// pcap error.
    Pcap(pcap::Error),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::NoDevice(msg) => write!(f, "no capture device: {}", msg),
            CaptureError::Pcap(e) => write!(f, "pcap error: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<pcap::Error> for CaptureError {
    fn from(e: pcap::Error) -> Self {
        CaptureError::Pcap(e)
    }
}

/// One read from a packet source.
#[derive(Debug)]
pub enum SourceEvent {
    /// A captured frame, starting at the link layer.
    Frame(Vec<u8>),
    /// Read timeout elapsed with no traffic; try again.
    Idle,
    /// Offline replay reached the end of the file.
    Eof,
}

/// An open capture handle, live or offline.
pub enum PacketSource {
    Live(Capture<Active>),
    File(Capture<Offline>),
}

impl PacketSource {
    /// Read the next frame. Non-fatal conditions (read timeout, end of a
    /// replay file) are reported as events, everything else is an error.
    pub fn next_event(&mut self) -> Result<SourceEvent, CaptureError> {
        let result = match self {
            PacketSource::Live(cap) => cap.next_packet(),
            PacketSource::File(cap) => cap.next_packet(),
        };
        match result {
            Ok(packet) => Ok(SourceEvent::Frame(packet.data.to_vec())),
            Err(pcap::Error::TimeoutExpired) => Ok(SourceEvent::Idle),
            Err(pcap::Error::NoMorePackets) => Ok(SourceEvent::Eof),
            Err(e) => Err(CaptureError::Pcap(e)),
        }
    }
}

/// List all available network interfaces.
pub fn list_interfaces() -> Result<Vec<Device>, CaptureError> {
    Device::list().map_err(CaptureError::Pcap)
}

/// Open the packet source described by the capture configuration and
/// restrict it to TCP traffic on the monitored port.
pub fn open_source(config: &CaptureConfig) -> Result<PacketSource, CaptureError> {
    let filter = format!("tcp port {}", config.port);

    match config.engine {
        Engine::PcapFile => {
            let path = config.device.as_deref().ok_or_else(|| {
                CaptureError::NoDevice("pcap_file engine needs device = <path>".into())
            })?;
            let mut cap = Capture::from_file(path).map_err(CaptureError::Pcap)?;
            cap.filter(&filter, true).map_err(CaptureError::Pcap)?;

            tracing::info!(file = %path, filter = %filter, "replaying capture file");
            Ok(PacketSource::File(cap))
        }
        Engine::LiveCapture | Engine::AfPacket => {
            let device = match &config.device {
                Some(name) => {
                    let devices = Device::list().map_err(CaptureError::Pcap)?;
                    devices
                        .into_iter()
                        .find(|d| d.name == *name)
                        .ok_or_else(|| {
                            CaptureError::NoDevice(format!("interface '{}' not found", name))
                        })?
                }
                None => Device::lookup()
                    .map_err(CaptureError::Pcap)?
                    .ok_or_else(|| CaptureError::NoDevice("no default device found".into()))?,
            };

            let device_name = device.name.clone();

            let inactive = Capture::from_device(device)
                .map_err(CaptureError::Pcap)?
                .promisc(config.promiscuous)
                .snaplen(config.snaplen)
                .timeout(config.timeout_ms);

            // The afpacket engine asks libpcap's AF_PACKET backend to hand
            // frames over as they arrive instead of per-buffer.
            let inactive = if config.engine == Engine::AfPacket {
                inactive.immediate_mode(true)
            } else {
                inactive
            };

            let mut cap = inactive.open().map_err(CaptureError::Pcap)?;
            cap.filter(&filter, true).map_err(CaptureError::Pcap)?;

            tracing::info!(
                interface = %device_name,
                engine = %config.engine,
                promiscuous = config.promiscuous,
                snaplen = config.snaplen,
                filter = %filter,
                "capture started"
            );

            Ok(PacketSource::Live(cap))
        }
    }
}
