pub mod engine;

pub use engine::{list_interfaces, open_source, CaptureError, PacketSource, SourceEvent};
