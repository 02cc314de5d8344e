//! Reconstructed-message display for the CLI.
//!
//! One-line summaries by default; full hex dumps behind a flag.

use crate::message::CapturedMessage;
use crate::protocol::Direction;

/// Print a one-line summary of a reconstructed message.
pub fn print_message_summary(index: u64, msg: &CapturedMessage) {
    let arrow = match msg.direction {
        Direction::Incoming => "->",
        Direction::Outgoing => "<-",
    };
    let id_hex = msg.id.simple().to_string();
    let marker = if msg.truncated { " [truncated]" } else { "" };

    println!(
        "#{:<6} {} {} {} {:>6}B  {}{}",
        index,
        format_timestamp(msg.created_at),
        arrow,
        &id_hex[..8],
        msg.bytes.len(),
        start_line(&msg.bytes),
        marker
    );
}

/// Print a detailed view of a reconstructed message, including hex dump.
pub fn print_message_detail(index: u64, msg: &CapturedMessage) {
    println!("{}", "=".repeat(80));
    print_message_summary(index, msg);
    println!("{}", "-".repeat(80));
    println!("  Exchange id: {}", msg.id);
    println!("  Direction:   {}", msg.direction);
    println!("  Peer:        {}", msg.peer_addr);
    println!("  Truncated:   {}", msg.truncated);
    println!("  Bytes ({}):", msg.bytes.len());
    print_hex_dump(&msg.bytes);
    println!();
}

/// The request or status line, lossily decoded.
fn start_line(bytes: &[u8]) -> String {
    let end = bytes
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(bytes.len().min(80));
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Print a hex dump with offsets, hex values, and ASCII representation.
fn print_hex_dump(data: &[u8]) {
    // Limit hex dump to first 512 bytes for readability
    let display_len = data.len().min(512);

    for offset in (0..display_len).step_by(16) {
        let end = (offset + 16).min(display_len);
        let chunk = &data[offset..end];

        print!("    {:04x}  ", offset);

        for (i, byte) in chunk.iter().enumerate() {
            print!("{:02x} ", byte);
            if i == 7 {
                print!(" ");
            }
        }

        for i in chunk.len()..16 {
            print!("   ");
            if i == 7 {
                print!(" ");
            }
        }

        print!(" |");
        for byte in chunk {
            if byte.is_ascii_graphic() || *byte == b' ' {
                print!("{}", *byte as char);
            } else {
                print!(".");
            }
        }
        println!("|");
    }

    if display_len < data.len() {
        println!("    ... ({} bytes remaining)", data.len() - display_len);
    }
}

/// Format a capture timestamp (seconds) into a readable time.
fn format_timestamp(ts: f64) -> String {
    let secs = ts as u64;
    let micros = ((ts - secs as f64) * 1_000_000.0) as u32;

    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    format!("{:02}:{:02}:{:02}.{:06}", hours, minutes, seconds, micros)
}
