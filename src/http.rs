//! HTTP/1.x boundary detection over a partially reassembled byte stream.
//!
//! Everything here operates on the contiguous assembled prefix of a
//! message buffer and answers one question: is this a complete HTTP
//! message yet, and under which body framing? The detector never mutates
//! the stream; `100 Continue` preambles are reported as a skip length the
//! emitter slices past.

use crate::protocol::Direction;

/// Body framing detected from the headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyMode {
    /// Headers not yet terminated.
    #[default]
    Unknown,
    /// No body follows the headers.
    None,
    /// `Content-Length: N`.
    Length(usize),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Request carrying `Expect: 100-continue`; the body arrives in a
    /// second phase but is framed by Content-Length or chunking as usual.
    ContinuePending,
}

/// Completeness decision for an assembled prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    /// Headers unterminated, or body still short of its framing.
    Incomplete,
    /// The message is fully present.
    Complete,
    /// Headers done; the body runs until the flow closes or expires.
    UntilClose,
    /// A `100 Continue` preamble with no real response behind it yet.
    /// Never emitted on its own.
    Preamble,
}

/// Result of inspecting an assembled prefix.
#[derive(Debug, Clone, Copy)]
pub struct Verdict {
    pub mode: BodyMode,
    pub status: Completeness,
    /// Bytes to slice off the front on emission (a discarded preamble).
    pub skip: usize,
}

impl Verdict {
    fn incomplete() -> Self {
        Verdict {
            mode: BodyMode::Unknown,
            status: Completeness::Incomplete,
            skip: 0,
        }
    }
}

/// Inspect an assembled prefix for completeness.
///
/// `response_to_bodyless` marks a response whose paired request had no
/// body (GET-class): such a response is complete at its header terminator
/// even without Content-Length or chunking.
pub fn inspect(data: &[u8], direction: Direction, response_to_bodyless: bool) -> Verdict {
    match direction {
        Direction::Incoming => inspect_request(data),
        Direction::Outgoing => inspect_response(data, response_to_bodyless),
    }
}

fn inspect_request(data: &[u8]) -> Verdict {
    // A buffer that does not open with a method is a mid-stream fragment
    // still waiting for its headers to arrive (or be merged in).
    if !is_request_start(data) {
        return Verdict::incomplete();
    }
    let Some(header_end) = headers_end(data) else {
        return Verdict::incomplete();
    };
    let Some(headers) = std::str::from_utf8(&data[..header_end]).ok() else {
        return Verdict::incomplete();
    };
    let body = &data[header_end..];

    let framing = body_framing(headers);
    let complete = match framing {
        BodyMode::Chunked => has_chunked_terminator(body),
        BodyMode::Length(n) => body.len() >= n,
        _ => true,
    };

    // The body of an Expect: 100-continue request is still framed by the
    // declared length or chunking; it is complete as soon as the body has
    // arrived, whether or not a 100 Continue was ever observed.
    let mode = if has_expect_continue(headers) {
        BodyMode::ContinuePending
    } else {
        framing
    };

    Verdict {
        mode,
        status: if complete {
            Completeness::Complete
        } else {
            Completeness::Incomplete
        },
        skip: 0,
    }
}

fn inspect_response(data: &[u8], response_to_bodyless: bool) -> Verdict {
    if !is_response_start(data) {
        return Verdict::incomplete();
    }
    if is_continue_preamble(data) {
        // The real response may already be concatenated behind the
        // preamble when the two shared an ack.
        if let Some(pos) = next_response_start(data) {
            let inner = inspect_response(&data[pos..], response_to_bodyless);
            return Verdict {
                skip: pos + inner.skip,
                ..inner
            };
        }
        return Verdict {
            mode: BodyMode::None,
            status: Completeness::Preamble,
            skip: 0,
        };
    }

    let Some(header_end) = headers_end(data) else {
        return Verdict::incomplete();
    };
    let Some(headers) = std::str::from_utf8(&data[..header_end]).ok() else {
        return Verdict::incomplete();
    };
    let body = &data[header_end..];

    let mode = body_framing(headers);
    let status = match mode {
        BodyMode::Chunked => {
            if has_chunked_terminator(body) {
                Completeness::Complete
            } else {
                Completeness::Incomplete
            }
        }
        BodyMode::Length(n) => {
            if body.len() >= n {
                Completeness::Complete
            } else {
                Completeness::Incomplete
            }
        }
        _ => {
            if response_to_bodyless {
                Completeness::Complete
            } else {
                Completeness::UntilClose
            }
        }
    };

    Verdict { mode, status, skip: 0 }
}

/// Does the stream open with an HTTP/1.x request line?
pub fn is_request_start(data: &[u8]) -> bool {
    data.starts_with(b"GET ")
        || data.starts_with(b"POST ")
        || data.starts_with(b"PUT ")
        || data.starts_with(b"DELETE ")
        || data.starts_with(b"HEAD ")
        || data.starts_with(b"OPTIONS ")
        || data.starts_with(b"PATCH ")
        || data.starts_with(b"CONNECT ")
}

/// Does the stream open with an HTTP/1.x status line?
pub fn is_response_start(data: &[u8]) -> bool {
    data.starts_with(b"HTTP/1.")
}

/// Position just past the `\r\n\r\n` header terminator, if present.
fn headers_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn body_framing(headers: &str) -> BodyMode {
    if let Some(te) = header_value(headers, "Transfer-Encoding") {
        if te.to_ascii_lowercase().contains("chunked") {
            return BodyMode::Chunked;
        }
    }
    if let Some(cl) = header_value(headers, "Content-Length") {
        if let Ok(n) = cl.parse::<usize>() {
            return BodyMode::Length(n);
        }
    }
    BodyMode::None
}

fn header_value<'a>(headers: &'a str, name: &str) -> Option<&'a str> {
    for line in headers.lines() {
        if let Some((key, value)) = line.split_once(':') {
            if key.eq_ignore_ascii_case(name) {
                return Some(value.trim());
            }
        }
    }
    None
}

fn has_expect_continue(headers: &str) -> bool {
    header_value(headers, "Expect")
        .map(|v| v.eq_ignore_ascii_case("100-continue"))
        .unwrap_or(false)
}

/// Terminating `0\r\n\r\n` chunk anywhere in the body.
fn has_chunked_terminator(body: &[u8]) -> bool {
    body.windows(5).any(|w| w == b"0\r\n\r\n")
}

/// Does the stream open with an interim `HTTP/1.x 100` status line?
pub fn is_continue_preamble(data: &[u8]) -> bool {
    const PREFIX: &[u8] = b"HTTP/1.";
    if data.len() < PREFIX.len() + 5 || !data.starts_with(PREFIX) {
        return false;
    }
    // "HTTP/1.x 100" followed by space or CR
    let rest = &data[PREFIX.len() + 1..];
    rest.starts_with(b" 100") && rest.get(4).map_or(true, |b| *b == b' ' || *b == b'\r')
}

/// First `HTTP/1.` line start after the opening one, marking where a real
/// response begins behind a preamble.
fn next_response_start(data: &[u8]) -> Option<usize> {
    data.windows(7)
        .skip(1)
        .position(|w| w == b"HTTP/1.")
        .map(|p| p + 1)
}

/// Headers are terminated and the method takes no body (absent an explicit
/// Content-Length or chunked framing).
pub fn request_has_no_body(data: &[u8]) -> bool {
    let Some(header_end) = headers_end(data) else {
        return false;
    };
    let Some(headers) = std::str::from_utf8(&data[..header_end]).ok() else {
        return false;
    };
    let bodyless_method = data.starts_with(b"GET ")
        || data.starts_with(b"HEAD ")
        || data.starts_with(b"OPTIONS ")
        || data.starts_with(b"DELETE ");
    bodyless_method && body_framing(headers) == BodyMode::None
}

/// Whether the header section carries `Expect: 100-continue`.
pub fn has_expect_header(data: &[u8]) -> bool {
    let end = headers_end(data).unwrap_or(data.len());
    std::str::from_utf8(&data[..end])
        .map(has_expect_continue)
        .unwrap_or(false)
}

/// Remove the `Expect` header line so the emitted request reads as a
/// normal one-phase message. Works on unterminated header sections too,
/// for truncated emissions.
pub fn strip_expect(data: &[u8]) -> Vec<u8> {
    let header_len = headers_end(data).unwrap_or(data.len());
    let mut out = Vec::with_capacity(data.len());
    let mut pos = 0;
    while pos < header_len {
        let line_end = data[pos..header_len]
            .windows(2)
            .position(|w| w == b"\r\n")
            .map(|p| pos + p + 2)
            .unwrap_or(header_len);
        let line = &data[pos..line_end];
        if !is_expect_line(line) {
            out.extend_from_slice(line);
        }
        pos = line_end;
    }
    out.extend_from_slice(&data[header_len..]);
    out
}

fn is_expect_line(line: &[u8]) -> bool {
    let Ok(s) = std::str::from_utf8(line) else {
        return false;
    };
    match s.split_once(':') {
        Some((key, _)) => key.trim().eq_ignore_ascii_case("expect"),
        None => false,
    }
}
