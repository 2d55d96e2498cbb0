//! # Line and Packet Framing
//!
//! Purpose: Encode requests and split node replies into lines and packets
//! without knowing anything about sockets.
//!
//! ## Design Principles
//! 1. **Reader-Generic**: Everything works over `BufRead`, so framing is tested
//!    against in-memory cursors.
//! 2. **Buffer Reuse**: Caller provides the byte buffer used for each line.
//! 3. **Fail Fast**: EOF inside a packet is an error, never a short packet.
//!
//! ## Wire Shape
//!
//! ```text
//! request:  COMMAND [ARG]\n
//! line:     text\n          (version, list)
//! packet:   text\n ... .\n  (config, fetch, nodes)
//! ```

use std::io::BufRead;

use crate::error::{NodeError, NodeResult};

/// Line whose trimmed content terminates a packet.
pub const PACKET_SENTINEL: &str = ".";

/// Encodes one request line into the provided buffer.
///
/// Surrounding whitespace is dropped; an embedded line break would split the
/// request in two on the wire and is rejected.
pub fn encode_command(command: &str, out: &mut Vec<u8>) -> NodeResult<()> {
    let command = command.trim();
    if command.contains(['\n', '\r']) {
        return Err(NodeError::InvalidArgument(format!(
            "command contains a line break: {:?}",
            command
        )));
    }
    out.clear();
    out.extend_from_slice(command.as_bytes());
    out.push(b'\n');
    Ok(())
}

/// Reads the next line, stripped of `\n` and an optional preceding `\r`.
///
/// EOF before any byte is a connection error.
pub fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> NodeResult<String> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(NodeError::peer_closed());
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf.clone())
        .map_err(|_| NodeError::Protocol("reply line is not valid UTF-8".to_string()))
}

/// Reads lines until the `.` sentinel; the sentinel is consumed but not
/// returned. Nothing past the sentinel is read.
pub fn read_packet<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> NodeResult<Vec<String>> {
    let mut lines = Vec::new();
    loop {
        let line = read_line(reader, buf)?;
        if line.trim() == PACKET_SENTINEL {
            return Ok(lines);
        }
        lines.push(line);
    }
}
