//! Byte-level helpers shared by the framing calls and the relay.

use anyhow::{anyhow, Result};
use std::io::{self, ErrorKind, Write};
use std::thread;
use std::time::Duration;

pub(super) fn should_retry_read_error(err: &io::Error) -> bool {
    err.kind() == ErrorKind::Interrupted
}

pub(super) fn is_would_block(err: &io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
}

/// Split off a trailing UTF-8 sequence that is still missing continuation bytes.
///
/// Returns the incomplete tail so it can be prepended to the next chunk. Invalid or
/// complete endings are left alone; lossy decoding handles those.
pub(super) fn split_incomplete_utf8(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let window = buffer.len().saturating_sub(4);
    let lead_idx = buffer[window..]
        .iter()
        .rposition(|b| b & 0xC0 != 0x80)
        .map(|idx| idx + window)?;
    let expected = match buffer[lead_idx] {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return None,
    };
    if lead_idx + expected > buffer.len() {
        return Some(buffer.split_off(lead_idx));
    }
    None
}

pub(super) fn decode_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Attempt a single write without retry loops.
pub(super) fn try_write<W: Write + ?Sized>(stream: &mut W, data: &[u8]) -> io::Result<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    let written = stream.write(data)?;
    if written == 0 {
        return Err(io::Error::new(ErrorKind::WriteZero, "stream write returned 0"));
    }
    Ok(written)
}

/// Write the entire buffer, retrying short writes and transient would-block results.
pub(super) fn write_all<W: Write + ?Sized>(stream: &mut W, mut data: &[u8]) -> Result<()> {
    while !data.is_empty() {
        let written = match try_write(stream, data) {
            Ok(written) => written,
            Err(err) => {
                if err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
                if err.kind() == ErrorKind::WriteZero {
                    return Err(anyhow!("stream write returned 0"));
                }
                return Err(anyhow!("stream write failed: {err}"));
            }
        };
        data = data.get(written..).unwrap_or(&[]);
    }
    stream
        .flush()
        .map_err(|err| anyhow!("stream flush failed: {err}"))
}
