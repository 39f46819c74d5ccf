//! Buffered reads from a blocking `TcpStream`.
//!
//! Decoding a message that is still incomplete means parsing it again from
//! its first byte once more data arrives. `fill` keeps taking bytes that are
//! already queued on the socket until the buffer has doubled, so a large
//! message is decoded a logarithmic number of times instead of once per
//! read.

use bytes::BytesMut;
use std::io::{self, Read};
use std::net::TcpStream;

/// Read chunk size
pub(crate) const READ_CHUNK: usize = 8 * 1024;

/// Block until some bytes arrive, then append whatever else is already
/// queued until `buffer` holds `target` bytes.
///
/// Returns the number of bytes appended. Zero means the peer closed the
/// connection.
pub(crate) fn fill(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    target: usize,
) -> io::Result<usize> {
    let mut chunk = [0u8; READ_CHUNK];
    let n = stream.read(&mut chunk)?;
    if n == 0 {
        return Ok(0);
    }
    buffer.extend_from_slice(&chunk[..n]);

    stream.set_nonblocking(true)?;
    let drained = drain(stream, buffer, target, &mut chunk);
    stream.set_nonblocking(false)?;
    Ok(n + drained?)
}

fn drain(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    target: usize,
    chunk: &mut [u8],
) -> io::Result<usize> {
    let mut total = 0;
    while buffer.len() < target {
        match stream.read(chunk) {
            // EOF shows up again on the next blocking read
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                total += n;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Buffer length to reach before an incomplete message of `buffered` bytes
/// is decoded again, never more than `limit`.
pub(crate) fn next_target(buffered: usize, limit: usize) -> usize {
    buffered.saturating_mul(2).max(READ_CHUNK).min(limit)
}
