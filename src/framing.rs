//! Length-prefixed message boundaries over a byte stream.
//!
//! Every message is an 8-digit lower-case hexadecimal ASCII length,
//! left-zero-padded, followed by exactly that many payload bytes.

use std::io::{ErrorKind, Read, Write};

use tracing::trace;

use crate::error::{Result, SprocketError};

pub const PREFIX_LEN: usize = 8;
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub fn write_frame<W: Write + ?Sized>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(SprocketError::Connection(format!(
            "frame length {} exceeds allowed maximum {}",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }
    let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
    frame.extend_from_slice(format!("{:08x}", payload.len()).as_bytes());
    frame.extend_from_slice(payload);
    writer
        .write_all(&frame)
        .map_err(|err| SprocketError::Connection(format!("failed to write frame: {err}")))?;
    writer
        .flush()
        .map_err(|err| SprocketError::Connection(format!("failed to flush frame: {err}")))?;
    trace!(len = payload.len(), "wrote frame");
    Ok(())
}

pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>> {
    let mut prefix = [0u8; PREFIX_LEN];
    read_full(reader, &mut prefix, "length prefix")?;
    let text = std::str::from_utf8(&prefix)
        .map_err(|_| SprocketError::Connection("length prefix is not ascii".into()))?;
    let length = usize::from_str_radix(text, 16).map_err(|_| {
        SprocketError::Connection(format!("length prefix {text:?} is not hexadecimal"))
    })?;
    if length > MAX_FRAME_LEN {
        return Err(SprocketError::Connection(format!(
            "frame length {length} exceeds allowed maximum {MAX_FRAME_LEN}"
        )));
    }
    let mut payload = vec![0u8; length];
    read_full(reader, &mut payload, "payload")?;
    trace!(len = length, "read frame");
    Ok(payload)
}

/// Streams deliver frames in arbitrary chunks; keep reading until the full
/// count arrives, and treat EOF mid-frame as a transport fault.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(SprocketError::Connection(format!(
                    "connection closed after {filled} of {} {what} bytes",
                    buf.len()
                )));
            }
            Ok(count) => filled += count,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(SprocketError::Connection(format!(
                    "failed to read {what}: {err}"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    /// Read implementation that hands out one byte per call.
    struct Trickle<'a> {
        data: &'a [u8],
        position: usize,
    }

    impl<'a> Trickle<'a> {
        fn new(data: &'a [u8]) -> Self {
            Self { data, position: 0 }
        }
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.position >= self.data.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.data[self.position];
            self.position += 1;
            Ok(1)
        }
    }

    #[test]
    fn frame_round_trips_through_buffer() {
        let payload = b"l12:get-info-alllee".to_vec();
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &payload).expect("write succeeds");
        assert_eq!(&buffer[..PREFIX_LEN], format!("{:08x}", payload.len()).as_bytes());

        let mut cursor = Cursor::new(buffer);
        let read = read_frame(&mut cursor).expect("read succeeds");
        assert_eq!(read, payload);
    }

    #[test]
    fn reassembles_frames_from_single_byte_chunks() {
        let payload = vec![0u8, 1, 2, 3, 250, 251, 252, 253];
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &payload).expect("write succeeds");

        let mut trickle = Trickle::new(&buffer);
        let read = read_frame(&mut trickle).expect("read succeeds");
        assert_eq!(read, payload);
    }

    #[test]
    fn short_read_is_a_transport_fault() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"hello world").expect("write succeeds");
        buffer.truncate(buffer.len() - 4);

        let mut trickle = Trickle::new(&buffer);
        let err = read_frame(&mut trickle).expect_err("short read must fail");
        assert!(matches!(err, SprocketError::Connection(_)), "got {err:?}");
        assert!(err.to_string().contains("connection closed"), "got {err}");
    }

    #[test]
    fn rejects_bad_and_oversized_prefixes() {
        let mut garbage = Cursor::new(b"zzzzzzzz".to_vec());
        assert!(read_frame(&mut garbage).is_err());

        let mut oversized = Cursor::new(b"ffffffff".to_vec());
        let err = read_frame(&mut oversized).expect_err("oversized must fail");
        assert!(err.to_string().contains("maximum"), "got {err}");
    }

    #[test]
    fn refuses_to_write_oversized_frames() {
        let payload = vec![0u8; MAX_FRAME_LEN + 1];
        let mut buffer = Vec::new();
        assert!(write_frame(&mut buffer, &payload).is_err());
    }
}
