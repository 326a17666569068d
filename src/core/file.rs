//! # File Framing
//!
//! Synchronous reader and writer for framing units stored back to back in a
//! file, using exactly the socket wire format.
//!
//! The writer always appends, so a file may be built up across any number of
//! open/close cycles. The reader distinguishes a clean end (no bytes left
//! where a length prefix would start) from a truncated unit, which is
//! reported as [`ProtocolError::CorruptData`].

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::codec::{FrameCodec, LENGTH_PREFIX};
use crate::core::payload::Payload;
use crate::error::constants::{ERR_TRUNCATED_BODY, ERR_TRUNCATED_LENGTH};
use crate::error::{ProtocolError, Result};

/// Appends framing units to a file
pub struct FrameFileWriter {
    inner: BufWriter<File>,
    units_written: u64,
}

impl FrameFileWriter {
    /// Open `path` for appending, creating it if needed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.as_ref().display(), "Opened frame file for append");
        Ok(Self {
            inner: BufWriter::new(file),
            units_written: 0,
        })
    }

    /// Append one unit
    pub fn append(&mut self, payload: &Payload) -> Result<()> {
        self.append_all(std::slice::from_ref(payload))
    }

    /// Append a batch of units; nothing is written if any payload is oversized
    pub fn append_all(&mut self, payloads: &[Payload]) -> Result<()> {
        let buf = FrameCodec::serialize(payloads)?;
        self.inner.write_all(&buf)?;
        self.units_written += payloads.len() as u64;
        Ok(())
    }

    /// Units appended through this writer
    pub fn units_written(&self) -> u64 {
        self.units_written
    }

    /// Flush buffered units to the file
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

impl Drop for FrameFileWriter {
    fn drop(&mut self) {
        if let Err(e) = self.inner.flush() {
            warn!(error = %e, "Failed to flush frame file on close");
        }
    }
}

/// Reads framing units sequentially from a file or any reader
pub struct FrameFileReader<R: Read = BufReader<File>> {
    inner: R,
}

impl FrameFileReader<BufReader<File>> {
    /// Open `path` for reading from the first unit
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: Read> FrameFileReader<R> {
    pub fn from_reader(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next unit.
    ///
    /// Returns `Ok(None)` at exact end of data. Keep-alive units are skipped.
    pub fn read_next(&mut self) -> Result<Option<Payload>> {
        loop {
            let mut prefix = [0u8; LENGTH_PREFIX];
            match read_full(&mut self.inner, &mut prefix)? {
                0 => return Ok(None),
                LENGTH_PREFIX => {}
                _ => return Err(ProtocolError::CorruptData(ERR_TRUNCATED_LENGTH)),
            }

            let len = u16::from_le_bytes(prefix) as usize;
            if len == 0 {
                continue;
            }

            let mut unit = vec![0u8; len];
            if read_full(&mut self.inner, &mut unit)? != len {
                return Err(ProtocolError::CorruptData(ERR_TRUNCATED_BODY));
            }

            let opcode = unit[0];
            return Ok(Some(Payload {
                opcode,
                body: Bytes::from(unit).slice(1..),
            }));
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Iterator for FrameFileReader<R> {
    type Item = Result<Payload>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

/// Fill `buf` as far as the reader allows, returning how many bytes arrived.
/// Stops short only at end of data.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_units_from_memory() {
        let reader = FrameFileReader::from_reader(Cursor::new(vec![1u8, 0, 1, 2, 0, 1, 2]));
        let units: Vec<Payload> = reader.map(|r| r.unwrap()).collect();
        assert_eq!(units, vec![Payload::empty(1), Payload::new(1, vec![2u8])]);
    }

    #[test]
    fn single_stray_byte_is_a_truncated_length() {
        let mut reader = FrameFileReader::from_reader(Cursor::new(vec![1u8, 0, 1, 7]));
        assert_eq!(reader.read_next().unwrap(), Some(Payload::empty(1)));
        assert!(matches!(
            reader.read_next(),
            Err(ProtocolError::CorruptData(ERR_TRUNCATED_LENGTH))
        ));
    }

    #[test]
    fn keepalive_units_are_skipped() {
        let mut reader = FrameFileReader::from_reader(Cursor::new(vec![0u8, 0, 1, 0, 4, 0, 0]));
        assert_eq!(reader.read_next().unwrap(), Some(Payload::empty(4)));
        assert_eq!(reader.read_next().unwrap(), None);
    }
}
