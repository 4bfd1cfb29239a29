//! Random-Access Stream Abstraction
//!
//! The host hands media to the core either as a URI the decode library can
//! open on its own, or as an opaque random-access stream. This module defines
//! the latter: a synchronous, seekable byte source the core reads from on
//! whatever thread a pull request arrives on.
//!
//! Two ready-made implementations are provided:
//! - [`MemoryStream`] over an in-memory [`Bytes`] buffer
//! - [`FileStream`] over a [`std::fs::File`]

use bytes::Bytes;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{BridgeError, Result};

/// Synchronous random-access byte source provided by the host.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::stream::{MemoryStream, RandomAccessStream};
/// use std::io::SeekFrom;
///
/// let mut stream = MemoryStream::new(bytes::Bytes::from_static(b"RIFF...."));
/// let mut header = [0u8; 4];
/// stream.read(&mut header)?;
/// stream.seek(SeekFrom::Start(0))?;
/// ```
pub trait RandomAccessStream: Send {
    /// Read up to `buf.len()` bytes. Returns `0` at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Move the read position and return the new absolute offset.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Total size of the stream in bytes.
    fn size(&self) -> Result<u64>;

    /// Short human-readable description used in diagnostics.
    fn description(&self) -> String {
        "host stream".to_string()
    }
}

impl<T: RandomAccessStream + ?Sized> RandomAccessStream for Box<T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        (**self).seek(pos)
    }

    fn size(&self) -> Result<u64> {
        (**self).size()
    }

    fn description(&self) -> String {
        (**self).description()
    }
}

/// In-memory stream over shared bytes.
#[derive(Debug, Clone)]
pub struct MemoryStream {
    data: Bytes,
    position: u64,
}

impl MemoryStream {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

impl RandomAccessStream for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let len = self.data.len() as u64;
        if self.position >= len {
            return Ok(0);
        }
        let start = self.position as usize;
        let count = buf.len().min(self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        self.position += count as u64;
        Ok(count)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let len = self.data.len() as i128;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => len + delta as i128,
        };
        if target < 0 {
            return Err(BridgeError::OperationFailed(format!(
                "seek before start of stream: {}",
                target
            )));
        }
        self.position = target as u64;
        Ok(self.position)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn description(&self) -> String {
        format!("memory stream ({} bytes)", self.data.len())
    }
}

/// Stream over a local file.
#[derive(Debug)]
pub struct FileStream {
    file: File,
    label: String,
}

impl FileStream {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self {
            file,
            label: path.display().to_string(),
        })
    }

    pub fn from_file(file: File) -> Self {
        Self {
            file,
            label: "file".to_string(),
        }
    }
}

impl RandomAccessStream for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file.seek(pos)?)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn description(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stream_reads_until_end() {
        let mut stream = MemoryStream::new(Bytes::from_static(b"abcdef"));
        let mut buf = [0u8; 4];

        assert_eq!(stream.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(stream.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn memory_stream_seek_variants() {
        let mut stream = MemoryStream::new(Bytes::from_static(b"0123456789"));

        assert_eq!(stream.seek(SeekFrom::Start(4)).unwrap(), 4);
        assert_eq!(stream.seek(SeekFrom::Current(2)).unwrap(), 6);
        assert_eq!(stream.seek(SeekFrom::End(-1)).unwrap(), 9);
        assert!(stream.seek(SeekFrom::Current(-20)).is_err());
        assert_eq!(stream.size().unwrap(), 10);
    }

    #[test]
    fn memory_stream_read_past_end_is_eof() {
        let mut stream = MemoryStream::new(Bytes::from_static(b"xy"));
        stream.seek(SeekFrom::Start(10)).unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }
}
