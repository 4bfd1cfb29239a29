//! # Byte-Source Adapter
//!
//! Exposes a host [`RandomAccessStream`] as the read/seek callbacks a demuxer
//! pulls from.
//!
//! The adapter shares the host handle instead of owning it: dropping the
//! adapter (or the demuxer holding it) never closes the host's stream.

use crate::error::Result;
use bridge_traits::RandomAccessStream;
use parking_lot::Mutex;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::{debug, warn};

/// Host byte source shared between the host and the adapter.
pub type SharedStream = Arc<Mutex<dyn RandomAccessStream>>;

/// Wrap a host stream so it can be handed to [`ByteSourceAdapter`].
pub fn shared_stream<S: RandomAccessStream + 'static>(stream: S) -> SharedStream {
    Arc::new(Mutex::new(stream))
}

/// Result of a read callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    Eof,
}

/// Seek request from the demuxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start(u64),
    Current(i64),
    End(i64),
    /// Report the total size without moving.
    Size,
}

/// Synchronous read/seek adapter over a shared host stream.
pub struct ByteSourceAdapter {
    stream: SharedStream,
    capacity: usize,
}

impl ByteSourceAdapter {
    /// `capacity` bounds the bytes transferred per read callback.
    pub fn new(stream: SharedStream, capacity: usize) -> Self {
        Self {
            stream,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn description(&self) -> String {
        self.stream.lock().description()
    }

    /// Fill `buf` with up to `capacity` bytes.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let len = buf.len().min(self.capacity);
        if len == 0 {
            return Ok(ReadOutcome::Data(0));
        }

        let read = self.stream.lock().read(&mut buf[..len]).map_err(|e| {
            warn!("Byte source read failed: {}", e);
            e
        })?;

        if read == 0 {
            Ok(ReadOutcome::Eof)
        } else {
            Ok(ReadOutcome::Data(read))
        }
    }

    /// Move the read position, or report the size for [`Whence::Size`].
    pub fn seek_to(&mut self, whence: Whence) -> Result<u64> {
        let mut stream = self.stream.lock();
        let result = match whence {
            Whence::Size => stream.size(),
            Whence::Start(offset) => stream.seek(SeekFrom::Start(offset)),
            Whence::Current(delta) => stream.seek(SeekFrom::Current(delta)),
            Whence::End(delta) => stream.seek(SeekFrom::End(delta)),
        };
        result.map_err(|e| {
            debug!("Byte source seek {:?} failed: {}", whence, e);
            e.into()
        })
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.stream.lock().size()?)
    }
}

impl Read for ByteSourceAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_chunk(buf) {
            Ok(ReadOutcome::Data(n)) => Ok(n),
            Ok(ReadOutcome::Eof) => Ok(0),
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
        }
    }
}

impl Seek for ByteSourceAdapter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let whence = match pos {
            SeekFrom::Start(offset) => Whence::Start(offset),
            SeekFrom::Current(delta) => Whence::Current(delta),
            SeekFrom::End(delta) => Whence::End(delta),
        };
        self.seek_to(whence)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}

#[cfg(feature = "symphonia-backend")]
impl symphonia::core::io::MediaSource for ByteSourceAdapter {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        self.size().ok()
    }
}
