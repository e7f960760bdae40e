// src/build/output.rs

//! Captured build output.
//!
//! Each stream is an append-only, unbounded byte buffer shared between the
//! drain task that fills it and any number of readers. Readers get a
//! snapshot, so they never hold the lock while the runner is producing.

use std::io::{self, BufRead, Read};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    inner: Arc<Mutex<Capture>>,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Capture> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a chunk. Returns false (and drops the chunk) once closed.
    pub fn append(&self, chunk: &[u8]) -> bool {
        let mut capture = self.lock();
        if capture.closed {
            return false;
        }
        capture.bytes.extend_from_slice(chunk);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().bytes.clone()
    }

    pub fn reader(&self) -> OutputReader {
        OutputReader::new(self.snapshot())
    }

    /// Discard the buffer and refuse further writes.
    pub fn close(&self) {
        let mut capture = self.lock();
        capture.closed = true;
        capture.bytes = Vec::new();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Readable view over a snapshot of captured output.
#[derive(Debug, Clone)]
pub struct OutputReader {
    cursor: io::Cursor<Vec<u8>>,
}

impl OutputReader {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            cursor: io::Cursor::new(bytes),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl Read for OutputReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl BufRead for OutputReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.cursor.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.cursor.consume(amt)
    }
}
