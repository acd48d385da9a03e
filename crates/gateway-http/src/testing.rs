// src/testing.rs
//! Scripted in-memory socket for exercising the engine without a network,
//! and a log capture for asserting on emitted events.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub enum ReadStep {
    Data(Vec<u8>),
    WouldBlock,
    Error(io::ErrorKind),
}

/// Replays queued read steps and records every written byte. Once the
/// script runs out reads return 0, which the engine treats as the peer
/// closing the connection.
#[derive(Debug, Default)]
pub struct MockStream {
    reads: VecDeque<ReadStep>,
    pub written: Vec<u8>,
    pub write_calls: usize,
    max_write: Option<usize>,
    blocked_writes: usize,
}

impl MockStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stream that delivers `chunks` one read at a time.
    pub fn with_reads<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut stream = Self::new();
        for chunk in chunks {
            stream.push_data(chunk.as_ref());
        }
        stream
    }

    pub fn push_data(&mut self, data: &[u8]) -> &mut Self {
        self.reads.push_back(ReadStep::Data(data.to_vec()));
        self
    }

    pub fn push_step(&mut self, step: ReadStep) -> &mut Self {
        self.reads.push_back(step);
        self
    }

    /// Caps the number of bytes accepted per write call.
    pub fn max_write(mut self, n: usize) -> Self {
        self.max_write = Some(n);
        self
    }

    /// The next `n` write calls fail with `WouldBlock`.
    pub fn block_writes(mut self, n: usize) -> Self {
        self.blocked_writes = n;
        self
    }

    pub fn written_str(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reads.pop_front() {
            None => Ok(0),
            Some(ReadStep::WouldBlock) => Err(io::ErrorKind::WouldBlock.into()),
            Some(ReadStep::Error(kind)) => Err(kind.into()),
            Some(ReadStep::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    // Whatever did not fit is delivered by the next read.
                    self.reads.push_front(ReadStep::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_calls += 1;
        if self.blocked_writes > 0 {
            self.blocked_writes -= 1;
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = self.max_write.map_or(buf.len(), |max| max.min(buf.len()));
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with a thread-local subscriber and returns its result together
/// with everything it logged, formatted without colours.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_target(false)
        .with_writer(move || writer.clone())
        .finish();

    let out = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
    (out, logs)
}
