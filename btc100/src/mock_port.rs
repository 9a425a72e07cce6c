//! Scripted [`Port`] for exchange and scan tests.

use crate::session::Port;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Something the code under test did to the port, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Write(Vec<u8>),
    Wait,
    Read(usize),
}

/// Port that replays queued read results and records everything else.
///
/// Each queued chunk is returned by one read call, split if the caller's
/// buffer is smaller. An empty queue reads as zero bytes.
#[derive(Debug, Default)]
pub struct MockPort {
    reads: VecDeque<io::Result<Vec<u8>>>,
    pub events: Vec<Event>,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_read(&mut self, chunk: &[u8]) -> &mut Self {
        self.reads.push_back(Ok(chunk.to_vec()));
        self
    }

    pub fn push_empty(&mut self, count: usize) -> &mut Self {
        for _ in 0..count {
            self.reads.push_back(Ok(Vec::new()));
        }
        self
    }

    pub fn push_error(&mut self, kind: io::ErrorKind) -> &mut Self {
        self.reads.push_back(Err(io::Error::from(kind)));
        self
    }

    /// All bytes written, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Write(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = match self.reads.pop_front() {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Err(e),
            None => Vec::new(),
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.reads.push_front(Ok(chunk[n..].to_vec()));
        }
        self.events.push(Event::Read(n));
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.events.push(Event::Write(buf.to_vec()));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        self.events.push(Event::Wait);
        Ok(!self.reads.is_empty())
    }
}
