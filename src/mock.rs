//! Scripted transport for tests

use std::collections::VecDeque;

use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::{UART_ACK, UART_NACK};
use crate::transport::{Transport, TransportError};

pub const ACK: u8 = UART_ACK;
pub const NACK: u8 = UART_NACK;

#[derive(Debug, Clone, PartialEq)]
pub struct MockError;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Bytes(Vec<u8>),
    Timeout,
}

/// Replays queued responses and records everything written
#[derive(Debug, Default)]
pub struct MockTransport {
    events: VecDeque<Event>,
    pub written: Vec<u8>,
    pub writes: Vec<Vec<u8>>,
    pub baud: Option<u32>,
    pub resets: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes the target will send
    pub fn reply(&mut self, bytes: &[u8]) -> &mut Self {
        self.events.push_back(Event::Bytes(bytes.to_vec()));
        self
    }

    /// Queue a read that times out
    pub fn silence(&mut self) -> &mut Self {
        self.events.push_back(Event::Timeout);
        self
    }

    pub fn pending(&self) -> usize {
        self.events.iter().map(|e| match e {
            Event::Bytes(b) => b.len(),
            Event::Timeout => 1,
        }).sum()
    }

    /// Number of writes whose bytes exactly match `frame`
    pub fn count_writes(&self, frame: &[u8]) -> usize {
        self.writes.iter().filter(|w| w.as_slice() == frame).count()
    }
}

impl Transport for MockTransport {
    type Error = MockError;

    fn write(&mut self, data: &[u8]) -> Result<(), MockError> {
        self.written.extend_from_slice(data);
        self.writes.push(data.to_vec());
        Ok(())
    }

    fn read_exact(&mut self, buff: &mut [u8], _timeout_ms: u32) -> Result<(), TransportError<MockError>> {
        let mut n = 0;
        while n < buff.len() {
            match self.events.pop_front() {
                Some(Event::Bytes(mut bytes)) => {
                    let take = bytes.len().min(buff.len() - n);
                    buff[n..n + take].copy_from_slice(&bytes[..take]);
                    n += take;
                    if take < bytes.len() {
                        bytes.drain(..take);
                        self.events.push_front(Event::Bytes(bytes));
                    }
                }
                Some(Event::Timeout) | None => return Err(TransportError::Timeout),
            }
        }
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), MockError> {
        self.baud = Some(baud);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), MockError> {
        self.resets += 1;
        Ok(())
    }
}

pub struct NoDelay;

impl DelayMs<u32> for NoDelay {
    fn delay_ms(&mut self, _ms: u32) {}
}
