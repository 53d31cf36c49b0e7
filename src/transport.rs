//! Byte transport used by the programmer
//!
//! The programmer only needs to write bytes, read an exact number of bytes
//! within a timeout and change the data rate. [`SerialTransport`] provides
//! this for any embedded-hal serial port.

use core::fmt::Debug;
use core::marker::PhantomData;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

/// Transport read failures
#[derive(Clone, PartialEq, Debug)]
pub enum TransportError<E> {
    /// Not enough bytes arrived within the timeout
    Timeout,
    Io(E),
}

impl<E> From<E> for TransportError<E> {
    fn from(e: E) -> Self {
        TransportError::Io(e)
    }
}

/// Duplex byte channel to the target
pub trait Transport {
    type Error: Debug;

    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Fill `buff` completely or fail with [`TransportError::Timeout`]
    fn read_exact(&mut self, buff: &mut [u8], timeout_ms: u32) -> Result<(), TransportError<Self::Error>>;

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), Self::Error>;

    /// Reset the target into its bootloader, where the hardware allows it
    fn reset(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Serial port with modem control lines
pub trait SerialPort<E>: Write<u8, Error=E> + Read<u8, Error=E> {
    fn set_rts(&mut self, level: bool) -> Result<(), E>;
    fn set_dtr(&mut self, level: bool) -> Result<(), E>;
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), E>;
}

/// Period DTR/RTS are held asserted while resetting the target
const RESET_PULSE_MS: u32 = 100;

/// [`Transport`] over a polled embedded-hal serial port
pub struct SerialTransport<P, D, E> {
    port: P,
    delay: D,
    poll_delay_ms: u32,
    _err: PhantomData<E>,
}

impl <P, D, E> SerialTransport<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: Debug,
{
    pub fn new(port: P, delay: D, poll_delay_ms: u32) -> Self {
        Self{ port, delay, poll_delay_ms: poll_delay_ms.max(1), _err: PhantomData }
    }

    pub fn port(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn into_inner(self) -> (P, D) {
        (self.port, self.delay)
    }
}

impl <P, D, E> Transport for SerialTransport<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: Debug,
{
    type Error = E;

    fn write(&mut self, data: &[u8]) -> Result<(), E> {
        trace!("tx: {:02x?}", data);

        for b in data {
            block!(self.port.write(*b))?;
        }
        block!(self.port.flush())?;

        Ok(())
    }

    fn read_exact(&mut self, buff: &mut [u8], timeout_ms: u32) -> Result<(), TransportError<E>> {
        let mut t = 0;
        let mut n = 0;

        while n < buff.len() {
            // Attempt to read from serial port
            match self.port.read() {
                Ok(v) => {
                    buff[n] = v;
                    n += 1;
                    continue;
                },
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => return Err(TransportError::Io(e)),
            }

            // Wait for delay period
            self.delay.delay_ms(self.poll_delay_ms);
            t += self.poll_delay_ms;

            if t > timeout_ms {
                debug!("Receive timeout ({} of {} bytes)", n, buff.len());
                return Err(TransportError::Timeout)
            }
        }

        trace!("rx: {:02x?}", buff);

        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), E> {
        debug!("Setting baud rate to {}", baud);
        self.port.set_baud_rate(baud)
    }

    fn reset(&mut self) -> Result<(), E> {
        debug!("Resetting device");

        self.port.set_dtr(true)?;
        self.port.set_rts(true)?;

        self.delay.delay_ms(RESET_PULSE_MS);

        self.port.set_dtr(false)?;
        self.port.set_rts(false)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::NoDelay;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq)]
    struct PortError;

    /// Serial port yielding `WouldBlock` for `None` entries
    #[derive(Default)]
    struct FakePort {
        rx: VecDeque<Option<u8>>,
        tx: Vec<u8>,
        lines: Vec<(&'static str, bool)>,
        baud: Option<u32>,
    }

    impl Read<u8> for FakePort {
        type Error = PortError;

        fn read(&mut self) -> nb::Result<u8, PortError> {
            match self.rx.pop_front() {
                Some(Some(b)) => Ok(b),
                _ => Err(nb::Error::WouldBlock),
            }
        }
    }

    impl Write<u8> for FakePort {
        type Error = PortError;

        fn write(&mut self, word: u8) -> nb::Result<(), PortError> {
            self.tx.push(word);
            Ok(())
        }

        fn flush(&mut self) -> nb::Result<(), PortError> {
            Ok(())
        }
    }

    impl SerialPort<PortError> for FakePort {
        fn set_rts(&mut self, level: bool) -> Result<(), PortError> {
            self.lines.push(("rts", level));
            Ok(())
        }
        fn set_dtr(&mut self, level: bool) -> Result<(), PortError> {
            self.lines.push(("dtr", level));
            Ok(())
        }
        fn set_baud_rate(&mut self, baud: u32) -> Result<(), PortError> {
            self.baud = Some(baud);
            Ok(())
        }
    }

    #[test]
    fn reads_across_idle_polls() {
        let mut port = FakePort::default();
        port.rx.extend(vec![Some(0x79), None, None, Some(0x01), Some(0x02)]);
        let mut t = SerialTransport::new(port, NoDelay, 1);

        let mut buff = [0u8; 3];
        t.read_exact(&mut buff, 10).unwrap();
        assert_eq!(buff, [0x79, 0x01, 0x02]);
    }

    #[test]
    fn read_times_out_on_silence() {
        let mut t = SerialTransport::new(FakePort::default(), NoDelay, 1);

        let mut buff = [0u8; 1];
        assert_eq!(t.read_exact(&mut buff, 5), Err(TransportError::Timeout));
    }

    #[test]
    fn writes_and_resets() {
        let mut t = SerialTransport::new(FakePort::default(), NoDelay, 1);

        t.write(&[0x7F, 0x00, 0xFF]).unwrap();
        t.reset().unwrap();
        Transport::set_baud_rate(&mut t, 115_200).unwrap();

        let (port, _) = t.into_inner();
        assert_eq!(port.tx, vec![0x7F, 0x00, 0xFF]);
        assert_eq!(port.lines, vec![("dtr", true), ("rts", true), ("dtr", false), ("rts", false)]);
        assert_eq!(port.baud, Some(115_200));
    }
}
