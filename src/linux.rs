use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::path::Path;
use std::time::Duration;

use linux_embedded_hal::{Delay, Serial};
use serial_core::{
    BaudRate, CharSize, Error as SerialError, FlowControl, Parity, SerialDevice as _,
    SerialPortSettings as _, StopBits,
};

use crate::{Options, Programmer, SerialPort, SerialTransport};

/// Serial transport over a linux tty
pub type LinuxTransport = SerialTransport<Serial, Delay, IoErrorKind>;

/// Programmer over a linux tty
pub type LinuxProgrammer = Programmer<LinuxTransport, Delay>;

fn kind(e: SerialError) -> IoErrorKind {
    IoError::from(e).kind()
}

impl SerialPort<IoErrorKind> for Serial {
    fn set_rts(&mut self, level: bool) -> Result<(), IoErrorKind> {
        self.0.set_rts(level).map_err(kind)
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), IoErrorKind> {
        self.0.set_dtr(level).map_err(kind)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), IoErrorKind> {
        let mut settings = self.0.read_settings().map_err(kind)?;
        settings.set_baud_rate(BaudRate::from_speed(baud as usize)).map_err(kind)?;
        self.0.write_settings(&settings).map_err(kind)
    }
}

impl LinuxProgrammer {
    /// Create a new linux serial port programmer instance
    ///
    /// The bootloader expects 8 data bits, even parity and one stop bit;
    /// pass `Parity::ParityNone` for BlueNRG parts.
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        parity: Parity,
        options: Options,
    ) -> Result<Self, SerialError> {
        // Open port
        let mut port = Serial::open(port.as_ref())?;

        // Apply settings
        let mut settings = port.0.read_settings()?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_baud_rate(BaudRate::from_speed(baud))?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(parity);

        port.0.write_settings(&settings)?;

        // Reads are polled, timeouts are tracked by the transport
        port.0.set_timeout(Duration::from_millis(1))?;

        let transport = SerialTransport::new(port, Delay {}, options.poll_delay_ms);

        // Return instance
        Ok(Self::new(transport, Delay {}, options))
    }
}
