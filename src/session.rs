//! Connection session and handshake state machine

use crate::error::Error;
use crate::frame::{decode_ack, Reply};
use crate::protocol::UART_DISC;
use crate::transport::{Transport, TransportError};

/// Session state
///
/// `Synced` is the only state in which commands may be issued. `Closed` is
/// entered once the target has left the bootloader (after Go).
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    Idle,
    Syncing,
    Synced,
    Failed,
    Closed,
}

/// Transport plus the state negotiated with the bootloader
pub struct Session<T> {
    transport: T,
    state: State,
    baud: Option<u32>,
    extended_erase: bool,
}

impl<T> Session<T>
where
    T: Transport,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: State::Idle,
            baud: None,
            extended_erase: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_synced(&self) -> bool {
        self.state == State::Synced
    }

    /// Data rate last applied through this session, if changed
    pub fn baud(&self) -> Option<u32> {
        self.baud
    }

    /// Whether the bootloader advertised Extended Erase in its Get response
    pub fn extended_erase(&self) -> bool {
        self.extended_erase
    }

    pub(crate) fn set_extended_erase(&mut self, supported: bool) {
        self.extended_erase = supported;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub(crate) fn set_baud(&mut self, baud: u32) -> Result<(), T::Error> {
        self.transport.set_baud_rate(baud)?;
        self.baud = Some(baud);
        Ok(())
    }

    /// Target has left the bootloader, no further commands are possible
    pub(crate) fn close(&mut self) {
        debug!("Session closed");
        self.state = State::Closed;
    }

    /// Target reset itself and needs a new handshake
    pub(crate) fn reset(&mut self) {
        self.state = State::Idle;
    }

    /// Fatal protocol error, the wire framing can no longer be trusted
    pub(crate) fn fail(&mut self) {
        self.state = State::Failed;
    }

    /// Send the init byte until the bootloader acknowledges it
    ///
    /// A NACK in answer to a repeated init byte means the bootloader already
    /// detected the baud rate on an earlier attempt and took the second byte
    /// as a (bad) command, so it is accepted as synchronised.
    pub fn sync(&mut self, attempts: u32, timeout_ms: u32) -> Result<(), Error<T::Error>> {
        self.state = State::Syncing;

        for attempt in 0..attempts {
            debug!("Sending discovery character (attempt {}/{})", attempt + 1, attempts);

            if let Err(e) = self.transport.write(&[UART_DISC]) {
                self.state = State::Failed;
                return Err(Error::Serial(e));
            }

            let mut b = [0u8; 1];
            match self.transport.read_exact(&mut b, timeout_ms) {
                Ok(()) => match decode_ack(b[0]) {
                    Reply::Ack => {
                        debug!("Received bootloader ack");
                        self.state = State::Synced;
                        return Ok(());
                    }
                    Reply::Nack if attempt > 0 => {
                        warn!("Bootloader nacked repeated init byte, assuming already synchronised");
                        self.state = State::Synced;
                        return Ok(());
                    }
                    Reply::Nack => debug!("Received bootloader nack"),
                    Reply::Unknown(v) => debug!("Received unexpected value: 0x{:02x}", v),
                },
                Err(TransportError::Timeout) => debug!("No response to init byte"),
                Err(TransportError::Io(e)) => {
                    self.state = State::Failed;
                    return Err(Error::Serial(e));
                }
            }
        }

        error!("Bootloader handshake failed after {} attempts", attempts);
        self.state = State::Failed;

        Err(Error::ConnectionFailed { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTransport, ACK, NACK};
    use pretty_assertions::assert_eq;

    #[test]
    fn sync_on_first_ack() {
        let mut t = MockTransport::new();
        t.reply(&[ACK]);

        let mut s = Session::new(t);
        assert_eq!(s.state(), State::Idle);
        s.sync(3, 10).unwrap();

        assert_eq!(s.state(), State::Synced);
        assert_eq!(s.transport().written, vec![UART_DISC]);
    }

    #[test]
    fn nack_on_repeated_init_byte_means_synced() {
        let mut t = MockTransport::new();
        t.silence().reply(&[NACK]);

        let mut s = Session::new(t);
        s.sync(3, 10).unwrap();

        assert_eq!(s.state(), State::Synced);
        assert_eq!(s.transport().written, vec![UART_DISC, UART_DISC]);
    }

    #[test]
    fn nack_on_first_init_byte_is_retried() {
        let mut t = MockTransport::new();
        t.reply(&[NACK]).reply(&[ACK]);

        let mut s = Session::new(t);
        s.sync(3, 10).unwrap();
        assert_eq!(s.transport().written.len(), 2);
    }

    #[test]
    fn sync_fails_after_budget() {
        let mut t = MockTransport::new();
        t.silence().silence().reply(&[0x00]);

        let mut s = Session::new(t);
        assert_eq!(s.sync(3, 10), Err(Error::ConnectionFailed { attempts: 3 }));
        assert_eq!(s.state(), State::Failed);
        assert_eq!(s.transport().written, vec![UART_DISC; 3]);
    }
}
