//! Programmer errors

use core::fmt::Debug;

use crate::plan::PlanError;
use crate::protocol::Command;
use crate::transport::TransportError;

/// Errors returned by the programmer, generic over the transport error
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError: Debug> {
    #[error("serial error: {0:?}")]
    Serial(SerialError),

    #[error("no bootloader session, synchronise before issuing commands")]
    NotConnected,

    #[error("bootloader did not answer the init byte after {attempts} attempts")]
    ConnectionFailed { attempts: u32 },

    #[error("no response within the timeout window")]
    Timeout,

    #[error("{command:?} rejected after {attempts} attempts")]
    CommandRejected { command: Command, attempts: u32 },

    #[error("{0:?} is not supported by this bootloader")]
    UnsupportedCommand(Command),

    #[error("address range {address:#010x}+{length:#x} is outside the device memory map")]
    AddressOutOfRange { address: u32, length: usize },

    #[error("received frame failed checksum validation")]
    ChecksumMismatch,

    #[error("unexpected response byte {0:#04x}")]
    InvalidResponse(u8),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("write failed at {resume_at:#010x} after {written} bytes")]
    PartialWriteFailure {
        /// Start of the last chunk that was written successfully
        last_good: Option<u32>,
        /// Address the write should resume from
        resume_at: u32,
        written: usize,
        cause: Box<Error<SerialError>>,
    },

    #[error("no device profile for product id {0:#05x}")]
    UnknownDeviceProfile(u16),

    #[error("verification failed at {address:#010x}: expected {expected:#04x}, found {found:#04x}")]
    VerifyMismatch { address: u32, expected: u8, found: u8 },

    #[error("operation cancelled before {address:#010x}")]
    Cancelled { address: u32 },
}

impl<SerialError: Debug> From<TransportError<SerialError>> for Error<SerialError> {
    fn from(e: TransportError<SerialError>) -> Self {
        match e {
            TransportError::Timeout => Self::Timeout,
            TransportError::Io(e) => Self::Serial(e),
        }
    }
}

impl<SerialError: Debug> From<PlanError> for Error<SerialError> {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::OutOfRange { address, length } => Self::AddressOutOfRange { address, length },
            PlanError::EmptyRange => Self::InvalidArgument("empty address range"),
            PlanError::PageNotEncodable(_) => {
                Self::InvalidArgument("page number cannot be encoded by the erase command")
            }
        }
    }
}

impl<SerialError: Debug> Error<SerialError> {
    /// Handshake failures, as opposed to failures of individual commands
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::NotConnected | Error::ConnectionFailed { .. })
    }
}
