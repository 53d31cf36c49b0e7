//! STM32 Serial Bootloader.
//!
//! Base on AN3155 (USART protocol) and AN2606 (device parameters).
//!
//! A [`Programmer`] wraps any [`Transport`], synchronises with the
//! bootloader, identifies the device against a [`ProfileTable`] and then
//! issues framed commands or planned multi-chunk memory operations.

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

pub mod device;
pub mod engine;
pub mod error;
pub mod frame;
pub mod memory;
pub mod plan;
pub mod progress;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(feature = "linux")]
pub mod linux;

#[cfg(test)]
mod mock;

pub use device::{format_uid, DeviceFlags, EraseStrategy, Family, PageLayout, Profile, ProfileTable, Region};
pub use engine::{format_version, BootloaderInfo, Identity, Programmer, Response, RetryBudget, Version};
pub use error::Error;
pub use memory::{Reader, Segment};
pub use plan::{plan_erase, plan_read, plan_write, Chunk, EraseOp, ErasePlan, PlanError, ReadPlan};
pub use progress::{CancelToken, NoProgress, ProgressSink};
pub use protocol::{Command, MassErase, UART_ACK, UART_DISC, UART_NACK};
pub use session::State;
pub use transport::{SerialPort, SerialTransport, Transport, TransportError};

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Do not reset the device on connection
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub no_reset: bool,

    /// Timeout to wait for bootloader responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value="500"))]
    pub response_timeout_ms: u32,

    /// Timeout for the final response of erase and protection commands
    #[cfg_attr(feature = "structopt", structopt(long, default_value="30000"))]
    pub erase_timeout_ms: u32,

    /// Period to poll for bootloader responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value="1"))]
    pub poll_delay_ms: u32,

    /// Period to wait for bootloader init before sending init character
    #[cfg_attr(feature = "structopt", structopt(long, default_value="10"))]
    pub init_delay_ms: u32,

    /// Timeout to wait for a response to each init character
    #[cfg_attr(feature = "structopt", structopt(long, default_value="100"))]
    pub sync_timeout_ms: u32,

    /// Init characters to send before giving up on the bootloader
    #[cfg_attr(feature = "structopt", structopt(long, default_value="5"))]
    pub sync_attempts: u32,

    /// Attempts per command before a NACK or timeout is reported
    #[cfg_attr(feature = "structopt", structopt(long, default_value="3"))]
    pub retries: u32,

    /// Period to wait for the device to restart after a protection change
    #[cfg_attr(feature = "structopt", structopt(long, default_value="500"))]
    pub reset_delay_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            no_reset: false,
            response_timeout_ms: 500,
            erase_timeout_ms: 30_000,
            poll_delay_ms: 1,
            init_delay_ms: 10,
            sync_timeout_ms: 100,
            sync_attempts: 5,
            retries: 3,
            reset_delay_ms: 500,
        }
    }
}
