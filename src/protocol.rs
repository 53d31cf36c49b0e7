//! Bootloader wire constants and command opcodes (AN3155, AN2606)

use core::convert::TryFrom;

/// Init byte used for baud detection and handshake
pub const UART_DISC: u8 = 0x7F;

pub const UART_ACK: u8 = 0x79;
pub const UART_NACK: u8 = 0x1F;

/// Maximum payload of a single Read Memory / Write Memory command
pub const MAX_CHUNK: usize = 256;

/// Legacy erase takes at most 255 page numbers per command
pub const MAX_LEGACY_ERASE_PAGES: usize = 255;

/// Extended erase page counts from 0xFFF0 up are reserved for special erases
pub const MAX_EXTENDED_ERASE_PAGES: usize = 0xFFF0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Fetch bootloader version and allowed commands
    Get = 0x00,

    /// Gets the bootloader version and the Read Protection status of the Flash memory.
    GetVersionReadStatus = 0x01,

    /// Gets the chip ID
    GetId = 0x02,

    /// Changes the link data rate (CAN/FDCAN bootloaders only)
    Speed = 0x03,

    /// Reads up to 256 bytes of memory starting from an address specified by the application.
    ReadMemory = 0x11,

    /// Jumps to user application code located in the internal Flash memory or in the SRAM.
    Go = 0x21,

    /// Writes up to 256 bytes to the RAM or Flash memory starting from an address specified by the application.
    WriteMemory = 0x31,

    /// Erases from one to all the Flash memory pages.
    Erase = 0x43,

    /// Erases from one to all the Flash memory pages using two byte addressing mode (available only for v3.0 USART bootloader versions and above).
    ExtendedErase = 0x44,

    /// Enables the write protection for some sectors.
    WriteProtect = 0x63,

    /// Disables the write protection for all Flash memory sectors
    WriteUnprotect = 0x73,

    /// Enables the read protection
    ReadoutProtect = 0x82,

    /// Disables the read protection.
    ReadoutUnprotect = 0x92,

    /// Computes a CRC over a memory area (recent bootloaders only)
    GetChecksum = 0xA1,
}

impl Command {
    pub fn opcode(self) -> u8 {
        self as u8
    }

    /// Commands whose final acknowledgement only arrives once flash has been
    /// erased or option bytes rewritten
    pub fn is_slow(self) -> bool {
        matches!(
            self,
            Command::Erase
                | Command::ExtendedErase
                | Command::WriteProtect
                | Command::WriteUnprotect
                | Command::ReadoutProtect
                | Command::ReadoutUnprotect
        )
    }

    /// Commands after which the target resets and must be synchronised again
    pub fn resets_target(self) -> bool {
        matches!(
            self,
            Command::WriteProtect
                | Command::WriteUnprotect
                | Command::ReadoutProtect
                | Command::ReadoutUnprotect
        )
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        let c = match v {
            0x00 => Command::Get,
            0x01 => Command::GetVersionReadStatus,
            0x02 => Command::GetId,
            0x03 => Command::Speed,
            0x11 => Command::ReadMemory,
            0x21 => Command::Go,
            0x31 => Command::WriteMemory,
            0x43 => Command::Erase,
            0x44 => Command::ExtendedErase,
            0x63 => Command::WriteProtect,
            0x73 => Command::WriteUnprotect,
            0x82 => Command::ReadoutProtect,
            0x92 => Command::ReadoutUnprotect,
            0xA1 => Command::GetChecksum,
            other => return Err(other),
        };
        Ok(c)
    }
}

/// Special erase requests encoded in place of a page list
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MassErase {
    All,
    Bank1,
    Bank2,
}

impl MassErase {
    /// Extended erase sentinel page count
    pub fn extended_code(self) -> u16 {
        match self {
            MassErase::All => 0xFFFF,
            MassErase::Bank1 => 0xFFFE,
            MassErase::Bank2 => 0xFFFD,
        }
    }
}

/// Bit rate codes accepted by the Speed command
pub fn speed_code(baud: u32) -> Option<u8> {
    match baud {
        125_000 => Some(0x01),
        250_000 => Some(0x02),
        500_000 => Some(0x03),
        1_000_000 => Some(0x04),
        _ => None,
    }
}
