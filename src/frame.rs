//! Frame codec
//!
//! Every byte sequence sent to the bootloader is protected by a trailing XOR
//! checksum. Single byte values (opcodes, counts) are sent together with
//! their complement, so the two byte frame always XORs to 0xFF; longer
//! payloads are followed by the XOR of all payload bytes so the frame XORs
//! to zero.

use crate::protocol::{Command, UART_ACK, UART_NACK};

/// Acknowledgement byte as decoded from the wire
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Nack,
    Unknown(u8),
}

/// Decode a byte received where an ACK or NACK is expected
pub fn decode_ack(b: u8) -> Reply {
    match b {
        UART_ACK => Reply::Ack,
        UART_NACK => Reply::Nack,
        other => Reply::Unknown(other),
    }
}

/// XOR of all bytes
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// An encoded frame, checksum included
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    /// Opcode followed by its complement
    pub fn command(command: Command) -> Self {
        Self::encode(&[command.opcode()])
    }

    /// Build a frame for `payload`, computing its checksum
    pub fn encode(payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(payload.len() + 1);
        bytes.extend_from_slice(payload);

        match payload {
            [single] => bytes.push(single ^ 0xFF),
            _ => bytes.push(checksum(payload)),
        }

        Frame(bytes)
    }

    /// Big-endian address frame used by Read/Write Memory and Go
    pub fn address(address: u32) -> Self {
        Self::encode(&address.to_be_bytes())
    }

    /// Count-prefixed data frame used by Write Memory and Write Protect
    pub fn counted(data: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(data.len() + 1);
        payload.push((data.len() - 1) as u8);
        payload.extend_from_slice(data);
        Self::encode(&payload)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check that the trailing byte matches the payload
    pub fn is_valid(&self) -> bool {
        verify(&self.0)
    }
}

/// Validate a received or constructed frame (payload plus checksum byte)
pub fn verify(frame: &[u8]) -> bool {
    match frame {
        [] | [_] => false,
        [value, check] => value ^ 0xFF == *check,
        _ => checksum(frame) == 0,
    }
}
