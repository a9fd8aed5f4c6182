//! # i2c-tlv-proto
//!
//! Wire types for the I<sup>2</sup>C TLV device protocol. Shared by the
//! device-side facade in `protocol-i2c` and by anything driving the bus as a
//! controller.
//!
//! Every transaction starts with a controller write whose first byte is a
//! [`Command`]. Commands with a response are followed by a repeated START and
//! a read.

#![cfg_attr(not(any(test, feature = "use-std")), no_std)]

use core::fmt;
use serde::{Deserialize, Serialize};

////////////////////////////////////////////////////////////////////////////////
// Constants
////////////////////////////////////////////////////////////////////////////////

/// The largest TLV value the device will stage or accept.
pub const MAX_VALUE_LEN: usize = 32;

/// `type` byte + `length` byte.
pub const HEADER_LEN: usize = 2;

/// Size of the send and receive buffers: one full record.
pub const FRAME_LEN: usize = HEADER_LEN + MAX_VALUE_LEN;

/// Clocked out by the target when it has nothing (more) to send.
pub const IDLE_BYTE: u8 = 0xFF;

/// Default 7-bit target address.
pub const DEFAULT_ADDRESS: u8 = 0x30;

////////////////////////////////////////////////////////////////////////////////
// Commands
////////////////////////////////////////////////////////////////////////////////

/// The command byte that opens every controller write.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Read back the device identity (one byte).
    Who = 0x01,
    /// Read the [`Status`] register (one byte).
    Status = 0x02,
    /// Read the staged record, `[type, length, value..]`.
    ReadTlv = 0x03,
    /// Write a record, `[type, length, value..]`, to the device's inbox.
    WriteTlv = 0x04,
    /// Ask the device to persist its state.
    Save = 0x05,
}

impl Command {
    pub fn from_byte(byte: u8) -> Result<Self, Error> {
        match byte {
            0x01 => Ok(Command::Who),
            0x02 => Ok(Command::Status),
            0x03 => Ok(Command::ReadTlv),
            0x04 => Ok(Command::WriteTlv),
            0x05 => Ok(Command::Save),
            other => Err(Error::UnknownCommand(other)),
        }
    }

    #[inline]
    pub fn byte(self) -> u8 {
        self as u8
    }
}

////////////////////////////////////////////////////////////////////////////////
// Status register
////////////////////////////////////////////////////////////////////////////////

mycelium_bitfield::bitfield! {
    /// The device status register, returned by [`Command::Status`].
    #[derive(PartialEq, Eq)]
    pub struct Status<u8> {
        /// A staged record has not been read in full by the controller.
        pub const TLV_PENDING: bool;
        /// A record written by the controller is waiting for the firmware.
        pub const RX_READY: bool;
        /// The controller asked the device to persist its state.
        pub const SAVE_REQUESTED: bool;
        /// The previous transaction hit a protocol error.
        ///
        /// Cleared when the status register is read.
        pub const ERROR: bool;
        const _RESERVED = 4;
    }
}

////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Error {
    /// The provided buffer is not suitable in size
    InsufficientSize,
    /// The value is longer than [`MAX_VALUE_LEN`]
    ValueTooLong,
    /// The data ended before the header or the value was complete
    Truncated,
    /// The command byte is not a known [`Command`]
    UnknownCommand(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InsufficientSize => f.write_str("buffer too small"),
            Error::ValueTooLong => write!(f, "value longer than {MAX_VALUE_LEN} bytes"),
            Error::Truncated => f.write_str("truncated TLV record"),
            Error::UnknownCommand(byte) => write!(f, "unknown command {byte:#04x}"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// TLV records
////////////////////////////////////////////////////////////////////////////////

/// A borrowed type-length-value record.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Tlv<'a> {
    pub kind: u8,
    pub value: &'a [u8],
}

impl<'a> Tlv<'a> {
    /// Create a new record, checking the value fits in one frame.
    pub fn new(kind: u8, value: &'a [u8]) -> Result<Self, Error> {
        if value.len() > MAX_VALUE_LEN {
            return Err(Error::ValueTooLong);
        }
        Ok(Self { kind, value })
    }

    /// Number of bytes [`Tlv::encode_to`] will write.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.value.len()
    }

    /// Encodes the current [Tlv] into the given buffer
    pub fn encode_to<'b>(&self, out_buf: &'b mut [u8]) -> Result<&'b mut [u8], Error> {
        if self.value.len() > MAX_VALUE_LEN {
            return Err(Error::ValueTooLong);
        }
        let out = out_buf
            .get_mut(..self.encoded_len())
            .ok_or(Error::InsufficientSize)?;
        let (header, value) = out.split_at_mut(HEADER_LEN);
        header[0] = self.kind;
        header[1] = self.value.len() as u8;
        value.copy_from_slice(self.value);
        Ok(out)
    }

    /// Decodes a [Tlv] from the start of the given buffer.
    ///
    /// Bytes past the end of the record (such as idle padding) are ignored.
    pub fn decode_from(data: &'a [u8]) -> Result<Self, Error> {
        if data.len() < HEADER_LEN {
            return Err(Error::Truncated);
        }
        let (header, rest) = data.split_at(HEADER_LEN);
        let kind = header[0];
        let len = header[1] as usize;
        if len > MAX_VALUE_LEN {
            return Err(Error::ValueTooLong);
        }
        let value = rest.get(..len).ok_or(Error::Truncated)?;
        Ok(Tlv { kind, value })
    }

    /// Copy into an [OwnedTlv]
    ///
    /// Fails with [`Error::ValueTooLong`] if the value does not fit in one
    /// frame, which can happen for a [Tlv] built without [`Tlv::new`].
    pub fn into_owned(self) -> Result<OwnedTlv, Error> {
        let value = heapless::Vec::from_slice(self.value).map_err(|_| Error::ValueTooLong)?;
        Ok(OwnedTlv {
            kind: self.kind,
            value,
        })
    }
}

/// Like [Tlv], but owns the storage instead.
///
/// Backed by a fixed-capacity buffer, so it is available without an
/// allocator.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct OwnedTlv {
    pub kind: u8,
    pub value: heapless::Vec<u8, MAX_VALUE_LEN>,
}

impl OwnedTlv {
    /// Create a new owned record from the given type and value
    pub fn new(kind: u8, value: &[u8]) -> Result<Self, Error> {
        Tlv::new(kind, value)?.into_owned()
    }

    /// Borrows self as a [Tlv]
    pub fn as_tlv(&self) -> Tlv<'_> {
        Tlv {
            kind: self.kind,
            value: &self.value,
        }
    }
}
