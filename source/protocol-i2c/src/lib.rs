//! # protocol-i2c
//!
//! The device side of a small I<sup>2</sup>C target protocol: a logical
//! device identity, a staged type-length-value record for the controller to
//! read, an inbox for records the controller writes, and persistence of the
//! device state.
//!
//! - [`ProtocolI2c`] is the facade the firmware uses. Its bus events are fed
//!   from the platform's I<sup>2</sup>C target interrupt.
//! - [`client::TlvClient`] speaks the same protocol from the controller side
//!   over `embedded-hal-async`.
//! - [`loopback::LoopbackBus`] wires the two together on a host.
//!
//! Wire types live in the [`proto`] crate, so external decoders can share
//! them.

#![cfg_attr(not(any(test, feature = "use-std")), no_std)]

pub mod client;
pub mod loopback;
pub mod settings;
pub mod store;
mod target;

#[cfg(test)]
pub(crate) mod test_util;

pub use i2c_tlv_proto as proto;

pub use self::{
    settings::ProtocolSettings,
    store::{MemStore, Store},
    target::{Direction, Error, ProtocolI2c},
};
