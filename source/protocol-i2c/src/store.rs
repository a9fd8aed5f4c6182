//! Persistence for the device state.
//!
//! The device saves a [`Snapshot`] through a [`Store`]. On real hardware the
//! store is backed by data EEPROM or a flash page; [`MemStore`] keeps it in
//! RAM.

use core::{convert::Infallible, fmt::Debug};
use i2c_tlv_proto::{OwnedTlv, MAX_VALUE_LEN};
use serde::{Deserialize, Serialize};

/// Current [`Snapshot`] layout version.
pub const SNAPSHOT_VERSION: u8 = 1;

/// Upper bound on an encoded [`Snapshot`]: version, identity, option tag,
/// type, varint length, and the value.
pub const SNAPSHOT_MAX_LEN: usize = 8 + MAX_VALUE_LEN;

/// Non-volatile storage for a single snapshot blob.
pub trait Store {
    type Error: Debug;

    /// Load the last stored blob into `buf`.
    ///
    /// Returns `Ok(None)` if nothing has been stored yet.
    fn load<'buf>(&mut self, buf: &'buf mut [u8]) -> Result<Option<&'buf [u8]>, Self::Error>;

    /// Replace the stored blob with `data`.
    fn store(&mut self, data: &[u8]) -> Result<(), Self::Error>;
}

/// The persisted device state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u8,
    pub device_id: u8,
    /// The staged record, if the controller had not read it yet.
    pub pending: Option<OwnedTlv>,
}

/// A RAM-backed [`Store`].
#[derive(Debug, Default, Clone)]
pub struct MemStore {
    blob: Option<heapless::Vec<u8, SNAPSHOT_MAX_LEN>>,
    writes: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemStoreError {
    /// The blob does not fit in [`SNAPSHOT_MAX_LEN`] bytes, or in the buffer
    /// passed to [`Store::load`].
    TooLarge,
}

// === impl MemStore ===

impl MemStore {
    pub const fn new() -> Self {
        Self {
            blob: None,
            writes: 0,
        }
    }

    /// A store that already holds `blob`, as if written by an earlier boot.
    pub fn with_blob(blob: &[u8]) -> Result<Self, MemStoreError> {
        let blob = heapless::Vec::from_slice(blob).map_err(|_| MemStoreError::TooLarge)?;
        Ok(Self {
            blob: Some(blob),
            writes: 0,
        })
    }

    /// The currently stored blob.
    pub fn blob(&self) -> Option<&[u8]> {
        self.blob.as_deref()
    }

    /// How many times [`Store::store`] has succeeded.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl Store for MemStore {
    type Error = MemStoreError;

    fn load<'buf>(&mut self, buf: &'buf mut [u8]) -> Result<Option<&'buf [u8]>, Self::Error> {
        let Some(blob) = self.blob.as_ref() else {
            return Ok(None);
        };
        let out = buf.get_mut(..blob.len()).ok_or(MemStoreError::TooLarge)?;
        out.copy_from_slice(blob);
        Ok(Some(out))
    }

    fn store(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let blob = heapless::Vec::from_slice(data).map_err(|_| MemStoreError::TooLarge)?;
        self.blob = Some(blob);
        self.writes += 1;
        Ok(())
    }
}

impl<S: Store + ?Sized> Store for &mut S {
    type Error = S::Error;

    fn load<'buf>(&mut self, buf: &'buf mut [u8]) -> Result<Option<&'buf [u8]>, Self::Error> {
        (**self).load(buf)
    }

    fn store(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        (**self).store(data)
    }
}

/// A store that never holds anything, for devices without non-volatile
/// memory.
impl Store for () {
    type Error = Infallible;

    fn load<'buf>(&mut self, _: &'buf mut [u8]) -> Result<Option<&'buf [u8]>, Self::Error> {
        Ok(None)
    }

    fn store(&mut self, _: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }
}
