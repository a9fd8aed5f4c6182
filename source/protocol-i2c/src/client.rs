//! # Controller client
//!
//! [`TlvClient`] drives a device running [`ProtocolI2c`] from the bus
//! controller side, over any [`embedded_hal_async::i2c::I2c`] implementation.
//!
//! [`ProtocolI2c`]: crate::ProtocolI2c
use core::fmt;

use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use i2c_tlv_proto::{Command, Status, Tlv, FRAME_LEN};
use tracing::Level;

pub struct TlvClient<I2C> {
    i2c: I2C,
    address: SevenBitAddress,
}

#[derive(Debug, PartialEq)]
pub enum ClientError<E> {
    I2c(E),
    Proto(i2c_tlv_proto::Error),
    /// The device flagged an error from an earlier transaction. Reading its
    /// status cleared the flag, so this is the only report of it.
    Device(Status),
}

// === impl TlvClient ===

impl<I2C: I2c> TlvClient<I2C> {
    pub fn new(i2c: I2C, address: SevenBitAddress) -> Self {
        Self { i2c, address }
    }

    /// Give back the bus.
    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Read the device identity.
    #[tracing::instrument(level = Level::DEBUG, skip(self))]
    pub async fn who(&mut self) -> Result<u8, ClientError<I2C::Error>> {
        let [id] = self.query::<1>(Command::Who).await?;
        tracing::debug!(id, "device identity");
        Ok(id)
    }

    /// Read the device's status register. This clears its `ERROR` bit.
    #[tracing::instrument(level = Level::DEBUG, skip(self))]
    pub async fn status(&mut self) -> Result<Status, ClientError<I2C::Error>> {
        let [bits] = self.query::<1>(Command::Status).await?;
        Ok(Status::from_bits(bits))
    }

    /// Fetch the device's staged record into `buf`.
    ///
    /// Returns `Ok(None)` without reading if the device has nothing pending.
    /// The status read clears the device's `ERROR` bit, so a set bit is
    /// returned as [`ClientError::Device`] and the record is left for the
    /// next call.
    #[tracing::instrument(level = Level::DEBUG, skip(self, buf))]
    pub async fn read_tlv<'buf>(
        &mut self,
        buf: &'buf mut [u8; FRAME_LEN],
    ) -> Result<Option<Tlv<'buf>>, ClientError<I2C::Error>> {
        let status = self.status().await?;
        if status.get(Status::ERROR) {
            tracing::warn!(?status, "device reported an error");
            return Err(ClientError::Device(status));
        }
        if !status.get(Status::TLV_PENDING) {
            tracing::debug!("nothing pending");
            return Ok(None);
        }

        self.i2c
            .write_read(self.address, &[Command::ReadTlv.byte()], &mut buf[..])
            .await
            .map_err(ClientError::I2c)?;
        let buf: &'buf [u8] = buf;
        let tlv = Tlv::decode_from(buf)?;
        tracing::debug!(kind = tlv.kind, len = tlv.value.len(), "record read");
        Ok(Some(tlv))
    }

    /// Write a record to the device's inbox.
    #[tracing::instrument(level = Level::DEBUG, skip(self))]
    pub async fn write_tlv(&mut self, tlv: &Tlv<'_>) -> Result<(), ClientError<I2C::Error>> {
        let mut frame = [0u8; 1 + FRAME_LEN];
        frame[0] = Command::WriteTlv.byte();
        let len = tlv.encode_to(&mut frame[1..])?.len();
        self.i2c
            .write(self.address, &frame[..1 + len])
            .await
            .map_err(ClientError::I2c)
    }

    /// Ask the device to persist its state.
    #[tracing::instrument(level = Level::DEBUG, skip(self))]
    pub async fn save(&mut self) -> Result<(), ClientError<I2C::Error>> {
        self.i2c
            .write(self.address, &[Command::Save.byte()])
            .await
            .map_err(ClientError::I2c)
    }

    async fn query<const N: usize>(
        &mut self,
        cmd: Command,
    ) -> Result<[u8; N], ClientError<I2C::Error>> {
        let mut out = [0u8; N];
        self.i2c
            .write_read(self.address, &[cmd.byte()], &mut out)
            .await
            .map_err(ClientError::I2c)?;
        Ok(out)
    }
}

// === impl ClientError ===

impl<E> From<i2c_tlv_proto::Error> for ClientError<E> {
    fn from(error: i2c_tlv_proto::Error) -> Self {
        ClientError::Proto(error)
    }
}

impl<E: fmt::Debug> fmt::Display for ClientError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::I2c(error) => write!(f, "I2C error: {error:?}"),
            ClientError::Proto(error) => fmt::Display::fmt(error, f),
            ClientError::Device(status) => write!(f, "device reported an error: {status:?}"),
        }
    }
}
