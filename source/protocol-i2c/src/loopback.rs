//! A bus that connects a controller directly to a [`ProtocolI2c`] target on
//! the same host.
//!
//! Each [`Operation`] in a transaction is turned into target bus events:
//! a START and address byte before every run of same-direction operations,
//! then data bytes, then a single STOP at the end.
use embedded_hal_async::i2c::{
    ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation, SevenBitAddress,
};

use crate::{store::Store, Direction, ProtocolI2c};

pub struct LoopbackBus<'a, S> {
    target: &'a mut ProtocolI2c<S>,
}

impl<'a, S: Store> LoopbackBus<'a, S> {
    pub fn new(target: &'a mut ProtocolI2c<S>) -> Self {
        Self { target }
    }

    pub fn target(&mut self) -> &mut ProtocolI2c<S> {
        self.target
    }

    /// The controller got a NACK and sends a STOP.
    fn nack(&mut self, source: NoAcknowledgeSource) -> ErrorKind {
        tracing::debug!(?source, "NACK");
        self.target.stp();
        ErrorKind::NoAcknowledge(source)
    }
}

impl<S: Store> ErrorType for LoopbackBus<'_, S> {
    type Error = ErrorKind;
}

impl<S: Store> I2c<SevenBitAddress> for LoopbackBus<'_, S> {
    async fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut current = None;
        for op in operations.iter_mut() {
            let dir = match op {
                Operation::Read(_) => Direction::Read,
                Operation::Write(_) => Direction::Write,
            };
            if current != Some(dir) {
                self.target.sta();
                if !self.target.address(address, dir) {
                    return Err(self.nack(NoAcknowledgeSource::Address));
                }
                current = Some(dir);
            }

            match op {
                Operation::Read(buf) => {
                    for byte in buf.iter_mut() {
                        *byte = self.target.read_byte();
                    }
                }
                Operation::Write(buf) => {
                    for &byte in buf.iter() {
                        if !self.target.write_byte(byte) {
                            return Err(self.nack(NoAcknowledgeSource::Data));
                        }
                    }
                }
            }
        }
        self.target.stp();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{settings::ProtocolSettings, store::MemStore, test_util::trace_init};
    use futures::executor::block_on;
    use i2c_tlv_proto::{Command, DEFAULT_ADDRESS, IDLE_BYTE};

    fn device() -> ProtocolI2c<MemStore> {
        trace_init();
        let mut dev = ProtocolI2c::new(ProtocolSettings::default(), MemStore::new()).unwrap();
        dev.initialize(0x2A);
        dev
    }

    #[test]
    fn wrong_address_nacks() {
        let mut dev = device();
        let mut bus = LoopbackBus::new(&mut dev);
        let res = block_on(bus.write(0x11, &[Command::Save.byte()]));
        assert_eq!(
            res,
            Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))
        );
        assert!(!bus.target().save_requested());
    }

    #[test]
    fn unknown_command_nacks_data() {
        let mut dev = device();
        let mut bus = LoopbackBus::new(&mut dev);
        let res = block_on(bus.write(DEFAULT_ADDRESS, &[0x7E, 1, 2]));
        assert_eq!(res, Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)));
    }

    #[test]
    fn adjacent_writes_are_one_phase() {
        let mut dev = device();
        let mut bus = LoopbackBus::new(&mut dev);
        let header = [Command::WriteTlv.byte(), 0x01, 2];
        let value = [0xAA, 0xBB];
        let mut ops = [Operation::Write(&header), Operation::Write(&value)];
        block_on(bus.transaction(DEFAULT_ADDRESS, &mut ops)).unwrap();

        let tlv = dev.take_received().unwrap();
        assert_eq!(&tlv.value[..], &value);
    }

    #[test]
    fn write_read_uses_repeated_start() {
        let mut dev = device();
        let mut bus = LoopbackBus::new(&mut dev);
        let mut out = [0u8; 2];
        block_on(bus.write_read(DEFAULT_ADDRESS, &[Command::Who.byte()], &mut out)).unwrap();
        assert_eq!(out, [0x2A, IDLE_BYTE]);
    }
}
