//! Drives a device through the controller client over the loopback bus.

use embedded_hal_async::i2c::{ErrorKind, I2c, NoAcknowledgeSource};
use futures::executor::block_on;
use protocol_i2c::{
    client::{ClientError, TlvClient},
    loopback::LoopbackBus,
    proto::{Command, Status, Tlv, DEFAULT_ADDRESS, FRAME_LEN},
    MemStore, ProtocolI2c, ProtocolSettings,
};

fn trace_init() {
    use tracing_subscriber::{filter::EnvFilter, prelude::*};
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("protocol_i2c=debug"));
    let _res = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .without_time()
        .finish()
        .try_init();
}

fn device(id: u8) -> ProtocolI2c<MemStore> {
    trace_init();
    let mut dev = ProtocolI2c::new(ProtocolSettings::default(), MemStore::new()).unwrap();
    dev.initialize(id);
    dev
}

#[test]
fn who_and_status() {
    let mut dev = device(0x19);
    let mut client = TlvClient::new(LoopbackBus::new(&mut dev), DEFAULT_ADDRESS);
    block_on(async {
        assert_eq!(client.who().await.unwrap(), 0x19);
        let status = client.status().await.unwrap();
        assert_eq!(status, Status::new());
    });
}

#[test]
fn staged_record_round_trip() {
    let mut dev = device(1);
    dev.set_tlv(0x0C, 4, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    assert!(!dev.tlv_status());

    let mut client = TlvClient::new(LoopbackBus::new(&mut dev), DEFAULT_ADDRESS);
    block_on(async {
        assert!(client.status().await.unwrap().get(Status::TLV_PENDING));

        let mut buf = [0u8; FRAME_LEN];
        let tlv = client.read_tlv(&mut buf).await.unwrap().unwrap();
        assert_eq!(tlv, Tlv::new(0x0C, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap());

        // the full record was clocked out, so nothing is pending any more
        let mut buf = [0u8; FRAME_LEN];
        assert_eq!(client.read_tlv(&mut buf).await.unwrap(), None);
    });

    assert!(dev.tlv_status());
}

#[test]
fn read_tlv_reports_device_error() {
    let mut dev = device(1);
    dev.set_tlv(0x0C, 1, &[0x5A]).unwrap();

    // the length byte promises 4 value bytes, only 1 follows
    let mut bus = LoopbackBus::new(&mut dev);
    block_on(bus.write(DEFAULT_ADDRESS, &[Command::WriteTlv.byte(), 0x44, 4, 0xBE])).unwrap();

    let mut client = TlvClient::new(bus, DEFAULT_ADDRESS);
    block_on(async {
        let mut buf = [0u8; FRAME_LEN];
        match client.read_tlv(&mut buf).await {
            Err(ClientError::Device(status)) => {
                assert!(status.get(Status::ERROR));
                assert!(status.get(Status::TLV_PENDING));
            }
            res => panic!("expected a device error, got {res:?}"),
        }

        // the error was reported once, the record is still there
        let mut buf = [0u8; FRAME_LEN];
        let tlv = client.read_tlv(&mut buf).await.unwrap().unwrap();
        assert_eq!(tlv, Tlv::new(0x0C, &[0x5A]).unwrap());
    });
}

#[test]
fn controller_writes_record() {
    let mut dev = device(1);
    let mut client = TlvClient::new(LoopbackBus::new(&mut dev), DEFAULT_ADDRESS);
    block_on(async {
        let tlv = Tlv::new(0x7A, b"ping").unwrap();
        client.write_tlv(&tlv).await.unwrap();
        let status = client.status().await.unwrap();
        assert!(status.get(Status::RX_READY));
        assert!(!status.get(Status::ERROR));
    });

    let received = dev.take_received().unwrap();
    assert_eq!(received.kind, 0x7A);
    assert_eq!(&received.value[..], b"ping");
}

#[test]
fn save_request_is_serviced_by_poll() {
    let mut dev = device(0x44);
    dev.set_tlv(0x01, 2, &[1, 2]).unwrap();
    {
        let mut client = TlvClient::new(LoopbackBus::new(&mut dev), DEFAULT_ADDRESS);
        block_on(async {
            client.save().await.unwrap();
            assert!(client.status().await.unwrap().get(Status::SAVE_REQUESTED));
        });
    }

    dev.poll().unwrap();
    assert!(!dev.save_requested());
    let blob = dev.store().blob().unwrap();

    // a fresh boot restores the identity and the unread record
    let mut rebooted =
        ProtocolI2c::new(ProtocolSettings::default(), MemStore::with_blob(blob).unwrap()).unwrap();
    assert!(rebooted.restore().unwrap());
    let mut client = TlvClient::new(LoopbackBus::new(&mut rebooted), DEFAULT_ADDRESS);
    block_on(async {
        assert_eq!(client.who().await.unwrap(), 0x44);
        let mut buf = [0u8; FRAME_LEN];
        let tlv = client.read_tlv(&mut buf).await.unwrap().unwrap();
        assert_eq!(tlv.value, &[1, 2]);
    });
}

#[test]
fn wrong_address_is_an_i2c_error() {
    let mut dev = device(1);
    let mut client = TlvClient::new(LoopbackBus::new(&mut dev), DEFAULT_ADDRESS + 1);
    let res = block_on(client.who());
    assert_eq!(
        res,
        Err(ClientError::I2c(ErrorKind::NoAcknowledge(
            NoAcknowledgeSource::Address
        )))
    );
}

#[test]
fn uninitialized_device_is_silent() {
    trace_init();
    let mut dev = ProtocolI2c::new(ProtocolSettings::default(), MemStore::new()).unwrap();
    let mut client = TlvClient::new(LoopbackBus::new(&mut dev), DEFAULT_ADDRESS);
    assert!(matches!(
        block_on(client.status()),
        Err(ClientError::I2c(ErrorKind::NoAcknowledge(_)))
    ));
}
