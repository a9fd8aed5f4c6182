//! The target side of the protocol.
//!
//! [`ProtocolI2c`] is driven from two directions. The platform's
//! I<sup>2</sup>C interrupt handler feeds it bus events ([`ProtocolI2c::sta`],
//! [`ProtocolI2c::address`], [`ProtocolI2c::write_byte`],
//! [`ProtocolI2c::read_byte`], [`ProtocolI2c::stp`]). The firmware main loop
//! stages records, reads the inbox, and persists state.
//!
//! Both sides need `&mut` access, so on hardware the facade lives behind
//! whatever critical section the platform uses to share data with its ISR.
use core::fmt;

use i2c_tlv_proto::{Command, OwnedTlv, Status, Tlv, FRAME_LEN, MAX_VALUE_LEN};

use crate::{
    settings::{ProtocolSettings, SettingsError},
    store::{Snapshot, Store, SNAPSHOT_MAX_LEN, SNAPSHOT_VERSION},
};

/// Direction bit of an address byte, from the controller's point of view.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Direction {
    Read,
    Write,
}

/// The I<sup>2</sup>C protocol facade.
pub struct ProtocolI2c<S> {
    settings: ProtocolSettings,
    store: S,
    device_id: u8,
    initialized: bool,
    status: Status,
    state: State,
    /// The command received in the current transaction, kept across a
    /// repeated START so a read can follow it.
    cmd: Option<Command>,
    /// Byte position within the current receive or transmit phase.
    pos: usize,
    send: [u8; FRAME_LEN],
    recv: [u8; FRAME_LEN],
    inbox: Option<OwnedTlv>,
}

/// Bus state machine
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum State {
    Idle,
    /// Waiting for an address after a START or repeated START.
    WaitForAddr,
    /// Addressed for writing, waiting for the command byte.
    WaitForCommand,
    /// Receiving the payload of a command.
    Receive(Command),
    /// Sending the response to a command.
    Transmit(Command),
    /// Not addressed to us, or the transaction failed. Nothing is acknowledged
    /// until the next START.
    Ignore,
}

#[derive(Debug, PartialEq)]
pub enum Error<E> {
    Proto(i2c_tlv_proto::Error),
    /// The controller is reading the send buffer right now.
    Busy,
    Store(E),
    Snapshot(postcard::Error),
    /// The stored snapshot was written with an unknown layout version.
    UnsupportedSnapshot(u8),
    Settings(SettingsError),
    /// The device has no identity to save yet.
    Uninitialized,
}

// === impl ProtocolI2c ===

impl<S: Store> ProtocolI2c<S> {
    pub fn new(settings: ProtocolSettings, store: S) -> Result<Self, Error<S::Error>> {
        settings.validate().map_err(Error::Settings)?;
        Ok(Self {
            settings,
            store,
            device_id: 0,
            initialized: false,
            status: Status::new(),
            state: State::Idle,
            cmd: None,
            pos: 0,
            send: [0; FRAME_LEN],
            recv: [0; FRAME_LEN],
            inbox: None,
        })
    }

    /// Configure the device with a logical identity.
    ///
    /// This resets the bus state machine and clears the send buffer, the
    /// inbox, and the status register. The device does not acknowledge its
    /// address until it has been initialized.
    pub fn initialize(&mut self, device_id: u8) {
        self.device_id = device_id;
        self.initialized = true;
        self.status = Status::new();
        self.state = State::Idle;
        self.cmd = None;
        self.pos = 0;
        self.send = [0; FRAME_LEN];
        self.recv = [0; FRAME_LEN];
        self.inbox = None;
        tracing::info!(
            device_id,
            address = ?format_args!("{:#04x}", self.settings.address),
            "I2C protocol initialized"
        );
    }

    /// The configured device identity.
    #[inline]
    #[must_use]
    pub fn who(&self) -> u8 {
        self.device_id
    }

    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Persist the device identity, and the staged record if the controller
    /// has not read it yet.
    ///
    /// Fails with [`Error::Uninitialized`] before [`ProtocolI2c::initialize`],
    /// so a later [`ProtocolI2c::restore`] never brings up a device without
    /// an identity.
    #[tracing::instrument(level = tracing::Level::DEBUG, skip(self))]
    pub fn sav(&mut self) -> Result<(), Error<S::Error>> {
        if !self.initialized {
            tracing::warn!("refusing to save an uninitialized device");
            return Err(Error::Uninitialized);
        }
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            device_id: self.device_id,
            pending: self.pending_tlv().map(Tlv::into_owned).transpose()?,
        };
        let mut buf = [0u8; SNAPSHOT_MAX_LEN];
        let bytes = postcard::to_slice(&snapshot, &mut buf).map_err(Error::Snapshot)?;
        self.store.store(bytes).map_err(Error::Store)?;
        self.status.set(Status::SAVE_REQUESTED, false);
        tracing::debug!(len = bytes.len(), "device state saved");
        Ok(())
    }

    /// Load state saved by an earlier [`ProtocolI2c::sav`].
    ///
    /// On success the device is initialized with the saved identity, and a
    /// saved pending record is staged again. Returns `Ok(false)` if nothing
    /// was saved.
    #[tracing::instrument(level = tracing::Level::DEBUG, skip(self))]
    pub fn restore(&mut self) -> Result<bool, Error<S::Error>> {
        let mut buf = [0u8; SNAPSHOT_MAX_LEN];
        let Some(bytes) = self.store.load(&mut buf).map_err(Error::Store)? else {
            tracing::debug!("no saved device state");
            return Ok(false);
        };

        // check the version before decoding, the rest of the layout depends
        // on it.
        match bytes.first() {
            Some(&SNAPSHOT_VERSION) => {}
            Some(&version) => {
                tracing::warn!(version, "unsupported snapshot version");
                return Err(Error::UnsupportedSnapshot(version));
            }
            None => {
                return Err(Error::Snapshot(
                    postcard::Error::DeserializeUnexpectedEnd,
                ))
            }
        }
        let snapshot: Snapshot = postcard::from_bytes(bytes).map_err(Error::Snapshot)?;

        self.initialize(snapshot.device_id);
        if let Some(pending) = snapshot.pending {
            self.stage(pending.as_tlv())?;
        }
        Ok(true)
    }

    /// Stage a record for the controller to read.
    ///
    /// The first `length` bytes of `buf` are copied into the send buffer, so
    /// `buf` may be reused as soon as this returns.
    #[tracing::instrument(level = tracing::Level::DEBUG, skip(self, buf))]
    pub fn set_tlv(&mut self, kind: u8, length: u8, buf: &[u8]) -> Result<(), Error<S::Error>> {
        let len = length as usize;
        if len > MAX_VALUE_LEN {
            return Err(i2c_tlv_proto::Error::ValueTooLong.into());
        }
        let value = buf
            .get(..len)
            .ok_or(i2c_tlv_proto::Error::InsufficientSize)?;
        if self.is_sending() {
            tracing::debug!("controller is reading the send buffer");
            return Err(Error::Busy);
        }
        self.stage(Tlv::new(kind, value)?)?;
        Ok(())
    }

    /// `true` once the staged record has been read in full, or if nothing is
    /// staged.
    #[inline]
    #[must_use]
    pub fn tlv_status(&self) -> bool {
        !self.status.get(Status::TLV_PENDING)
    }

    /// The send buffer, holding `[type, length, value..]`.
    ///
    /// Call [`ProtocolI2c::publish`] after filling it in place. Like
    /// [`ProtocolI2c::set_tlv`], this fails with [`Error::Busy`] while the
    /// controller is reading the buffer.
    pub fn sen(&mut self) -> Result<&mut [u8], Error<S::Error>> {
        if self.is_sending() {
            return Err(Error::Busy);
        }
        Ok(&mut self.send)
    }

    /// Mark a record written directly through [`ProtocolI2c::sen`] as
    /// pending.
    pub fn publish(&mut self) -> Result<(), Error<S::Error>> {
        if self.is_sending() {
            return Err(Error::Busy);
        }
        let tlv = Tlv::decode_from(&self.send)?;
        tracing::debug!(kind = tlv.kind, len = tlv.value.len(), "record published");
        self.status.set(Status::TLV_PENDING, true);
        Ok(())
    }

    /// Take the last record written by the controller.
    pub fn take_received(&mut self) -> Option<OwnedTlv> {
        self.status.set(Status::RX_READY, false);
        self.inbox.take()
    }

    #[inline]
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    #[inline]
    #[must_use]
    pub fn save_requested(&self) -> bool {
        self.status.get(Status::SAVE_REQUESTED)
    }

    /// Perform work the controller requested over the bus. Call from the
    /// firmware main loop.
    pub fn poll(&mut self) -> Result<(), Error<S::Error>> {
        if self.settings.save_on_request && self.save_requested() {
            self.sav()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    // === bus events ===

    /// A START or repeated START condition.
    pub fn sta(&mut self) {
        let repeated = self.state != State::Idle;
        if repeated {
            self.finish_phase();
        } else {
            self.cmd = None;
        }
        self.pos = 0;
        self.state = State::WaitForAddr;
        tracing::trace!(repeated, "START");
    }

    /// A STOP condition. Commits the transaction.
    pub fn stp(&mut self) {
        self.finish_phase();
        self.state = State::Idle;
        self.cmd = None;
        self.pos = 0;
        tracing::trace!("STOP");
    }

    /// An address byte. Returns `true` if the target acknowledges it.
    pub fn address(&mut self, addr: u8, dir: Direction) -> bool {
        if self.state != State::WaitForAddr {
            tracing::trace!(state = ?self.state, "address outside of START");
            self.state = State::Ignore;
            return false;
        }
        if !self.initialized || addr != self.settings.address {
            tracing::trace!(addr = ?format_args!("{addr:#04x}"), "not addressed");
            self.state = State::Ignore;
            return false;
        }

        self.pos = 0;
        self.state = match dir {
            Direction::Write => State::WaitForCommand,
            Direction::Read => State::Transmit(self.cmd.unwrap_or(Command::ReadTlv)),
        };
        tracing::trace!(?dir, state = ?self.state, "addressed");
        true
    }

    /// A data byte written by the controller. Returns `true` to `ACK` it.
    pub fn write_byte(&mut self, byte: u8) -> bool {
        match self.state {
            State::WaitForCommand => match Command::from_byte(byte) {
                Ok(cmd) => {
                    tracing::debug!(?cmd, "command");
                    self.cmd = Some(cmd);
                    self.pos = 0;
                    self.state = State::Receive(cmd);
                    true
                }
                Err(error) => self.fail(error),
            },
            State::Receive(Command::WriteTlv) => match self.recv.get_mut(self.pos) {
                Some(slot) => {
                    *slot = byte;
                    self.pos += 1;
                    true
                }
                None => self.fail(i2c_tlv_proto::Error::InsufficientSize),
            },
            // other commands take no payload; extra bytes are harmless.
            State::Receive(_) => true,
            _ => false,
        }
    }

    /// The next byte to send to the controller.
    pub fn read_byte(&mut self) -> u8 {
        let State::Transmit(cmd) = self.state else {
            return self.settings.idle_byte;
        };
        let pos = self.pos;
        self.pos = self.pos.saturating_add(1);

        let byte = match cmd {
            Command::Who if pos == 0 => Some(self.device_id),
            Command::Status if pos == 0 => {
                let bits = self.status.bits();
                self.status.set(Status::ERROR, false);
                Some(bits)
            }
            // nothing staged, or already delivered
            Command::ReadTlv if self.tlv_status() => None,
            Command::ReadTlv if pos < self.send_len() => Some(self.send[pos]),
            _ => None,
        };
        byte.unwrap_or(self.settings.idle_byte)
    }

    // === internals ===

    fn is_sending(&self) -> bool {
        self.state == State::Transmit(Command::ReadTlv)
    }

    /// Length of the record in the send buffer, or 0 if it does not hold a
    /// valid one.
    fn send_len(&self) -> usize {
        Tlv::decode_from(&self.send)
            .map(|tlv| tlv.encoded_len())
            .unwrap_or(0)
    }

    fn pending_tlv(&self) -> Option<Tlv<'_>> {
        if self.tlv_status() {
            return None;
        }
        Tlv::decode_from(&self.send).ok()
    }

    fn stage(&mut self, tlv: Tlv<'_>) -> Result<(), i2c_tlv_proto::Error> {
        tlv.encode_to(&mut self.send)?;
        self.status.set(Status::TLV_PENDING, true);
        tracing::debug!(kind = tlv.kind, len = tlv.value.len(), "record staged");
        Ok(())
    }

    fn fail(&mut self, error: i2c_tlv_proto::Error) -> bool {
        tracing::warn!(%error, state = ?self.state, "protocol error");
        self.status.set(Status::ERROR, true);
        self.state = State::Ignore;
        false
    }

    /// End the current receive or transmit phase, at a STOP or repeated
    /// START.
    fn finish_phase(&mut self) {
        match self.state {
            State::Receive(Command::WriteTlv) => self.commit_received(),
            State::Receive(Command::Save) => {
                tracing::debug!("save requested");
                self.status.set(Status::SAVE_REQUESTED, true);
            }
            State::Transmit(Command::ReadTlv) => {
                if !self.tlv_status() && self.pos >= self.send_len() {
                    tracing::debug!("staged record delivered");
                    self.status.set(Status::TLV_PENDING, false);
                }
            }
            _ => {}
        }
    }

    fn commit_received(&mut self) {
        let result = Tlv::decode_from(&self.recv[..self.pos]).and_then(|tlv| {
            if tlv.encoded_len() == self.pos {
                tlv.into_owned()
            } else {
                // more bytes than the length byte accounts for
                Err(i2c_tlv_proto::Error::InsufficientSize)
            }
        });
        match result {
            Ok(tlv) => {
                if self.inbox.is_some() {
                    tracing::debug!("replacing unread record");
                }
                tracing::debug!(kind = tlv.kind, len = tlv.value.len(), "record received");
                self.inbox = Some(tlv);
                self.status.set(Status::RX_READY, true);
            }
            Err(error) => {
                tracing::warn!(%error, len = self.pos, "malformed record");
                self.status.set(Status::ERROR, true);
            }
        }
    }
}

impl<S> fmt::Debug for ProtocolI2c<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolI2c")
            .field("settings", &self.settings)
            .field("device_id", &self.device_id)
            .field("initialized", &self.initialized)
            .field("status", &self.status)
            .field("state", &self.state)
            .field("cmd", &self.cmd)
            .finish_non_exhaustive()
    }
}

// === impl Error ===

impl<E> From<i2c_tlv_proto::Error> for Error<E> {
    fn from(error: i2c_tlv_proto::Error) -> Self {
        Error::Proto(error)
    }
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Proto(error) => fmt::Display::fmt(error, f),
            Error::Busy => f.write_str("send buffer is being read by the controller"),
            Error::Store(error) => write!(f, "store error: {error:?}"),
            Error::Snapshot(error) => write!(f, "snapshot encoding error: {error}"),
            Error::UnsupportedSnapshot(version) => {
                write!(f, "unsupported snapshot version {version}")
            }
            Error::Settings(error) => fmt::Display::fmt(error, f),
            Error::Uninitialized => f.write_str("device is not initialized"),
        }
    }
}
