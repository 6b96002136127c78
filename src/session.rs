//! Device session: one transport, its cached identity, and the state machine
//! governing control and frame-write operations.
//!
//! ```text
//!  Disconnected ──open──▶ Connecting ──handshake──▶ Idle ◀──ready poll / stop──┐
//!                                                    │                          │
//!                                                    └──write accepted──▶ Streaming
//!
//!  any ──close──▶ Closed          any ──fatal transport error──▶ Faulted
//! ```
//!
//! A session never retries. Transient conditions come back as
//! [`Error::Busy`]/[`Error::NotReady`]; fatal ones fault the session and every
//! later call except [`close`](DeviceSession::close) fails with
//! [`Error::SessionFaulted`].

use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::protocols::helios::protocol::{self, Command};
use crate::transport::{Transport, TransportConfig, TransportError};
use crate::types::{
    Capabilities, DeviceIdentity, DeviceStatus, Point, PointExt, PointHighRes, SessionState,
    TransportKind, WriteFrameFlags, WriteStatus, MAX_NAME_LEN,
};

/// A connection to one device.
pub struct DeviceSession {
    transport: Box<dyn Transport>,
    state: SessionState,
    identity: DeviceIdentity,
    /// Set once a handshake has read the identity.
    identified: bool,
    sdk_version: u8,
}

impl DeviceSession {
    /// Wrap a transport. The session starts Disconnected; call [`open`](Self::open).
    pub fn new(transport: Box<dyn Transport>, config: &TransportConfig) -> Self {
        let identity = DeviceIdentity {
            name: String::new(),
            kind: transport.kind(),
            firmware_version: 0,
            capabilities: Capabilities::empty(),
            endpoint: transport.endpoint().to_string(),
        };
        Self {
            transport,
            state: SessionState::Disconnected,
            identity,
            identified: false,
            sdk_version: config.sdk_version,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Claim the transport and read the device identity.
    ///
    /// Opening an Idle or Streaming session does nothing.
    pub fn open(&mut self) -> Result<()> {
        match self.state {
            SessionState::Idle | SessionState::Streaming => return Ok(()),
            SessionState::Closed => return Err(Error::SessionClosed),
            SessionState::Faulted => return Err(Error::SessionFaulted),
            SessionState::Disconnected | SessionState::Connecting => {}
        }

        self.state = SessionState::Connecting;
        if let Err(e) = self.transport.open() {
            if e.is_open_failure() {
                log::debug!("{}: open failed: {}", self.identity.endpoint, e);
            } else {
                log::warn!("{}: open failed: {}", self.identity.endpoint, e);
            }
            self.state = SessionState::Disconnected;
            return Err(Error::Open(e));
        }

        match self.handshake() {
            Ok(()) => {
                self.state = SessionState::Idle;
                log::info!(
                    "{}: opened '{}' (firmware {}, {:?})",
                    self.identity.endpoint,
                    self.identity.name,
                    self.identity.firmware_version,
                    self.identity.capabilities
                );
                Ok(())
            }
            Err(e) => Err(self.fault(e)),
        }
    }

    fn handshake(&mut self) -> std::result::Result<(), TransportError> {
        self.transport.reset()?;
        self.transport
            .send_control(&Command::SetSdkVersion(self.sdk_version).encode())?;

        let reply = self.transport.exchange(
            &Command::GetFirmwareVersion.encode(),
            protocol::REPLY_FIRMWARE_VERSION,
        )?;
        let firmware_version = protocol::parse_firmware_version(&reply)?;

        let reply = self
            .transport
            .exchange(&Command::GetName.encode(), protocol::REPLY_NAME)?;
        let name = protocol::parse_name(&reply)?;

        self.identity.firmware_version = firmware_version;
        self.identity.capabilities = Capabilities::for_firmware(self.identity.kind, firmware_version);
        self.identity.name = name;
        self.identified = true;
        Ok(())
    }

    /// Release the transport. Idempotent; a Streaming device is sent a
    /// best-effort stop first.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.state == SessionState::Streaming {
            if let Err(e) = self.transport.send_control(&Command::Stop.encode()) {
                log::debug!("{}: stop on close failed: {}", self.identity.endpoint, e);
            }
        }
        self.transport.close();
        log::debug!("{}: closed ({})", self.identity.endpoint, self.state);
        self.state = SessionState::Closed;
    }

    /// Move to Faulted, release the transport and produce the error to return.
    fn fault(&mut self, err: TransportError) -> Error {
        log::warn!(
            "{}: transport failure while {}: {}",
            self.identity.endpoint,
            self.state,
            err
        );
        self.state = SessionState::Faulted;
        self.transport.close();
        Error::Transport(err)
    }

    /// Map a failed control exchange. Transient errors leave the state alone.
    fn control_failure(&mut self, err: TransportError) -> Error {
        if err.is_transient() {
            Error::Busy
        } else {
            self.fault(err)
        }
    }

    /// Fails unless the session holds a live connection.
    fn ensure_connected(&self) -> Result<()> {
        match self.state {
            SessionState::Idle | SessionState::Streaming => Ok(()),
            SessionState::Closed => Err(Error::SessionClosed),
            SessionState::Faulted => Err(Error::SessionFaulted),
            SessionState::Disconnected | SessionState::Connecting => Err(Error::NotReady),
        }
    }

    fn send_command(&mut self, command: Command<'_>) -> Result<()> {
        self.transport
            .send_control(&command.encode())
            .map_err(|e| self.control_failure(e))
    }

    // =========================================================================
    // Identity
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn endpoint(&self) -> &str {
        &self.identity.endpoint
    }

    pub fn kind(&self) -> TransportKind {
        self.identity.kind
    }

    /// Cached device name.
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn is_usb(&self) -> bool {
        self.identity.kind == TransportKind::Usb
    }

    pub fn firmware_version(&self) -> u32 {
        self.identity.firmware_version
    }

    pub fn supports_higher_resolutions(&self) -> bool {
        self.identity.supports_higher_resolutions()
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// True while Idle or Streaming.
    pub fn is_connected(&self) -> bool {
        self.ensure_connected().is_ok()
    }

    /// Store a new name on the device.
    ///
    /// Names longer than [`MAX_NAME_LEN`] bytes or containing NUL are rejected
    /// and the previous name is kept.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        if name.len() > MAX_NAME_LEN {
            return Err(Error::invalid_argument(format!(
                "name is {} bytes, maximum is {}",
                name.len(),
                MAX_NAME_LEN
            )));
        }
        if name.contains('\0') {
            return Err(Error::invalid_argument("name contains a NUL byte"));
        }
        self.ensure_connected()?;

        self.send_command(Command::SetName(name))?;
        self.identity.name = name.to_string();
        log::debug!("{}: renamed to '{}'", self.identity.endpoint, name);
        Ok(())
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Poll the device's readiness.
    ///
    /// A Ready reply while Streaming completes the pending frame and moves the
    /// session back to Idle. A poll that times out reports Busy.
    pub fn status(&mut self) -> Result<DeviceStatus> {
        self.ensure_connected()?;

        match self.transport.poll_status() {
            Ok(status) => {
                if status == DeviceStatus::Ready && self.state == SessionState::Streaming {
                    log::trace!("{}: frame complete", self.identity.endpoint);
                    self.state = SessionState::Idle;
                }
                Ok(status)
            }
            Err(e) if e.is_transient() => Ok(DeviceStatus::Busy),
            Err(e) => Err(self.fault(e)),
        }
    }

    /// Halt output.
    ///
    /// From Idle the stop command is sent best-effort, since a device that
    /// reported ready may still be repeating its last frame; a failed send is
    /// logged and the session stays Idle. From Streaming the pending frame is
    /// aborted and the session returns to Idle. A transient failure there
    /// reports Busy with no state change, any other failure faults.
    pub fn stop(&mut self) -> Result<()> {
        self.ensure_connected()?;

        match self.transport.send_control(&Command::Stop.encode()) {
            Ok(()) => {
                if self.state == SessionState::Streaming {
                    log::debug!("{}: stopped", self.identity.endpoint);
                }
                self.state = SessionState::Idle;
                Ok(())
            }
            Err(e) if self.state == SessionState::Idle => {
                log::debug!("{}: stop while idle failed: {}", self.identity.endpoint, e);
                Ok(())
            }
            Err(e) => Err(self.control_failure(e)),
        }
    }

    /// Open (`true`) or close (`false`) the output shutter.
    pub fn set_shutter(&mut self, open: bool) -> Result<()> {
        self.ensure_connected()?;
        self.send_command(Command::SetShutter(open))
    }

    /// Erase the device firmware, leaving it in its bootloader.
    ///
    /// Only accepted from Idle. On success the device leaves application mode
    /// and the session is Closed.
    pub fn erase_firmware(&mut self) -> Result<()> {
        self.ensure_connected()?;
        if self.state == SessionState::Streaming {
            return Err(Error::Busy);
        }

        self.send_command(Command::EraseFirmware)?;
        log::warn!("{}: firmware erased", self.identity.endpoint);
        self.transport.close();
        self.state = SessionState::Closed;
        Ok(())
    }

    // =========================================================================
    // Frames
    // =========================================================================

    /// Write a frame of any format.
    ///
    /// An empty frame is a no-op in every state and never reaches the
    /// transport. Otherwise the frame is validated, checked against the
    /// device capabilities and handed to the transport; on success the
    /// session is Streaming until a status poll reports Ready.
    pub fn write(&mut self, frame: &Frame<'_>) -> Result<WriteStatus> {
        if frame.is_empty() {
            return Ok(WriteStatus::NoOp);
        }
        frame.validate()?;
        if self.identified
            && !self
                .identity
                .capabilities
                .contains(frame.required_capabilities())
        {
            return Err(Error::UnsupportedFormat);
        }
        match self.state {
            SessionState::Idle => {}
            SessionState::Streaming => return Err(Error::Busy),
            SessionState::Closed => return Err(Error::SessionClosed),
            SessionState::Faulted => return Err(Error::SessionFaulted),
            SessionState::Disconnected | SessionState::Connecting => return Err(Error::NotReady),
        }

        let payload = frame.encode()?;
        match self.transport.send_frame(&payload) {
            Ok(_) => {
                log::trace!(
                    "{}: wrote {} {} points at {} pps",
                    self.identity.endpoint,
                    frame.points.len(),
                    frame.points.format_name(),
                    frame.pps
                );
                self.state = SessionState::Streaming;
                Ok(WriteStatus::Written)
            }
            Err(TransportError::Busy) => Err(Error::Busy),
            Err(TransportError::Malformed(msg)) => Err(Error::InvalidArgument(msg)),
            Err(e) => Err(self.fault(e)),
        }
    }

    /// Write a frame of standard points.
    pub fn write_frame(
        &mut self,
        pps: u32,
        flags: WriteFrameFlags,
        points: &[Point],
    ) -> Result<WriteStatus> {
        self.write(&Frame::new(pps, flags, points))
    }

    /// Write a frame of high-resolution points.
    pub fn write_frame_high_resolution(
        &mut self,
        pps: u32,
        flags: WriteFrameFlags,
        points: &[PointHighRes],
    ) -> Result<WriteStatus> {
        self.write(&Frame::new(pps, flags, points))
    }

    /// Write a frame of extended points.
    pub fn write_frame_extended(
        &mut self,
        pps: u32,
        flags: WriteFrameFlags,
        points: &[PointExt],
    ) -> Result<WriteStatus> {
        self.write(&Frame::new(pps, flags, points))
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("state", &self.state)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
