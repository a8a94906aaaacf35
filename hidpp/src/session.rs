//! Implements request/response sessions with a single HID++ node.

use std::{
    collections::HashMap,
    error::Error,
    fmt,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    channel::{ChannelError, LockedChannel, RawHidDevice},
    descriptor::ReportSupport,
    feature::{FunctionDef, registry, root::RootFeature},
    nibble::U4,
    protocol::{
        CodecError,
        Message,
        MessageHeader,
        ProtocolVersion,
        ReportKind,
        v10::ErrorReply,
    },
};

/// The device index addressing the node itself rather than a paired device.
pub const SELF_DEVICE_INDEX: u8 = 0xff;

/// The addressing byte of HID++2.0 error replies.
const HIDPP20_ERROR: u8 = 0xff;

/// Configures the addressing and timing of a [`ProtocolSession`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SessionConfig {
    /// How long to wait for the reply to a request.
    pub timeout: Duration,

    /// How long each read of the pre-request drain may wait for stale reports.
    pub flush_timeout: Duration,

    /// The device index put into every request.
    pub device_index: u8,

    /// The initial software ID put into every request.
    pub software_id: U4,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            flush_timeout: Duration::from_millis(1),
            device_index: SELF_DEVICE_INDEX,
            software_id: U4::from_lo(0x1),
        }
    }
}

/// Where a node sits in the device tree.
///
/// Receivers answer protocol probes even if no paired device is reachable, so
/// the same reply means different things depending on the position.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum TreePosition {
    /// A receiver or a directly wired device.
    Root,

    /// A device reachable through the transport of a receiver.
    Satellite,
}

/// The result of the protocol probe performed when a session is opened.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ProtocolState {
    /// No probe was performed yet.
    Unprobed,

    /// The node answered with the given protocol version.
    Online(ProtocolVersion),

    /// The node is a satellite its receiver could not reach.
    Offline,

    /// The node gave no usable answer.
    Unknown,
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unprobed => write!(f, "unprobed"),
            Self::Online(version) => write!(f, "online, {version}"),
            Self::Offline => write!(f, "offline"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A HID++ session over a single raw HID node.
///
/// Only one request is outstanding at a time; replies are not correlated to
/// requests beyond that ordering.
pub struct ProtocolSession<T: RawHidDevice> {
    channel: LockedChannel<T>,
    config: SessionConfig,
    position: TreePosition,
    support: ReportSupport,
    software_id: AtomicU8,
    rotating_software_id: AtomicBool,
    state: Mutex<ProtocolState>,

    /// Feature indices resolved via [`RootFeature::get_feature`].
    feature_indices: Mutex<HashMap<u16, u8>>,
}

impl<T: RawHidDevice> ProtocolSession<T> {
    /// Creates a session without probing the node.
    pub fn new(
        device: T,
        position: TreePosition,
        support: ReportSupport,
        config: SessionConfig,
    ) -> Self {
        Self {
            channel: LockedChannel::new(device),
            config,
            position,
            support,
            software_id: AtomicU8::new(config.software_id.to_lo()),
            rotating_software_id: AtomicBool::new(false),
            state: Mutex::new(ProtocolState::Unprobed),
            feature_indices: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a session and immediately probes the protocol version of the
    /// node.
    ///
    /// The probe is informational; the session is usable whatever it yields.
    pub fn open(
        device: T,
        position: TreePosition,
        support: ReportSupport,
        config: SessionConfig,
    ) -> Self {
        let session = Self::new(device, position, support, config);
        session.probe();
        session
    }

    /// The locked channel the session communicates over.
    pub fn channel(&self) -> &LockedChannel<T> {
        &self.channel
    }

    pub fn position(&self) -> TreePosition {
        self.position
    }

    pub fn report_support(&self) -> ReportSupport {
        self.support
    }

    pub fn device_index(&self) -> u8 {
        self.config.device_index
    }

    /// The result of the last probe.
    pub fn state(&self) -> ProtocolState {
        *self.state.lock()
    }

    pub fn software_id(&self) -> U4 {
        U4::from_lo(self.software_id.load(Ordering::Relaxed))
    }

    pub fn set_software_id(&self, sw_id: U4) {
        self.software_id.store(sw_id.to_lo(), Ordering::Relaxed);
    }

    /// Makes the software ID advance after every request, which eases telling
    /// replies to consecutive requests apart in traces.
    pub fn set_rotating_software_id(&self, rotating: bool) {
        self.rotating_software_id.store(rotating, Ordering::Relaxed);
    }

    fn next_software_id(&self) -> U4 {
        let current = self.software_id();
        if self.rotating_software_id.load(Ordering::Relaxed) {
            self.set_software_id(current.next_nonzero());
        }
        current
    }

    /// Sends a protocol version request and records the resulting state.
    ///
    /// A HID++1.0 error reply means "online with HID++1.0" for receivers and
    /// wired devices but "offline" for satellites, as a receiver answers on
    /// behalf of a paired device it cannot reach.
    pub fn probe(&self) -> ProtocolState {
        let state = match self.root().request_protocol_version(rand::random()) {
            Ok(reply) => match ErrorReply::parse(&reply) {
                Some(error) => self.hidpp10_state(&error),
                None if reply.header().addressing_byte == 0x00 => {
                    let args = reply.args();
                    ProtocolState::Online(ProtocolVersion::V20 {
                        protocol_num: args[0],
                        target_sw: args[1],
                    })
                },
                None => ProtocolState::Unknown,
            },
            Err(SessionError::Hidpp10(error)) => self.hidpp10_state(&error),
            Err(err) => {
                debug!(error = %err, "protocol probe failed");
                ProtocolState::Unknown
            },
        };

        debug!(position = ?self.position, %state, "probed protocol");
        *self.state.lock() = state;
        state
    }

    fn hidpp10_state(&self, error: &ErrorReply) -> ProtocolState {
        debug!(error = ?error.error_type(), code = error.code, "HID++1.0 error reply");

        match self.position {
            TreePosition::Root => ProtocolState::Online(ProtocolVersion::V10),
            TreePosition::Satellite => ProtocolState::Offline,
        }
    }

    /// The report kind for requests that fit a short report: short if the
    /// node declares it, long otherwise.
    pub fn preferred_kind(&self) -> ReportKind {
        if self.support.short {
            ReportKind::Short
        } else {
            ReportKind::Long
        }
    }

    /// Writes a raw request and reads exactly one raw reply.
    ///
    /// Buffered and stale reports are discarded first. Returns an empty buffer
    /// if no reply arrived within `timeout`.
    pub fn command(&self, buf: &[u8], timeout: Duration) -> Result<Vec<u8>, SessionError<T::Error>> {
        self.channel.with_transaction(|tx| {
            tx.drain(self.config.flush_timeout)?;
            tx.write(buf)?;
            Ok(tx.read(timeout)?)
        })
    }

    /// Sends a message addressed to `feature_index`/`function_id` and decodes
    /// the reply.
    pub fn request(
        &self,
        kind: ReportKind,
        feature_index: u8,
        function_id: U4,
        args: &[u8],
    ) -> Result<Message, SessionError<T::Error>> {
        let supported = match kind {
            ReportKind::Short => self.support.short,
            ReportKind::Long => self.support.long,
        };
        if !supported {
            return Err(SessionError::ReportKindNotSupported(kind));
        }

        let msg = Message::new(
            kind,
            MessageHeader {
                device_index: self.config.device_index,
                addressing_byte: feature_index,
                function_id,
                software_id: self.next_software_id(),
            },
            args,
        )?;

        let raw = self.command(&msg.encode(), self.config.timeout)?;
        if raw.is_empty() {
            return Err(SessionError::Timeout);
        }

        let reply = Message::decode(&raw)?;
        trace!(request = ?msg, reply = ?reply, "completed request");

        if let Some(error) = ErrorReply::parse(&reply).filter(|error| error.sub_id == feature_index) {
            return Err(SessionError::Hidpp10(error));
        }

        match reply.header().addressing_byte {
            HIDPP20_ERROR if reply.header().function_and_sw() == feature_index => {
                Err(SessionError::Feature(reply.args()[1]))
            },
            _ => Ok(reply),
        }
    }

    /// Invokes a declared function.
    ///
    /// The feature index is resolved through the root feature and cached; the
    /// root feature itself is always at index `0`.
    pub fn call(
        &self,
        kind: ReportKind,
        function: &FunctionDef,
        args: &[u8],
    ) -> Result<Message, SessionError<T::Error>> {
        let feature_index = self
            .feature_index(function.feature)?
            .ok_or(SessionError::FeatureNotSupported(function.feature))?;

        trace!(
            feature = registry::lookup(function.feature).map_or("unknown", |feat| feat.name),
            function = function.name,
            "calling function"
        );
        self.request(kind, feature_index, function.id, args)
    }

    /// Resolves the index of a feature on the node.
    ///
    /// Returns `Ok(None)` if the node does not support the feature.
    pub fn feature_index(&self, feature_id: u16) -> Result<Option<u8>, SessionError<T::Error>> {
        if feature_id == registry::ROOT_ID {
            return Ok(Some(0));
        }

        if let Some(&index) = self.feature_indices.lock().get(&feature_id) {
            return Ok(Some(index));
        }

        let Some(info) = self.root().get_feature(feature_id)? else {
            return Ok(None);
        };

        self.feature_indices.lock().insert(feature_id, info.index);
        Ok(Some(info.index))
    }

    /// The root feature every HID++2.0 node supports.
    pub fn root(&self) -> RootFeature<'_, T> {
        RootFeature::new(self)
    }

    /// Pings the node with a random byte and checks that it is echoed back.
    pub fn is_responsive(&self) -> bool {
        let data = rand::random();
        matches!(self.root().ping(data), Ok(echo) if echo == data)
    }
}

/// Represents an error that occurred during a HID++ request.
#[derive(Debug, Error)]
pub enum SessionError<E: Error> {
    /// Indicates that the underlying channel failed.
    #[error("the HID channel returned an error")]
    Channel(#[from] ChannelError<E>),

    /// Indicates that a request could not be built or a reply not decoded.
    #[error("malformed HID++ message")]
    Codec(#[from] CodecError),

    /// Indicates that no reply arrived in time.
    #[error("the device did not reply in time")]
    Timeout,

    /// Indicates that the node does not declare the requested report kind.
    #[error("the node does not support {0:?} reports")]
    ReportKindNotSupported(ReportKind),

    /// Indicates that the node does not support the requested feature.
    #[error("the device does not support feature {0:#06x}")]
    FeatureNotSupported(u16),

    /// Indicates that the device answered with a HID++1.0 error message.
    #[error("the device returned HID++1.0 error {:#04x}", .0.code)]
    Hidpp10(ErrorReply),

    /// Indicates that the device answered with a HID++2.0 error code.
    #[error("the device returned HID++2.0 error {0:#04x}")]
    Feature(u8),
}
