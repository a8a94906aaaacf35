//! Implements the Root feature (ID `0x0000`) that every device supports by
//! default.

use super::{
    FeatureInformation,
    FeatureType,
    registry::{ROOT_GET_FEATURE, ROOT_GET_PROTOCOL_VERSION},
};
use crate::{
    channel::RawHidDevice,
    protocol::{Message, ProtocolVersion},
    session::{ProtocolSession, SessionError},
};

/// The index of the root feature in every feature table.
const ROOT_INDEX: u8 = 0x00;

/// Implements the `Root` / `0x0000` feature that every HID++2.0 device
/// supports by default.
pub struct RootFeature<'a, T: RawHidDevice> {
    session: &'a ProtocolSession<T>,
}

impl<'a, T: RawHidDevice> RootFeature<'a, T> {
    pub(crate) fn new(session: &'a ProtocolSession<T>) -> Self {
        Self { session }
    }

    /// Retrieves information about a specific feature ID, including its index
    /// in the feature table, its type and its version.
    ///
    /// If the feature is not supported by the device, [`None`] is returned.
    pub fn get_feature(&self, id: u16) -> Result<Option<FeatureInformation>, SessionError<T::Error>> {
        let response = self.session.request(
            self.session.preferred_kind(),
            ROOT_INDEX,
            ROOT_GET_FEATURE.id,
            &id.to_be_bytes(),
        )?;

        let args = response.args();
        if args[0] == 0 {
            return Ok(None);
        }

        Ok(Some(FeatureInformation {
            index: args[0],
            typ: FeatureType::from(args[1]),
            version: args[2],
        }))
    }

    /// Pings the device with an arbitrary data byte. The device will respond
    /// with the same data if communication succeeds.
    pub fn ping(&self, data: u8) -> Result<u8, SessionError<T::Error>> {
        let response = self.request_protocol_version(data)?;
        Ok(response.args()[2])
    }

    /// Retrieves the HID++2.0 protocol version of the device.
    ///
    /// HID++1.0 devices do not implement this function and reply with an
    /// error message instead, surfaced as [`SessionError::Hidpp10`].
    pub fn protocol_version(&self) -> Result<ProtocolVersion, SessionError<T::Error>> {
        let args = self.request_protocol_version(0x00)?.extend_args();

        Ok(ProtocolVersion::V20 {
            protocol_num: args[0],
            target_sw: args[1],
        })
    }

    /// Sends a raw `GetProtocolVersion` request with `data` in the ping slot
    /// and returns the undecoded reply.
    pub(crate) fn request_protocol_version(
        &self,
        data: u8,
    ) -> Result<Message, SessionError<T::Error>> {
        self.session.request(
            self.session.preferred_kind(),
            ROOT_INDEX,
            ROOT_GET_PROTOCOL_VERSION.id,
            &[0x00, 0x00, data],
        )
    }
}
