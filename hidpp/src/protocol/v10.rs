//! Implements functionality specific to HID++1.0.
//!
//! HID++1.0 interprets the addressing byte of a message as a sub ID and the
//! function/software byte as a register address.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::Message;

/// Represents a globally defined sub ID of a HID++1.0 message.
///
/// This enum only includes sub IDs that are defined globally across all
/// devices. Most devices (e.g. the Unifying Receiver) define additional sub IDs
/// specific to their functionality.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[non_exhaustive]
#[repr(u8)]
pub enum MessageType {
    /// Used to set a 3-byte register value.
    SetRegister = 0x80,

    /// Used to retrieve a 3-byte register value.
    GetRegister = 0x81,

    /// Used to set a 16-byte register value.
    SetLongRegister = 0x82,

    /// Used to retrieve a 16-byte register value.
    GetLongRegister = 0x83,

    /// Used to indicate an error response. The error code included in the
    /// message can be mapped using [`ErrorType::try_from`].
    Error = 0x8f,
}

/// Represents the type of an error a HID++1.0 device returns as part of a
/// message with the [`MessageType::Error`] type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[non_exhaustive]
#[repr(u8)]
pub enum ErrorType {
    /// No error.
    Success = 0x00,

    /// The sub ID of a sent message is invalid.
    ///
    /// This is what a HID++1.0-only device answers to a HID++2.0 request, as
    /// it reads the feature index as a sub ID.
    InvalidSubId = 0x01,

    /// The address included in a sent message is invalid.
    InvalidAddress = 0x02,

    /// The value included in a sent message is invalid.
    InvalidValue = 0x03,

    /// A connection request failed on the receiver's side.
    ConnectFail = 0x04,

    /// The receiver indicates that too many devices are connected to it.
    TooManyDevices = 0x05,

    /// The receiver indicates that something already exists.
    AlreadyExists = 0x06,

    /// The receiver is currently handling a downstream (to device) message and
    /// cannot process a second one.
    Busy = 0x07,

    /// Trying to send a message to a device index where there is no device
    /// paired.
    UnknownDevice = 0x08,

    /// The addressed device is in disconnected mode and cannot receive
    /// commands until the user interacts with it again.
    ResourceError = 0x09,

    /// A sent request is not available in the current context.
    RequestUnavailable = 0x0a,

    /// A request parameter has an unsupported value.
    InvalidParamValue = 0x0b,

    /// The PIN code a device was wrong.
    WrongPinCode = 0x0c,
}

/// The content of a HID++1.0 error message.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ErrorReply {
    /// The sub ID of the request the error refers to.
    pub sub_id: u8,

    /// The register address of the request the error refers to.
    pub address: u8,

    /// The raw error code.
    pub code: u8,
}

impl ErrorReply {
    /// Extracts the error content of a message if its sub ID marks it as a
    /// HID++1.0 error.
    ///
    /// The layout is `[0x8f, sub_id, address, code]` starting at the
    /// addressing byte.
    pub fn parse(msg: &Message) -> Option<Self> {
        let header = msg.header();
        if header.addressing_byte != u8::from(MessageType::Error) {
            return None;
        }

        let args = msg.args();
        Some(Self {
            sub_id: header.function_and_sw(),
            address: args[0],
            code: args[1],
        })
    }

    /// Maps the raw error code to a known error type.
    pub fn error_type(&self) -> Option<ErrorType> {
        ErrorType::try_from(self.code).ok()
    }
}
