//! Implements the framing of HID++ reports.
//!
//! HID++ uses two report sizes on the wire, both sharing the same layout:
//!
//! ```text
//! [report_id, device_index, addressing_byte, (function << 4) | sw_id, args...]
//! ```
//!
//! The addressing byte is the feature index for HID++2.0 and the sub ID for
//! HID++1.0.

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::nibble::{self, U4};

pub mod v10;

/// The report ID of short HID++ reports.
pub const SHORT_REPORT_ID: u8 = 0x10;

/// The total length of short HID++ reports, including the report ID.
pub const SHORT_REPORT_LENGTH: usize = 7;

/// The report ID of long HID++ reports.
pub const LONG_REPORT_ID: u8 = 0x11;

/// The total length of long HID++ reports, including the report ID.
pub const LONG_REPORT_LENGTH: usize = 20;

/// The amount of bytes preceding the arguments of every report.
pub const HEADER_LENGTH: usize = 4;

/// The two report kinds HID++ messages are transported in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum ReportKind {
    /// A 7 byte report carrying 3 argument bytes.
    Short = 0x10,

    /// A 20 byte report carrying 16 argument bytes.
    Long = 0x11,
}

impl ReportKind {
    /// The report ID sent as the first byte of the report.
    pub fn report_id(self) -> u8 {
        self.into()
    }

    /// The total size of the report in bytes.
    pub const fn report_size(self) -> usize {
        match self {
            Self::Short => SHORT_REPORT_LENGTH,
            Self::Long => LONG_REPORT_LENGTH,
        }
    }

    /// The amount of argument bytes the report carries.
    pub const fn args_len(self) -> usize {
        self.report_size() - HEADER_LENGTH
    }

    /// Looks up the report kind announced by the first byte of raw data.
    pub fn from_report_id(id: u8) -> Option<Self> {
        Self::try_from(id).ok()
    }
}

/// Returns the size of the report starting with the given report ID, if it is
/// a HID++ report.
pub fn report_size(report_id: u8) -> Option<usize> {
    ReportKind::from_report_id(report_id).map(ReportKind::report_size)
}

/// Represents the protocol version a device supports.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ProtocolVersion {
    /// The older HID++1.0 protocol. Mostly used for receivers.
    V10,

    /// All newer protocols starting from HID++2.0.
    V20 {
        /// Hints the host software whether it should support the device.
        ///
        /// `protocol_num = 2` : Intended target SW is Logitech SetPoint\
        /// `protocol_num = 3` : Intended OEM SW described in `target_sw` field\
        /// `protocol_num = 4` : Intended target SW described in `target_sw`
        /// field
        protocol_num: u8,

        /// When `protocol_num >= 3` this field further hints at which software
        /// should support the device. Otherwise the value is zero.
        target_sw: u8,
    },
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V10 => write!(f, "HID++1.0"),
            Self::V20 {
                protocol_num,
                target_sw,
            } => write!(f, "HID++2.0 ({protocol_num}.{target_sw})"),
        }
    }
}

/// Represents the header that starts every HID++ message after the report ID.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MessageHeader {
    /// The index of the device involved in the communication.
    pub device_index: u8,

    /// The feature index (HID++2.0) or sub ID (HID++1.0) of the message.
    pub addressing_byte: u8,

    /// The ID of the function involved in the communication.
    pub function_id: U4,

    /// The ID of the software communicating with the device.
    pub software_id: U4,
}

impl MessageHeader {
    /// The packed function and software ID byte as sent on the wire.
    pub fn function_and_sw(&self) -> u8 {
        nibble::combine(self.function_id, self.software_id)
    }
}

/// Represents a HID++ message consisting of a header and fixed-size arguments.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Message {
    /// A short HID++ message with 3 bytes of arguments.
    Short(MessageHeader, [u8; SHORT_REPORT_LENGTH - HEADER_LENGTH]),

    /// A long HID++ message with 16 bytes of arguments.
    Long(MessageHeader, [u8; LONG_REPORT_LENGTH - HEADER_LENGTH]),
}

impl Message {
    /// Builds a message of the given kind, right-padding `args` with zeroes.
    ///
    /// Fails with [`CodecError::TooManyArguments`] if `args` does not fit into
    /// the report.
    pub fn new(kind: ReportKind, header: MessageHeader, args: &[u8]) -> Result<Self, CodecError> {
        if args.len() > kind.args_len() {
            return Err(CodecError::TooManyArguments {
                capacity: kind.args_len(),
                actual: args.len(),
            });
        }

        Ok(match kind {
            ReportKind::Short => {
                let mut data = [0u8; SHORT_REPORT_LENGTH - HEADER_LENGTH];
                data[..args.len()].copy_from_slice(args);
                Self::Short(header, data)
            },
            ReportKind::Long => {
                let mut data = [0u8; LONG_REPORT_LENGTH - HEADER_LENGTH];
                data[..args.len()].copy_from_slice(args);
                Self::Long(header, data)
            },
        })
    }

    /// The report kind the message is transported in.
    pub fn kind(&self) -> ReportKind {
        match self {
            Self::Short(..) => ReportKind::Short,
            Self::Long(..) => ReportKind::Long,
        }
    }

    /// Extracts the header of the message.
    pub fn header(&self) -> MessageHeader {
        match *self {
            Self::Short(header, _) => header,
            Self::Long(header, _) => header,
        }
    }

    /// The argument bytes of the message.
    pub fn args(&self) -> &[u8] {
        match self {
            Self::Short(_, args) => args,
            Self::Long(_, args) => args,
        }
    }

    /// Extracts the arguments of the message and fits them into an array
    /// capable of containing the longest possible arguments, filling the rest
    /// up with zeroes.
    pub fn extend_args(&self) -> [u8; LONG_REPORT_LENGTH - HEADER_LENGTH] {
        match *self {
            Self::Short(_, args) => {
                let mut data = [0; LONG_REPORT_LENGTH - HEADER_LENGTH];
                data[..SHORT_REPORT_LENGTH - HEADER_LENGTH].copy_from_slice(&args);
                data
            },
            Self::Long(_, args) => args,
        }
    }

    /// Encodes the message into exactly [`ReportKind::report_size`] bytes.
    pub fn encode(&self) -> Vec<u8> {
        let header = self.header();
        let mut buf = Vec::with_capacity(self.kind().report_size());

        buf.push(self.kind().report_id());
        buf.push(header.device_index);
        buf.push(header.addressing_byte);
        buf.push(header.function_and_sw());
        buf.extend_from_slice(self.args());

        buf
    }

    /// Decodes a message from a single raw report.
    ///
    /// The length of `data` has to match the size implied by its report ID.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let Some(&report_id) = data.first() else {
            return Err(CodecError::Empty);
        };

        let kind =
            ReportKind::from_report_id(report_id).ok_or(CodecError::UnknownReportId(report_id))?;

        if data.len() != kind.report_size() {
            return Err(CodecError::LengthMismatch {
                kind,
                expected: kind.report_size(),
                actual: data.len(),
            });
        }

        let (function_id, software_id) = nibble::split(data[3]);
        let header = MessageHeader {
            device_index: data[1],
            addressing_byte: data[2],
            function_id,
            software_id,
        };

        Self::new(kind, header, &data[HEADER_LENGTH..])
    }
}

/// Represents an error that occurred while encoding or decoding a HID++
/// message.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum CodecError {
    /// Indicates that there was no data to decode.
    #[error("cannot decode a message from empty data")]
    Empty,

    /// Indicates that the first byte is neither the short nor the long report
    /// ID.
    #[error("unknown report ID {0:#04x}")]
    UnknownReportId(u8),

    /// Indicates that the data length does not match the size implied by the
    /// report ID.
    #[error("a {kind:?} report has to be {expected} bytes long, got {actual}")]
    LengthMismatch {
        kind: ReportKind,
        expected: usize,
        actual: usize,
    },

    /// Indicates that more arguments were supplied than the report can carry.
    #[error("the report carries at most {capacity} argument bytes, got {actual}")]
    TooManyArguments { capacity: usize, actual: usize },
}
