//! An implementation of the transport side of Logitech's HID++ protocol.
//!
//! Many of Logitech's peripheral devices and their wireless receivers speak
//! HID++, a proprietary protocol tunnelled through vendor-defined HID
//! reports. This crate covers everything between a raw HID node and a typed
//! HID++ call:
//!
//! - [`descriptor`] tells whether a raw node declares a vendor usage page and
//!   which HID++ report kinds it supports.
//! - [`channel`] serializes access to a raw node and splits batched reads
//!   into single reports.
//! - [`protocol`] encodes and decodes short (7 bytes) and long (20 bytes)
//!   reports.
//! - [`session`] runs request/response exchanges, probes the protocol version
//!   and dispatches declared [`feature`] functions.
//!
//! Talking to actual hardware is left to an implementation of
//! [`channel::RawHidDevice`].
//!
//! # Quickstart
//!
//! ```ignore
//! use hidpp::{
//!     descriptor::{self, ReportSupport},
//!     session::{ProtocolSession, SessionConfig, TreePosition},
//! };
//!
//! // `node` implements `RawHidDevice`, `rdesc` is its report descriptor.
//! if !descriptor::has_vendor_page(&rdesc) {
//!     return;
//! }
//!
//! let support = descriptor::report_support(&rdesc).unwrap_or(ReportSupport::ALL);
//! let session = ProtocolSession::open(node, TreePosition::Root, support, SessionConfig::default());
//! println!("{}", session.state());
//!
//! assert_eq!(session.root().ping(0x5a)?, 0x5a);
//! ```

pub mod channel;
pub mod descriptor;
pub mod feature;
pub mod nibble;
pub mod protocol;
pub mod session;
