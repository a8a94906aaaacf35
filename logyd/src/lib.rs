//! Discovery of Logitech HID++ receivers and devices.
//!
//! [`discovery::Discovery`] follows hotplug events of a [`discovery::Platform`]
//! and keeps a [`discovery::tree::DeviceTree`] of every vendor-capable raw HID
//! node belonging to known hardware, each wrapped in a probed
//! [`hidpp::session::ProtocolSession`].

#[cfg(not(target_os = "linux"))]
compile_error!("logyd only supports Linux hosts");

pub mod discovery;
pub mod handle;
pub mod linux;
