//! Device handles for raw HID nodes.
//!
//! A node path may only be driven by one handle per process at a time. The
//! [`OpenNodeGuard`] held by every handle enforces that through a
//! process-wide registry of open paths.

use std::{
    collections::HashSet,
    fmt,
    io,
    path::{Path, PathBuf},
};

use hidpp::channel::RawHidDevice;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

/// The bus type of USB devices as reported by the kernel.
pub const BUS_USB: u8 = 0x03;

/// The bus, vendor and product triple of a raw HID node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
pub struct DeviceIdentity {
    pub bus: u8,
    pub vendor: u16,
    pub product: u16,
}

impl DeviceIdentity {
    pub const fn usb(vendor: u16, product: u16) -> Self {
        Self {
            bus: BUS_USB,
            vendor,
            product,
        }
    }

    /// The `vendor/product` prefix udev uses in the `PRODUCT` property of USB
    /// devices, e.g. `46d/c53f`.
    pub fn product_prefix(&self) -> String {
        format!("{:x}/{:x}", self.vendor, self.product)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#04x}:{:04x}:{:04x}",
            self.bus, self.vendor, self.product
        )
    }
}

/// An open raw HID node.
pub trait NodeHandle: RawHidDevice {
    /// The path of the device node, unique while the hardware is present.
    fn path(&self) -> &Path;

    /// The human-readable name the kernel reports for the node.
    fn display_name(&self) -> &str;

    fn identity(&self) -> DeviceIdentity;

    /// The raw report descriptor, read once when the node was opened.
    fn report_descriptor(&self) -> &[u8];
}

lazy_static! {
    static ref OPEN_NODES: Mutex<HashSet<PathBuf>> = Mutex::new(HashSet::new());
}

/// Marks a node path as open for as long as the guard lives.
#[derive(Debug)]
pub struct OpenNodeGuard {
    path: PathBuf,
}

impl OpenNodeGuard {
    /// Registers `path` as open.
    ///
    /// Fails with [`HandleError::AlreadyOpen`] if another guard for the same
    /// path is alive.
    pub fn acquire(path: &Path) -> Result<Self, HandleError> {
        if !OPEN_NODES.lock().insert(path.to_path_buf()) {
            return Err(HandleError::AlreadyOpen(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OpenNodeGuard {
    fn drop(&mut self) {
        OPEN_NODES.lock().remove(&self.path);
    }
}

/// Represents an error that occurred when opening or querying a raw HID node.
#[derive(Debug, Error)]
pub enum HandleError {
    /// Indicates that this process already has the node open.
    #[error("`{}` is already open", .0.display())]
    AlreadyOpen(PathBuf),

    /// Indicates that the operating system refused to open the node.
    #[error("permission denied opening `{}`", .0.display())]
    PermissionDenied(PathBuf),

    /// Indicates any other I/O failure on the node.
    #[error("I/O error on `{}`", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl HandleError {
    /// Classifies an I/O error that occurred on `path`.
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied(path.to_path_buf());
        }

        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
