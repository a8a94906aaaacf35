//! The table of hardware the daemon tracks.

use serde::Serialize;

use crate::handle::DeviceIdentity;

/// The vendor ID of Logitech.
pub const LOGITECH_VENDOR_ID: u16 = 0x046d;

/// What kind of hardware a known bus device is.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
pub enum KnownKind {
    /// A device plugged in directly, speaking HID++ over its own cable.
    Wired,

    /// A wireless receiver multiplexing paired devices.
    Receiver,
}

/// A bus device the daemon tracks.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct KnownDevice {
    pub identity: DeviceIdentity,
    pub kind: KnownKind,
    pub name: &'static str,
}

impl KnownDevice {
    pub const fn new(product: u16, kind: KnownKind, name: &'static str) -> Self {
        Self {
            identity: DeviceIdentity::usb(LOGITECH_VENDOR_ID, product),
            kind,
            name,
        }
    }

    /// Whether the udev `PRODUCT` property of a bus device names this
    /// hardware.
    ///
    /// The property looks like `46d/c53f/111`; the version suffix is ignored.
    pub fn matches_product(&self, product: &str) -> bool {
        let prefix = self.identity.product_prefix();
        product
            .strip_prefix(&prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

/// The hardware tracked by default.
pub const BUILTIN_DEVICES: &[KnownDevice] = &[
    KnownDevice::new(0xc33c, KnownKind::Wired, "G513 keyboard"),
    KnownDevice::new(0xc33e, KnownKind::Wired, "G915 keyboard"),
    KnownDevice::new(0xc33f, KnownKind::Wired, "G815 keyboard"),
    KnownDevice::new(0xc52b, KnownKind::Receiver, "Unifying receiver"),
    KnownDevice::new(0xc539, KnownKind::Receiver, "Lightspeed receiver"),
    KnownDevice::new(0xc53a, KnownKind::Receiver, "Lightspeed receiver"),
    KnownDevice::new(0xc53f, KnownKind::Receiver, "Lightspeed receiver"),
    KnownDevice::new(0xc541, KnownKind::Receiver, "Lightspeed receiver"),
];

/// A static table of known bus devices.
#[derive(Clone, Copy, Debug)]
pub struct KnownDeviceTable {
    entries: &'static [KnownDevice],
}

impl KnownDeviceTable {
    pub const fn new(entries: &'static [KnownDevice]) -> Self {
        Self { entries }
    }

    pub const fn builtin() -> Self {
        Self::new(BUILTIN_DEVICES)
    }

    pub fn entries(&self) -> &'static [KnownDevice] {
        self.entries
    }

    /// Returns every entry matching the given udev `PRODUCT` property.
    pub fn matching<'a>(&self, product: &'a str) -> impl Iterator<Item = &'static KnownDevice> + 'a {
        self.entries
            .iter()
            .filter(move |known| known.matches_product(product))
    }
}

impl Default for KnownDeviceTable {
    fn default() -> Self {
        Self::builtin()
    }
}
