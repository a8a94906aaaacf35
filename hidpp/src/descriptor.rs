//! Classifies raw HID nodes by their report descriptor.
//!
//! Only nodes declaring a vendor-defined usage page can speak HID++, so the
//! check in [`has_vendor_page`] is what decides whether a node is worth
//! talking to at all. Items are decoded as described in sections 5 and 6 of
//! the "Device Class Definition for HID".

use hidreport::{Field, Report, ReportDescriptor, Usage, UsageId, UsagePage};

use crate::protocol::{LONG_REPORT_ID, SHORT_REPORT_ID};

/// hidapi defines this as the maximum EXPECTED size of report descriptors.
pub const MAX_REPORT_DESCRIPTOR_LENGTH: usize = 4096;

const SHORT_REPORT_USAGE_PAGE: u16 = 0xff00;
const SHORT_REPORT_USAGE: u16 = 0x0001;

const LONG_REPORT_USAGE_PAGE: u16 = 0xff00;
const LONG_REPORT_USAGE: u16 = 0x0002;

/// The high byte shared by all vendor-defined usage pages (`0xff00..=0xffff`).
const VENDOR_PAGE_MARKER: u8 = 0xff;

/// The type encoded in bits 3-2 of an item prefix.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ItemType {
    Main,
    Global,
    Local,
    Reserved,
}

impl From<u8> for ItemType {
    fn from(prefix: u8) -> Self {
        match (prefix >> 2) & 0b11 {
            0 => Self::Main,
            1 => Self::Global,
            2 => Self::Local,
            _ => Self::Reserved,
        }
    }
}

/// The tag of a `Usage Page` item of type [`ItemType::Global`].
const GLOBAL_TAG_USAGE_PAGE: u8 = 0b0000;

/// A single short item borrowed from a report descriptor.
#[derive(Clone, Copy, Debug)]
struct Item<'a> {
    tag: u8,
    typ: ItemType,
    data: &'a [u8],
}

/// Iterates over the short items of a raw report descriptor.
///
/// Stops at the first item whose data would extend past the end of the
/// descriptor.
struct Items<'a> {
    raw: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Items<'a> {
    type Item = Item<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let prefix = *self.raw.get(self.pos)?;
        let size = match prefix & 0b11 {
            3 => 4,
            size => size as usize,
        };

        let start = self.pos + 1;
        let data = self.raw.get(start..start + size)?;
        self.pos = start + size;

        Some(Item {
            tag: prefix >> 4,
            typ: ItemType::from(prefix),
            data,
        })
    }
}

fn items(raw: &[u8]) -> Items<'_> {
    Items { raw, pos: 0 }
}

/// Checks whether a raw report descriptor declares a vendor-defined usage
/// page.
///
/// A `Usage Page` item counts as vendor-defined if its page is in
/// `0xff00..=0xffff`, i.e. its second data byte is `0xff`. One-byte pages
/// only count if their single data byte is `0xff`.
///
/// Malformed or truncated descriptors never fail; the walk simply ends and
/// reports `false` unless a vendor page was seen before the damage.
pub fn has_vendor_page(descriptor: &[u8]) -> bool {
    items(descriptor).any(|item| {
        item.typ == ItemType::Global
            && item.tag == GLOBAL_TAG_USAGE_PAGE
            && match item.data {
                [page] => *page == VENDOR_PAGE_MARKER,
                [_, high, ..] => *high == VENDOR_PAGE_MARKER,
                [] => false,
            }
    })
}

/// Describes which HID++ report kinds a node declares in its report
/// descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ReportSupport {
    /// Whether the node declares short (7 bytes) HID++ reports.
    pub short: bool,

    /// Whether the node declares long (20 bytes) HID++ reports.
    pub long: bool,
}

impl ReportSupport {
    /// Assumes both report kinds are supported.
    ///
    /// Used when a descriptor passed [`has_vendor_page`] but cannot be parsed
    /// any further.
    pub const ALL: Self = Self {
        short: true,
        long: true,
    };

    /// Whether any HID++ report kind is supported.
    pub fn any(&self) -> bool {
        self.short || self.long
    }
}

/// Determines which HID++ report kinds a raw report descriptor declares.
///
/// This requires a well-formed descriptor, unlike [`has_vendor_page`].
pub fn report_support(descriptor: &[u8]) -> Result<ReportSupport, hidreport::ParserError> {
    let descriptor = ReportDescriptor::try_from(descriptor)?;

    Ok(ReportSupport {
        short: declares_usage(
            &descriptor,
            SHORT_REPORT_ID,
            SHORT_REPORT_USAGE_PAGE,
            SHORT_REPORT_USAGE,
        ),
        long: declares_usage(
            &descriptor,
            LONG_REPORT_ID,
            LONG_REPORT_USAGE_PAGE,
            LONG_REPORT_USAGE,
        ),
    })
}

fn declares_usage(descriptor: &ReportDescriptor, report_id: u8, page: u16, usage: u16) -> bool {
    descriptor
        .find_input_report(&[report_id])
        .and_then(|report| report.fields().first())
        .and_then(|field| match field {
            Field::Array(arr) => Some(arr.usage_range()),
            _ => None,
        })
        .is_some_and(|range| {
            range
                .lookup_usage(&Usage::from_page_and_id(
                    UsagePage::from(page),
                    UsageId::from(usage),
                ))
                .is_some()
        })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const VENDOR_DESCRIPTOR: &[u8] = &[
        0x06, 0x00, 0xff, // Usage Page (Vendor Page)
        0x09, 0x00, // Usage (Vendor Usage 0)
        0xa1, 0x01, // Collection (Application)
        0x85, 0x20, // .Report ID (0x20)
        0x75, 0x08, // .Report Size (8)
        0x95, 0x08, // .Report Count (8)
        0x15, 0x00, // .Logical Minimum (0)
        0x26, 0xff, 0x00, // .Logical Maximum (255)
        0x09, 0x00, // .Usage (Vendor Usage 0)
        0x81, 0x00, // .Input (Data,Arr,Abs)
        0x09, 0x00, // .Usage (Vendor Usage 0)
        0x91, 0x00, // .Output (Data,Arr,Abs)
        0xc0, // End Collection
    ];

    /// The short HID++ collection of a receiver interface.
    const SHORT_HIDPP_DESCRIPTOR: &[u8] = &[
        0x06, 0x00, 0xff, // Usage Page (Vendor Page 0xff00)
        0x09, 0x01, // Usage (1)
        0xa1, 0x01, // Collection (Application)
        0x85, 0x10, // .Report ID (0x10)
        0x75, 0x08, // .Report Size (8)
        0x95, 0x06, // .Report Count (6)
        0x15, 0x00, // .Logical Minimum (0)
        0x26, 0xff, 0x00, // .Logical Maximum (255)
        0x09, 0x01, // .Usage (1)
        0x81, 0x00, // .Input (Data,Arr,Abs)
        0x09, 0x01, // .Usage (1)
        0x91, 0x00, // .Output (Data,Arr,Abs)
        0xc0, // End Collection
    ];

    /// The long HID++ collection of a receiver interface.
    const LONG_HIDPP_COLLECTION: &[u8] = &[
        0x06, 0x00, 0xff, // Usage Page (Vendor Page 0xff00)
        0x09, 0x02, // Usage (2)
        0xa1, 0x01, // Collection (Application)
        0x85, 0x11, // .Report ID (0x11)
        0x75, 0x08, // .Report Size (8)
        0x95, 0x13, // .Report Count (19)
        0x15, 0x00, // .Logical Minimum (0)
        0x26, 0xff, 0x00, // .Logical Maximum (255)
        0x09, 0x02, // .Usage (2)
        0x81, 0x00, // .Input (Data,Arr,Abs)
        0x09, 0x02, // .Usage (2)
        0x91, 0x00, // .Output (Data,Arr,Abs)
        0xc0, // End Collection
    ];

    const MOUSE_DESCRIPTOR: &[u8] = &[
        0x05, 0x01, // Usage Page (Generic Desktop)
        0x09, 0x02, // Usage (Mouse)
        0xa1, 0x01, // Collection (Application)
        0x05, 0x09, // .Usage Page (Button)
        0x19, 0x01, // .Usage Minimum (1)
        0x29, 0x03, // .Usage Maximum (3)
        0x15, 0x00, // .Logical Minimum (0)
        0x25, 0x01, // .Logical Maximum (1)
        0x75, 0x01, // .Report Size (1)
        0x95, 0x03, // .Report Count (3)
        0x81, 0x02, // .Input (Data,Var,Abs)
        0x75, 0x05, // .Report Size (5)
        0x95, 0x01, // .Report Count (1)
        0x81, 0x03, // .Input (Cnst,Var,Abs)
        0xc0, // End Collection
    ];

    #[test]
    fn detects_vendor_page() {
        assert!(has_vendor_page(VENDOR_DESCRIPTOR));
    }

    #[test]
    fn rejects_generic_desktop_pages() {
        assert!(!has_vendor_page(&[0x05, 0x01, 0x05, 0x01]));
        assert!(!has_vendor_page(MOUSE_DESCRIPTOR));
    }

    #[test]
    fn logical_maximum_ff_is_not_a_usage_page() {
        // Global tag 0b0010 carrying 0xff must not be mistaken for a page.
        assert!(!has_vendor_page(&[0x26, 0x00, 0xff]));
    }

    #[test]
    fn size_class_three_means_four_bytes() {
        // A 4-byte Logical Minimum swallowing what looks like a vendor page.
        assert!(!has_vendor_page(&[0x17, 0x06, 0x00, 0xff, 0x00]));
        // The same item followed by a real vendor page.
        assert!(has_vendor_page(&[0x17, 0x00, 0x00, 0x00, 0x00, 0x06, 0x00, 0xff]));
    }

    #[test]
    fn truncated_descriptor_is_not_vendor() {
        assert!(!has_vendor_page(&[0x06, 0x00]));
        assert!(!has_vendor_page(&[0x05, 0x01, 0x06]));
        assert!(!has_vendor_page(&[]));
    }

    #[test]
    fn mouse_declares_no_hidpp_reports() {
        let support = report_support(MOUSE_DESCRIPTOR).unwrap();

        assert!(!support.any());
    }

    #[test]
    fn receiver_declares_both_report_kinds() {
        let descriptor = [SHORT_HIDPP_DESCRIPTOR, LONG_HIDPP_COLLECTION].concat();

        assert_eq!(
            report_support(&descriptor).unwrap(),
            ReportSupport {
                short: true,
                long: true
            }
        );
    }

    #[test]
    fn short_collection_alone_declares_short_reports() {
        assert_eq!(
            report_support(SHORT_HIDPP_DESCRIPTOR).unwrap(),
            ReportSupport {
                short: true,
                long: false
            }
        );
    }

    #[test]
    fn long_collection_alone_declares_long_reports() {
        assert_eq!(
            report_support(LONG_HIDPP_COLLECTION).unwrap(),
            ReportSupport {
                short: false,
                long: true
            }
        );
    }

    #[test]
    fn other_vendor_reports_are_not_hidpp() {
        assert!(!report_support(VENDOR_DESCRIPTOR).unwrap().any());
    }

    proptest! {
        #[test]
        fn never_panics_on_arbitrary_bytes(raw in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = has_vendor_page(&raw);
        }
    }
}
