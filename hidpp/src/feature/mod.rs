//! Declarative HID++2.0 feature and function definitions.
//!
//! A [`FeatureDef`] names a feature ID and documents it, a [`FunctionDef`]
//! does the same for one function of a feature. Both are pure metadata; the
//! behavior lives in typed wrappers such as [`root::RootFeature`] which issue
//! requests through [`crate::session::ProtocolSession::call`].

use crate::nibble::U4;

pub mod registry;
pub mod root;

/// Describes a HID++2.0 feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FeatureDef {
    /// The globally unique feature ID.
    pub id: u16,

    /// The name of the feature as found in Logitech's documentation.
    pub name: &'static str,

    /// The functions of the feature known to this crate.
    pub functions: &'static [FunctionDef],
}

/// Describes a single function of a HID++2.0 feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FunctionDef {
    /// The ID of the feature this function belongs to.
    pub feature: u16,

    /// The ID of the function, sent in the high nibble of the fourth report
    /// byte.
    pub id: U4,

    /// The name of the function.
    pub name: &'static str,

    /// The argument and return layout of the function.
    pub doc: &'static str,
}

impl FunctionDef {
    /// Defines a function of `feature`.
    ///
    /// Panics if `id` does not fit into a nibble. As definitions are
    /// constants, this surfaces at compile time.
    pub const fn new(feature: u16, id: u8, name: &'static str, doc: &'static str) -> Self {
        assert!(id <= 0x0f, "function IDs are 4 bits wide");

        Self {
            feature,
            id: U4::from_lo(id),
            name,
            doc,
        }
    }
}

/// A bitfield describing some properties of a feature.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FeatureType {
    /// An obsolete feature is a feature that has been replaced by a newer one,
    /// but is advertised in order for older SWs to still be able to support the
    /// feature.
    pub obsolete: bool,

    /// A SW hidden feature is a feature that should not be known/managed/used
    /// by end user configuration SW.
    pub hidden: bool,

    /// A hidden feature that has been disabled for user software. Used for
    /// internal testing and manufacturing.
    pub engineering: bool,

    /// A manufacturing feature that can be permanently deactivated.
    pub manufacturing_deactivatable: bool,

    /// A compliance feature that can be permanently deactivated.
    pub compliance_deactivatable: bool,
}

impl From<u8> for FeatureType {
    fn from(value: u8) -> Self {
        Self {
            obsolete: value & (1 << 7) != 0,
            hidden: value & (1 << 6) != 0,
            engineering: value & (1 << 5) != 0,
            manufacturing_deactivatable: value & (1 << 4) != 0,
            compliance_deactivatable: value & (1 << 3) != 0,
        }
    }
}

/// Represents information about a specific feature as returned by
/// [`root::RootFeature::get_feature`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FeatureInformation {
    /// The index of the feature in the feature table.
    /// This is used as the addressing byte for invocations of its functions.
    pub index: u8,

    /// The type of the feature.
    pub typ: FeatureType,

    /// The latest supported version of the feature.
    ///
    /// Devices only supporting version 1 of the root feature report `0` for
    /// all features.
    pub version: u8,
}
