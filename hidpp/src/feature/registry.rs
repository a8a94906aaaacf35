//! Maintains a registry of well-known HID++2.0 features.
//!
//! Entries only label requests; looking a feature up never talks to a device.

use std::collections::HashMap;

use lazy_static::lazy_static;

use super::{FeatureDef, FunctionDef};

pub const ROOT_ID: u16 = 0x0000;
pub const FEATURE_SET_ID: u16 = 0x0001;
pub const DEVICE_TYPE_AND_NAME_ID: u16 = 0x0005;

/// `IRoot` / `0x0000`, supported by every HID++2.0 device at index `0`.
pub const ROOT: FeatureDef = FeatureDef {
    id: ROOT_ID,
    name: "IRoot",
    functions: &[ROOT_GET_FEATURE, ROOT_GET_PROTOCOL_VERSION],
};

pub const ROOT_GET_FEATURE: FunctionDef = FunctionDef::new(
    ROOT_ID,
    0,
    "GetFeature",
    "featureIndex, featureType, featureVersion = GetFeature(featureID)",
);

pub const ROOT_GET_PROTOCOL_VERSION: FunctionDef = FunctionDef::new(
    ROOT_ID,
    1,
    "GetProtocolVersion",
    "protocolNum, targetSw, pingData = GetProtocolVersion(0, 0, pingData)",
);

/// `IFeatureSet` / `0x0001`, used to enumerate all features of a device.
pub const FEATURE_SET: FeatureDef = FeatureDef {
    id: FEATURE_SET_ID,
    name: "IFeatureSet",
    functions: &[FEATURE_SET_GET_COUNT, FEATURE_SET_GET_FEATURE_ID],
};

pub const FEATURE_SET_GET_COUNT: FunctionDef =
    FunctionDef::new(FEATURE_SET_ID, 0, "GetCount", "count = GetCount()");

pub const FEATURE_SET_GET_FEATURE_ID: FunctionDef = FunctionDef::new(
    FEATURE_SET_ID,
    1,
    "GetFeatureID",
    "featureID, featureType, featureVersion = GetFeatureID(featureIndex)",
);

/// `DeviceTypeAndName` / `0x0005`.
pub const DEVICE_TYPE_AND_NAME: FeatureDef = FeatureDef {
    id: DEVICE_TYPE_AND_NAME_ID,
    name: "DeviceTypeAndName",
    functions: &[
        DEVICE_TYPE_AND_NAME_GET_COUNT,
        DEVICE_TYPE_AND_NAME_GET_NAME,
        DEVICE_TYPE_AND_NAME_GET_TYPE,
    ],
};

pub const DEVICE_TYPE_AND_NAME_GET_COUNT: FunctionDef = FunctionDef::new(
    DEVICE_TYPE_AND_NAME_ID,
    0,
    "GetDeviceNameCount",
    "nameLength = GetDeviceNameCount()",
);

pub const DEVICE_TYPE_AND_NAME_GET_NAME: FunctionDef = FunctionDef::new(
    DEVICE_TYPE_AND_NAME_ID,
    1,
    "GetDeviceName",
    "nameChunk[16] = GetDeviceName(charIndex)",
);

pub const DEVICE_TYPE_AND_NAME_GET_TYPE: FunctionDef = FunctionDef::new(
    DEVICE_TYPE_AND_NAME_ID,
    2,
    "GetDeviceType",
    "deviceType = GetDeviceType()",
);

const KNOWN_FEATURES: &[FeatureDef] = &[ROOT, FEATURE_SET, DEVICE_TYPE_AND_NAME];

lazy_static! {
    static ref FEATURES_BY_ID: HashMap<u16, &'static FeatureDef> =
        KNOWN_FEATURES.iter().map(|feat| (feat.id, feat)).collect();
}

/// Looks up a feature by its ID.
pub fn lookup(feature_id: u16) -> Option<&'static FeatureDef> {
    FEATURES_BY_ID.get(&feature_id).copied()
}

/// Looks up a function by its feature ID and function ID.
pub fn lookup_function(feature_id: u16, function_id: u8) -> Option<&'static FunctionDef> {
    lookup(feature_id)?
        .functions
        .iter()
        .find(|func| func.id.to_lo() == function_id)
}

/// Returns all known features.
pub fn all() -> &'static [FeatureDef] {
    KNOWN_FEATURES
}
