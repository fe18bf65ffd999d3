//! Extension identity, canonical status vocabulary and the visibility rule.

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Extensions this long or shorter are hidden from unauthenticated viewers.
pub const SHORT_EXTENSION_MAX_LEN: usize = 4;

/// Numeric PBX extension id.
///
/// Only non-empty all-digit strings are admitted, so anything else is rejected
/// before it can reach the store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Extension(String);

impl Extension {
    pub fn parse(raw: &str) -> Option<Self> {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Extension {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Ord for Extension {
    /// Numeric order without parsing (ids may exceed `u64`); equal values with
    /// different leading zeros fall back to string order.
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.0.trim_start_matches('0');
        let b = other.0.trim_start_matches('0');
        a.len()
            .cmp(&b.len())
            .then_with(|| a.cmp(b))
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Extension {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Canonical, human-readable device status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceStatus {
    #[serde(rename = "In use")]
    InUse,
    #[serde(rename = "Not in use")]
    NotInUse,
    Ringing,
    Busy,
    Unavailable,
    Unknown,
}

impl DeviceStatus {
    pub const ALL: [DeviceStatus; 6] = [
        DeviceStatus::InUse,
        DeviceStatus::NotInUse,
        DeviceStatus::Ringing,
        DeviceStatus::Busy,
        DeviceStatus::Unavailable,
        DeviceStatus::Unknown,
    ];

    /// Map a raw PBX device state (any case) onto the canonical vocabulary.
    pub fn from_raw(state: &str) -> Self {
        match state.trim().to_ascii_uppercase().as_str() {
            "INUSE" => DeviceStatus::InUse,
            "NOT_INUSE" | "IDLE" => DeviceStatus::NotInUse,
            "RINGING" => DeviceStatus::Ringing,
            "BUSY" => DeviceStatus::Busy,
            "UNAVAILABLE" | "INVALID" | "UNKNOWN" | "" => DeviceStatus::Unavailable,
            _ => DeviceStatus::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeviceStatus::InUse => "In use",
            DeviceStatus::NotInUse => "Not in use",
            DeviceStatus::Ringing => "Ringing",
            DeviceStatus::Busy => "Busy",
            DeviceStatus::Unavailable => "Unavailable",
            DeviceStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a canonical status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for DeviceStatus {
    type Err = UnknownStatus;

    /// Parses canonical labels only ("In use", not "INUSE").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceStatus::ALL
            .into_iter()
            .find(|status| status.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// One PBX endpoint as seen by viewers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub extension: Extension,
    /// Only ever set from the descriptor source
    pub description: Option<String>,
    pub status: DeviceStatus,
    /// Reserved; nothing drives it yet
    pub disabled: bool,
}

impl Endpoint {
    pub fn new(extension: Extension, status: DeviceStatus) -> Self {
        Self {
            extension,
            description: None,
            status,
            disabled: false,
        }
    }
}

/// Short extensions are only shown to authenticated viewers.
pub fn is_visible(extension: &Extension, authenticated: bool) -> bool {
    authenticated || extension.len() > SHORT_EXTENSION_MAX_LEN
}
