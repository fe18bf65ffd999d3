//! Raw upstream event records → canonical device updates.

use std::collections::HashMap;

use crate::endpoint::{DeviceStatus, Extension};

/// Transport prefixes of devices we track. Anything else (trunks, local
/// channels, custom device states) is not an extension.
pub const DEVICE_PREFIXES: [&str; 2] = ["PJSIP/", "SIP/"];

/// Event names that carry a device state
pub const DEVICE_STATE_EVENTS: [&str; 2] = ["DeviceStateChange", "DeviceState"];

/// Marker closing a bulk device-state listing
pub const LIST_COMPLETE_EVENT: &str = "DeviceStateListComplete";

/// Event types that never reach the diagnostic log
const NOISY_EVENTS: [&str; 4] = [
    "ChallengeSent",
    "SuccessfulAuth",
    "RequestBadFormat",
    "ChallengeResponseFailed",
];

/// Read access to a key-value event record.
///
/// Implemented for plain maps here; the upstream client's message type gets
/// an impl behind the `ami` feature.
pub trait EventRecord {
    fn field(&self, key: &str) -> Option<&str>;
}

impl EventRecord for HashMap<String, String> {
    fn field(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

impl<T: EventRecord + ?Sized> EventRecord for &T {
    fn field(&self, key: &str) -> Option<&str> {
        (**self).field(key)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceUpdate {
    pub extension: Extension,
    pub status: DeviceStatus,
}

/// What one record means to the core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Normalized {
    Device(DeviceUpdate),
    ListComplete,
    /// A device event that failed a guard (unknown prefix, non-numeric id)
    Ignored,
    /// Not a device event; only interesting for diagnostics
    Other { event: String, noisy: bool },
}

pub fn normalize<R: EventRecord + ?Sized>(record: &R) -> Normalized {
    let Some(event) = record.field("Event") else {
        return Normalized::Ignored;
    };

    if event == LIST_COMPLETE_EVENT {
        return Normalized::ListComplete;
    }

    if !DEVICE_STATE_EVENTS.contains(&event) {
        return Normalized::Other {
            event: event.to_string(),
            noisy: is_noisy(record),
        };
    }

    let Some(device) = record.field("Device") else {
        return Normalized::Ignored;
    };
    let Some(extension) = DEVICE_PREFIXES
        .iter()
        .find_map(|prefix| device.strip_prefix(prefix))
        .and_then(Extension::parse)
    else {
        return Normalized::Ignored;
    };

    let status = DeviceStatus::from_raw(record.field("State").unwrap_or_default());
    Normalized::Device(DeviceUpdate { extension, status })
}

/// Denylist for the diagnostic observer.
pub fn is_noisy<R: EventRecord + ?Sized>(record: &R) -> bool {
    let Some(event) = record.field("Event") else {
        return true;
    };
    NOISY_EVENTS.contains(&event)
        || event.starts_with("RTCP")
        || (event == "UserEvent" && record.field("UserEvent") == Some("CDRPROSYNC"))
}
