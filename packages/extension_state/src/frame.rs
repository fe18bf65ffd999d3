//! Text event-stream frames sent to viewers.

use crate::endpoint::{DeviceStatus, Extension};

/// Sent once, after the initial snapshot
pub const CONNECTED_FRAME: &str = "data: Connected to updates\n\n";

/// Comment-only frame that keeps idle connections open
pub const KEEPALIVE_FRAME: &str = ":\n\n";

/// `data: <extension> <status>\n\n`
pub fn format_update(extension: &Extension, status: DeviceStatus) -> String {
    format!("data: {} {}\n\n", extension, status.label())
}
