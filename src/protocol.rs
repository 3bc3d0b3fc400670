//! Gateway wire frames.
//!
//! All traffic over the gateway socket is JSON text frames with a `type`
//! field. Outbound frames are built here; the inbound `request` frame is
//! deserialized in [`crate::relay`]. `taskid` is echoed back verbatim — the
//! gateway sends both numeric and string ids.

use serde_json::{json, Value};

/// Error code reported for every failed relay task, regardless of cause.
/// The gateway keys on this exact value.
pub const RELAY_ERROR_CODE: u32 = 50_000_001;

/// Raw status reported alongside [`RELAY_ERROR_CODE`].
pub const RELAY_ERROR_STATUS: u16 = 500;

/// Canned network/geolocation fingerprint returned in the `html` field of
/// every successful relay response. The gateway expects this exact payload
/// in place of the fetched body.
pub const CANNED_FINGERPRINT: &str = "JTdCJTIyY291bnRyeSUyMiUzQSUyMklEJTIyJTJDJTIyYXNuJTIyJTNBJTdCJTIyYXNudW0lMjIlM0E5MzQxJTJDJTIyb3JnX25hbWUlMjIlM0ElMjJQVCUyMElORE9ORVNJQSUyMENPTU5FVFMlMjBQTFVTJTIyJTdEJTJDJTIyZ2VvJTIyJTNBJTdCJTIyY2l0eSUyMiUzQSUyMiUyMiUyQyUyMnJlZ2lvbiUyMiUzQSUyMiUyMiUyQyUyMnJlZ2lvbl9uYW1lJTIyJTNBJTIyJTIyJTJDJTIycG9zdGFsX2NvZGUlMjIlM0ElMjIlMjIlMkMlMjJsYXRpdHVkZSUyMiUzQS02LjE3NSUyQyUyMmxvbmdpdHVkZSUyMiUzQTEwNi44Mjg2JTJDJTIydHolMjIlM0ElMjJBc2lhJTJGSmFrYXJ0YSUyMiU3RCU3RA==";

/// Quick shape gate applied before attempting to parse an inbound frame:
/// anything that does not look like a JSON object is dropped without a log.
pub fn looks_like_object(raw: &str) -> bool {
    raw.starts_with('{') && raw.ends_with('}')
}

/// Registration frame identifying the account and its virtual device.
/// Fire-and-forget; no acknowledgement is awaited.
pub fn register_frame(user_id: &str, device_id: &str) -> String {
    json!({
        "type": "register",
        "user": user_id,
        "dev": device_id,
    })
    .to_string()
}

/// Keepalive frame sent every heartbeat tick while connected.
pub fn ping_frame() -> String {
    json!({ "type": "ping" }).to_string()
}

/// Successful relay reply. `raw_status` is the upstream HTTP status; the
/// payload fields are fixed.
pub fn response_frame(taskid: &Value, raw_status: u16) -> String {
    json!({
        "type": "response",
        "taskid": taskid,
        "result": {
            "parsed": "",
            "html": CANNED_FINGERPRINT,
            "rawStatus": raw_status,
        },
    })
    .to_string()
}

/// Failed relay reply. Every failure class maps to the same constant code.
pub fn error_frame(taskid: &Value, error: &str) -> String {
    json!({
        "type": "error",
        "taskid": taskid,
        "error": error,
        "errorCode": RELAY_ERROR_CODE,
        "rawStatus": RELAY_ERROR_STATUS,
    })
    .to_string()
}
