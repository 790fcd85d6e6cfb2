//! JSON payloads of the SSE test service protocol.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const CAPABILITY_BOM: &str = "bom";
pub const CAPABILITY_COMMENTS: &str = "comments";
pub const CAPABILITY_EVENT_TYPE_LISTENERS: &str = "event-type-listeners";
pub const CAPABILITY_HEADERS: &str = "headers";
pub const CAPABILITY_LAST_EVENT_ID: &str = "last-event-id";
pub const CAPABILITY_POST: &str = "post";
pub const CAPABILITY_READ_TIMEOUT: &str = "read-timeout";
pub const CAPABILITY_RESTART: &str = "restart";

/// Every capability a test may ask for.
pub const ALL_CAPABILITIES: &[&str] = &[
    CAPABILITY_BOM,
    CAPABILITY_COMMENTS,
    CAPABILITY_EVENT_TYPE_LISTENERS,
    CAPABILITY_HEADERS,
    CAPABILITY_LAST_EVENT_ID,
    CAPABILITY_POST,
    CAPABILITY_READ_TIMEOUT,
    CAPABILITY_RESTART,
];

pub const COMMAND_RESTART: &str = "restart";
pub const COMMAND_LISTEN: &str = "listen";

/// Body of the request that starts an SSE client in the test service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStreamParams {
    pub tag: String,
    pub callback_url: String,
    pub stream_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
}

/// Body of a command sent to an existing SSE client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParams {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<ListenParams>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenParams {
    #[serde(rename = "type")]
    pub event_type: String,
}
