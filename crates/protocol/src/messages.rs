use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Outbound payloads
// ---------------------------------------------------------------------------

/// Login triple sent in `Auth` and attached to every sync push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginPayload {
    #[serde(rename = "Username")]
    pub username: String,
    /// SHA-1 hex digest of the plaintext password.
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Version")]
    pub version: String,
}

/// `SyncState` payload: one changed entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatePayload {
    #[serde(flatten)]
    pub login: LoginPayload,
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// `SyncDevice` payload: one page of the device snapshot.
///
/// `List` is a JSON string holding the array of
/// [`EntitySnapshot`](crate::types::EntitySnapshot)s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncDevicePayload {
    #[serde(flatten)]
    pub login: LoginPayload,
    #[serde(rename = "List")]
    pub list: String,
    #[serde(rename = "TotalCount")]
    pub total_count: usize,
    #[serde(rename = "Page")]
    pub page: usize,
    #[serde(rename = "PageSize")]
    pub page_size: usize,
    #[serde(rename = "HasMore")]
    pub has_more: bool,
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

/// `SyncDevice` request. All fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncDeviceRequest {
    #[serde(rename = "Page", default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    #[serde(rename = "PageSize", default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
    #[serde(rename = "SearchKeyword", default, skip_serializing_if = "Option::is_none")]
    pub search_keyword: Option<String>,
}

/// `DeviceControl` request: service calls to run locally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceControlRequest {
    #[serde(rename = "Rows", default)]
    pub rows: Vec<ControlRow>,
}

/// One service call inside a `DeviceControl` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRow {
    pub domain: String,
    pub service: String,
    #[serde(default)]
    pub data: Value,
}

/// `UpdateEntitys` payload: the entities the peer wants change pushes for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateEntitysPayload {
    #[serde(default)]
    pub entity_ids: Option<Vec<String>>,
}

/// `Error` payload sent by the peer before it gives up on this client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub msg: Option<String>,
}
