use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MessageType;

/// Message envelope exchanged over the connection.
///
/// `Payload` is omitted from the JSON when it is `null`, which is how the
/// peer expects bare messages such as `{"Type":"Ping"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "Type")]
    pub msg_type: MessageType,
    #[serde(rename = "Payload", default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(rename = "RequestID", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Message {
    /// Creates a new message with the given type and payload.
    pub fn new<T: Serialize>(msg_type: MessageType, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            msg_type,
            payload: serde_json::to_value(payload)?,
            request_id: None,
        })
    }

    /// Creates a message without a payload.
    pub fn bare(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            payload: Value::Null,
            request_id: None,
        }
    }

    /// Liveness probe.
    pub fn ping() -> Self {
        Self::bare(MessageType::Ping)
    }

    /// Attaches a request id. Empty ids are treated as absent.
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id.filter(|id| !id.is_empty());
        self
    }

    /// Deserializes the payload into the given type.
    ///
    /// A missing payload is read as an empty object so that payload structs
    /// made of defaulted fields still parse.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        match &self.payload {
            Value::Null => serde_json::from_value(Value::Object(Default::default())),
            v => T::deserialize(v),
        }
    }
}
