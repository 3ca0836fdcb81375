use serde::{Deserialize, Serialize};

/// Attachment of a received message, pointing into the stored body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub media_type: String,
    pub file_path: String,
    pub offset: u64,
    pub length: u64,
}

/// Attachment descriptor supplied by the client for an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutAttachment {
    pub id: String,
    pub content_type: String,
    pub file_path: String,
}
