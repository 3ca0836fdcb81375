use serde::{Deserialize, Serialize};

/// Decoded "message waiting" push describing where to fetch the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub uuid: String,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub from: String,
    pub content_location: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub expiry: u64,
}
