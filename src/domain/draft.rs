use crate::domain::attachment::OutAttachment;
use serde::{Deserialize, Serialize};

/// Composed outbound message as written to the draft send request slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftMessage {
    pub uuid: String,
    pub recipients: Vec<String>,
    pub attachments: Vec<OutAttachment>,
}
