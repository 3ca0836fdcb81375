use serde::{Deserialize, Serialize};

/// One content part of a retrieved message, addressed inside the stored body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPart {
    pub content_id: String,
    pub media_type: String,
    pub offset: u64,
    pub length: u64,
}

/// Decoded retrieval result for a fully fetched message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveConf {
    pub uuid: String,
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: String,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub date: u64,
    #[serde(default)]
    pub smil: Option<String>,
    #[serde(default)]
    pub data_parts: Vec<DataPart>,
}
