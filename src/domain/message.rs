use serde::{Deserialize, Serialize};

/// Last durably completed processing step of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageState {
    Notification,
    Downloaded,
    Retrieved,
    Draft,
}

/// Persisted per-message state, one file per UUID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub uuid: String,
    pub state: MessageState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_location: Option<String>,
}

impl MessageRecord {
    #[must_use]
    pub fn new(uuid: &str, state: MessageState) -> Self {
        Self { uuid: uuid.to_string(), state, content_location: None }
    }

    #[must_use]
    pub fn with_content_location(mut self, content_location: &str) -> Self {
        self.content_location = Some(content_location.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_encoding_is_single_line() {
        let record = MessageRecord::new("abc", MessageState::Notification).with_content_location("http://x/y");
        let encoded = serde_json::to_string(&record).expect("encode");
        assert!(!encoded.contains('\n'));
        assert_eq!(encoded, r#"{"uuid":"abc","state":"NOTIFICATION","contentLocation":"http://x/y"}"#);
    }

    #[test]
    fn test_record_without_location_omits_field() {
        let encoded = serde_json::to_string(&MessageRecord::new("abc", MessageState::Downloaded)).expect("encode");
        assert_eq!(encoded, r#"{"uuid":"abc","state":"DOWNLOADED"}"#);
    }
}
