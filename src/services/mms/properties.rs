use crate::adapters::bus::Variant;
use crate::domain::attachment::Attachment;
use crate::domain::retrieval::RetrieveConf;
use crate::error::Result;
use crate::services::STATUS_PROPERTY;
use crate::storage::MessageStore;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Suffix carriers append to phone-number addresses.
pub const PLMN_SUFFIX: &str = "/TYPE=PLMN";

pub(crate) const STATUS_RECEIVED: &str = "received";
pub(crate) const STATUS_DRAFT: &str = "draft";
pub(crate) const STATUS_READ: &str = "read";

/// Display form of an address: the carrier suffix is dropped, anything else is kept.
#[must_use]
pub fn normalize_address(address: &str) -> &str {
    address.strip_suffix(PLMN_SUFFIX).unwrap_or(address)
}

/// Normalized recipient list; entries may themselves be comma-joined lists.
#[must_use]
pub fn normalize_recipients(to: &[String]) -> Vec<String> {
    to.iter()
        .flat_map(|entry| entry.split(','))
        .filter(|address| !address.is_empty())
        .map(|address| normalize_address(address).to_string())
        .collect()
}

pub(crate) fn format_date(date: OffsetDateTime) -> String {
    date.format(&Rfc3339).unwrap_or_default()
}

pub(crate) fn format_unix_date(secs: u64) -> String {
    let date = i64::try_from(secs)
        .ok()
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    format_date(date)
}

pub(crate) fn now() -> String {
    format_date(OffsetDateTime::now_utc())
}

/// Bus-visible properties of a retrieved message.
///
/// Attachments reference the stored body, so this fails with `NotFound`
/// when the body cannot be resolved in the store.
pub(crate) fn received_properties(store: &MessageStore, conf: &RetrieveConf) -> Result<BTreeMap<String, Variant>> {
    let mut properties = BTreeMap::new();
    properties.insert(STATUS_PROPERTY.to_string(), STATUS_RECEIVED.into());
    properties.insert("Date".to_string(), format_unix_date(conf.date).into());
    if !conf.subject.is_empty() {
        properties.insert("Subject".to_string(), conf.subject.as_str().into());
    }
    if !conf.from.is_empty() {
        properties.insert("Sender".to_string(), normalize_address(&conf.from).into());
    }
    properties.insert("Recipients".to_string(), normalize_recipients(&conf.to).into());
    if let Some(smil) = &conf.smil {
        properties.insert("Smil".to_string(), smil.as_str().into());
    }

    let mut attachments = Vec::with_capacity(conf.data_parts.len());
    if !conf.data_parts.is_empty() {
        let body = store.mms_path(&conf.uuid)?.display().to_string();
        for part in &conf.data_parts {
            attachments.push(Attachment {
                id: part.content_id.clone(),
                media_type: part.media_type.clone(),
                file_path: body.clone(),
                offset: part.offset,
                length: part.length,
            });
        }
    }
    properties.insert("Attachments".to_string(), attachments.into());
    Ok(properties)
}

/// Placeholder properties for a message whose retrieval failed.
pub(crate) fn failed_properties(from: &str) -> BTreeMap<String, Variant> {
    let mut properties = BTreeMap::new();
    properties.insert(STATUS_PROPERTY.to_string(), STATUS_RECEIVED.into());
    properties.insert("Date".to_string(), now().into());
    if !from.is_empty() {
        properties.insert("Sender".to_string(), normalize_address(from).into());
    }
    properties
}

pub(crate) fn draft_properties() -> BTreeMap<String, Variant> {
    let mut properties = BTreeMap::new();
    properties.insert(STATUS_PROPERTY.to_string(), STATUS_DRAFT.into());
    properties.insert("Date".to_string(), now().into());
    properties
}
