use crate::domain::message::{MessageRecord, MessageState};
use crate::domain::notification::NotificationRecord;
use crate::error::{MmsError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

pub mod writer;

pub use writer::ArtifactWriter;
use writer::write_json;

const RECORD_EXT: &str = "db";
const NOTIFICATION_EXT: &str = "m-notify.ind";
const BODY_EXT: &str = "mms";
const SEND_REQUEST_EXT: &str = "m-send.req";
const RESPONSE_EXT: &str = "m-notifyresp.ind";
const CONTEXT_EXT: &str = "context";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreferredContext {
    preferred_context: String,
}

/// UUID-keyed, crash-safe persistence of message state and payload files.
///
/// Records and notification records live under the data root, drafts and
/// send responses under the cache root. The store does no locking: callers
/// serialize access per UUID.
#[derive(Debug, Clone)]
pub struct MessageStore {
    data_dir: PathBuf,
    cache_dir: PathBuf,
}

impl MessageStore {
    /// Opens the store, creating both roots if needed.
    ///
    /// # Errors
    /// Returns an I/O error if a root directory cannot be created.
    pub fn open(data_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&cache_dir)?;
        tracing::debug!(data = %data_dir.display(), cache = %cache_dir.display(), "Message store opened");
        Ok(Self { data_dir, cache_dir })
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Establishes a new record in state `NOTIFICATION`, overwriting any existing one.
    ///
    /// # Errors
    /// Returns an error if the record cannot be written.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub fn create(&self, uuid: &str, content_location: &str) -> Result<()> {
        let record = MessageRecord::new(uuid, MessageState::Notification).with_content_location(content_location);
        write_json(&self.data_path(uuid, RECORD_EXT)?, &record)
    }

    /// Removes the record and whichever payload file is present.
    ///
    /// # Errors
    /// Returns `MmsError::NotFound` if neither the record nor a payload existed.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub fn destroy(&self, uuid: &str) -> Result<()> {
        let mut removed = remove_if_exists(&self.data_path(uuid, RECORD_EXT)?)?;
        removed |= remove_if_exists(&self.data_path(uuid, NOTIFICATION_EXT)?)?;
        removed |= remove_if_exists(&self.data_path(uuid, BODY_EXT)?)?;

        remove_if_exists(&self.cache_path(uuid, SEND_REQUEST_EXT)?)?;
        remove_if_exists(&self.cache_path(uuid, RESPONSE_EXT)?)?;

        if !removed {
            return Err(MmsError::NotFound(format!("no stored state for message {uuid}")));
        }
        tracing::debug!("Message state destroyed");
        Ok(())
    }

    /// Returns a message to "awaiting retry": drops any retrieved body and
    /// persists the notification record verbatim.
    ///
    /// # Errors
    /// Returns an error if the body cannot be removed or the record cannot be written.
    #[tracing::instrument(err(level = "warn"), skip(self, record), fields(uuid = %record.uuid))]
    pub fn update_failed(&self, record: &NotificationRecord) -> Result<()> {
        let notification_path = self.data_path(&record.uuid, NOTIFICATION_EXT)?;
        if remove_if_exists(&self.data_path(&record.uuid, BODY_EXT)?)? {
            tracing::debug!("Discarded partially retrieved body");
        }
        write_json(&notification_path, record)
    }

    /// Moves a fetched body into place and advances the record to `DOWNLOADED`.
    ///
    /// # Errors
    /// Returns `MmsError::NotFound` if no record exists for `uuid`, or an I/O
    /// error if the body cannot be moved.
    #[tracing::instrument(err(level = "warn"), skip(self, body), fields(body = %body.display()))]
    pub fn update_downloaded(&self, uuid: &str, body: &Path) -> Result<()> {
        let record_path = existing(self.data_path(uuid, RECORD_EXT)?)?;
        let body_path = self.data_path(uuid, BODY_EXT)?;

        if let Err(e) = fs::rename(body, &body_path) {
            let _ = fs::remove_file(&body_path);
            return Err(e.into());
        }
        if remove_if_exists(&self.data_path(uuid, NOTIFICATION_EXT)?)? {
            tracing::debug!("Removed notification record after download");
        }

        write_json(&record_path, &MessageRecord::new(uuid, MessageState::Downloaded))
    }

    /// Advances an existing record to `RETRIEVED`.
    ///
    /// # Errors
    /// Returns `MmsError::NotFound` if no record exists for `uuid`.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub fn update_retrieved(&self, uuid: &str) -> Result<()> {
        let record_path = existing(self.data_path(uuid, RECORD_EXT)?)?;
        write_json(&record_path, &MessageRecord::new(uuid, MessageState::Retrieved))
    }

    /// Creates a `DRAFT` record and returns the handle for the draft send request.
    ///
    /// # Errors
    /// Returns an error if either file cannot be created; the record is rolled
    /// back when the handle cannot be obtained.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub fn create_send_file(&self, uuid: &str) -> Result<ArtifactWriter> {
        let record_path = self.data_path(uuid, RECORD_EXT)?;
        let request_path = self.cache_path(uuid, SEND_REQUEST_EXT)?;
        write_json(&record_path, &MessageRecord::new(uuid, MessageState::Draft))?;

        ArtifactWriter::create(request_path).inspect_err(|_| {
            if let Err(e) = fs::remove_file(&record_path) {
                tracing::warn!(error = %e, "Failed to roll back draft record");
            }
        })
    }

    /// Returns the handle for the send-response artifact. The record is not touched.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be created.
    pub fn create_response_file(&self, uuid: &str) -> Result<ArtifactWriter> {
        ArtifactWriter::create(self.cache_path(uuid, RESPONSE_EXT)?)
    }

    /// Location of the retrieved body.
    ///
    /// # Errors
    /// Returns `MmsError::NotFound` if the message was never downloaded.
    pub fn mms_path(&self, uuid: &str) -> Result<PathBuf> {
        existing(self.data_path(uuid, BODY_EXT)?)
    }

    /// Location of the stored notification record.
    ///
    /// # Errors
    /// Returns `MmsError::NotFound` if no notification record is stored.
    pub fn notification_record_path(&self, uuid: &str) -> Result<PathBuf> {
        existing(self.data_path(uuid, NOTIFICATION_EXT)?)
    }

    /// Location of the committed draft send request.
    ///
    /// # Errors
    /// Returns `MmsError::NotFound` if no draft exists.
    pub fn send_request_path(&self, uuid: &str) -> Result<PathBuf> {
        existing(self.cache_path(uuid, SEND_REQUEST_EXT)?)
    }

    /// Reads back the current record.
    ///
    /// # Errors
    /// Returns `MmsError::NotFound` if no record exists, or a decode error.
    pub fn record(&self, uuid: &str) -> Result<MessageRecord> {
        read_json(&existing(self.data_path(uuid, RECORD_EXT)?)?)
    }

    /// Reads back the stored notification record.
    ///
    /// # Errors
    /// Returns `MmsError::NotFound` if none is stored, or a decode error.
    pub fn load_notification_record(&self, uuid: &str) -> Result<NotificationRecord> {
        read_json(&self.notification_record_path(uuid)?)
    }

    /// Persists the preferred context for an identity.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub fn set_preferred_context(&self, identity: &str, context: &str) -> Result<()> {
        let value = PreferredContext { preferred_context: context.to_string() };
        write_json(&self.data_path(identity, CONTEXT_EXT)?, &value)
    }

    /// Reads the preferred context for an identity.
    ///
    /// # Errors
    /// Returns `MmsError::NotFound` if it was never set.
    pub fn preferred_context(&self, identity: &str) -> Result<String> {
        let value: PreferredContext = read_json(&existing(self.data_path(identity, CONTEXT_EXT)?)?)?;
        Ok(value.preferred_context)
    }

    fn data_path(&self, key: &str, ext: &str) -> Result<PathBuf> {
        validate_uuid(key)?;
        Ok(self.data_dir.join(format!("{key}.{ext}")))
    }

    fn cache_path(&self, key: &str, ext: &str) -> Result<PathBuf> {
        validate_uuid(key)?;
        Ok(self.cache_dir.join(format!("{key}.{ext}")))
    }
}

/// Checks that `uuid` can name exactly one message: one object path segment
/// and one file name stem.
///
/// # Errors
/// Returns `MmsError::InvalidArguments` for an empty key, `.`, `..`, or a key
/// containing a path separator or NUL.
pub fn validate_uuid(uuid: &str) -> Result<()> {
    if matches!(uuid, "" | "." | "..") || uuid.contains(['/', '\\', '\0']) {
        return Err(MmsError::InvalidArguments(format!("'{uuid}' is not a valid message UUID")));
    }
    Ok(())
}

fn existing(path: PathBuf) -> Result<PathBuf> {
    if path.is_file() { Ok(path) } else { Err(MmsError::NotFound(path.display().to_string())) }
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}
