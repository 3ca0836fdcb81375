use crate::error::Result;
use serde::Serialize;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Scoped, buffered handle for a file that must never be observed half-written.
///
/// Bytes go to a `.part` sibling of the target. [`ArtifactWriter::commit`] flushes,
/// syncs and renames it into place; dropping the writer without committing removes
/// the partial file, whatever the exit path.
#[derive(Debug)]
pub struct ArtifactWriter {
    target: PathBuf,
    staging: PathBuf,
    inner: Option<BufWriter<File>>,
    committed: bool,
}

impl ArtifactWriter {
    /// Opens a fresh staging file for `target`.
    ///
    /// # Errors
    /// Returns an I/O error if the staging file cannot be created.
    pub fn create(target: impl Into<PathBuf>) -> Result<Self> {
        let target = target.into();
        let staging = staging_path(&target);
        let file = File::create(&staging)?;
        Ok(Self { target, staging, inner: Some(BufWriter::new(file)), committed: false })
    }

    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Makes the written content visible under the target name.
    ///
    /// # Errors
    /// Returns an I/O error if flushing, syncing or renaming fails; the staging
    /// file is removed in that case and the target is left untouched.
    pub fn commit(mut self) -> Result<PathBuf> {
        if let Some(writer) = self.inner.take() {
            let file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
            file.sync_all()?;
        }
        fs::rename(&self.staging, &self.target)?;
        self.committed = true;
        Ok(self.target.clone())
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.inner.as_mut().ok_or_else(|| io::Error::other("artifact writer already finished"))
    }
}

impl Write for ArtifactWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl Drop for ArtifactWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.inner.take());
        if let Err(e) = fs::remove_file(&self.staging)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(error = %e, path = %self.staging.display(), "Failed to remove partial file");
        }
    }
}

/// Replaces the file at `path` with the JSON encoding of `value`.
///
/// # Errors
/// Returns an error if encoding or any file operation fails; the previous
/// content of `path` survives such a failure.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut writer = ArtifactWriter::create(path)?;
    serde_json::to_writer(&mut writer, value)?;
    writer.commit()?;
    Ok(())
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> std::result::Result<S::Ok, S::Error> {
            Err(S::Error::custom("refusing to encode"))
        }
    }

    #[test]
    fn test_dropped_writer_leaves_nothing_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("abc.m-send.req");
        {
            let mut writer = ArtifactWriter::create(&target).expect("create");
            writer.write_all(b"partial").expect("write");
        }
        assert!(!target.exists());
        assert!(!staging_path(&target).exists());
    }

    #[test]
    fn test_failed_encode_keeps_previous_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("abc.db");
        write_json(&target, &serde_json::json!({"state": "NOTIFICATION"})).expect("first write");

        assert!(write_json(&target, &Unencodable).is_err());

        let content = fs::read_to_string(&target).expect("read");
        assert_eq!(content, r#"{"state":"NOTIFICATION"}"#);
        assert!(!staging_path(&target).exists());
    }

    #[test]
    fn test_commit_publishes_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("abc.m-notifyresp.ind");
        let mut writer = ArtifactWriter::create(&target).expect("create");
        writer.write_all(b"ack").expect("write");
        let path = writer.commit().expect("commit");
        assert_eq!(path, target);
        assert_eq!(fs::read(&target).expect("read"), b"ack");
    }
}
