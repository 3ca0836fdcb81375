use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub mod http;

pub use http::HttpTransport;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request rejected with status {0}")]
    Rejected(u16),
    #[error("No MMSC configured for submission")]
    NotConfigured,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for crate::error::MmsError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Moves message bodies between the device and the MMSC.
#[async_trait]
pub trait MessageTransport: Send + Sync + std::fmt::Debug {
    /// Downloads the body at `content_location` into `destination`.
    ///
    /// # Errors
    /// Returns an error if the body cannot be fetched or written.
    async fn fetch(&self, content_location: &str, destination: &Path) -> Result<(), TransportError>;

    /// Posts the encoded send request at `request` and returns the MMSC's response.
    ///
    /// # Errors
    /// Returns an error if the request cannot be read or is rejected.
    async fn submit(&self, request: &Path) -> Result<Vec<u8>, TransportError>;
}
