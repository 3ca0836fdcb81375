use crate::adapters::transport::{MessageTransport, TransportError};
use crate::config::TransportConfig;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const MMS_CONTENT_TYPE: &str = "application/vnd.wap.mms-message";
const USER_AGENT: &str = concat!("mmsd/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    mmsc: Option<String>,
}

impl HttpTransport {
    /// Builds the HTTP client, routing through the configured MMS proxy if any.
    ///
    /// # Errors
    /// Returns an error if the proxy URL is invalid or the client cannot be built.
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs));
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self { client: builder.build()?, mmsc: config.mmsc_url.clone() })
    }
}

#[async_trait]
impl MessageTransport for HttpTransport {
    #[tracing::instrument(skip(self, destination), err(level = "warn"))]
    async fn fetch(&self, content_location: &str, destination: &Path) -> Result<(), TransportError> {
        let response = self.client.get(content_location).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Rejected(status.as_u16()));
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(request = %request.display()), err(level = "warn"))]
    async fn submit(&self, request: &Path) -> Result<Vec<u8>, TransportError> {
        let Some(mmsc) = &self.mmsc else {
            return Err(TransportError::NotConfigured);
        };
        let body = tokio::fs::read(request).await?;
        let response = self.client.post(mmsc).header(CONTENT_TYPE, MMS_CONTENT_TYPE).body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Rejected(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}
