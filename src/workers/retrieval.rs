use crate::adapters::bus::ObjectPath;
use crate::adapters::transport::MessageTransport;
use crate::domain::notification::NotificationRecord;
use crate::domain::retrieval::RetrieveConf;
use crate::error::Result;
use crate::services::ServiceHandle;
use crate::storage::MessageStore;
use opentelemetry::{global, metrics::Counter};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

const DOWNLOAD_EXT: &str = "download";

/// Turns a fetched message body into its retrieval result.
pub trait RetrieveDecoder: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns `MmsError::Decode` if the body is not a valid retrieval result.
    fn decode_retrieve_conf(&self, uuid: &str, body: &[u8]) -> Result<RetrieveConf>;
}

#[derive(Clone, Debug)]
struct Metrics {
    retrieved: Counter<u64>,
    failed: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("mmsd");
        Self {
            retrieved: meter
                .u64_counter("mms_retrieved_total")
                .with_description("Total number of messages fetched and registered")
                .build(),
            failed: meter
                .u64_counter("mms_retrieval_failures_total")
                .with_description("Total number of retrievals that ended in a placeholder message")
                .build(),
        }
    }
}

/// Fetches message bodies for incoming notifications of one service.
///
/// Its input channel doubles as the retry channel: a placeholder created
/// for a failed retrieval hands its notification back here when deleted.
#[derive(Debug)]
pub struct RetrievalWorker {
    store: MessageStore,
    service: ServiceHandle,
    transport: Arc<dyn MessageTransport>,
    decoder: Arc<dyn RetrieveDecoder>,
    retry: mpsc::Sender<NotificationRecord>,
    metrics: Metrics,
}

impl RetrievalWorker {
    /// `retry` must feed the receiver later passed to [`RetrievalWorker::run`].
    #[must_use]
    pub fn new(
        store: MessageStore,
        service: ServiceHandle,
        transport: Arc<dyn MessageTransport>,
        decoder: Arc<dyn RetrieveDecoder>,
        retry: mpsc::Sender<NotificationRecord>,
    ) -> Self {
        Self { store, service, transport, decoder, retry, metrics: Metrics::new() }
    }

    #[must_use]
    pub fn retry_sender(&self) -> mpsc::Sender<NotificationRecord> {
        self.retry.clone()
    }

    pub async fn run(self, mut notifications: mpsc::Receiver<NotificationRecord>, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            tokio::select! {
                record = notifications.recv() => {
                    let Some(record) = record else { break };
                    let span = tracing::info_span!("retrieve_message", uuid = %record.uuid);
                    self.process(record).instrument(span).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Retrieval worker shutting down...");
    }

    async fn process(&self, record: NotificationRecord) {
        match self.retrieve(&record).await {
            Ok(path) => {
                self.metrics.retrieved.add(1, &[]);
                tracing::info!(%path, "Message retrieved");
            }
            Err(e) => {
                self.metrics.failed.add(1, &[]);
                tracing::warn!(error = %e, "Retrieval failed, keeping notification for retry");
                if let Err(e) = self.store.update_failed(&record) {
                    tracing::error!(error = %e, "Could not store notification for retry");
                }
                if let Err(e) =
                    self.service.incoming_message_fail_added(&record.uuid, &record.from, self.retry.clone()).await
                {
                    tracing::error!(error = %e, "Could not register failed message");
                }
            }
        }
    }

    async fn retrieve(&self, record: &NotificationRecord) -> Result<ObjectPath> {
        match self.store.record(&record.uuid) {
            Ok(_) => tracing::debug!("Resuming retrieval of known message"),
            Err(e) if e.is_not_found() => self.store.create(&record.uuid, &record.content_location)?,
            Err(e) => return Err(e),
        }

        let download = self.store.cache_dir().join(format!("{}.{DOWNLOAD_EXT}", record.uuid));
        let fetched = match self.transport.fetch(&record.content_location, &download).await {
            Ok(()) => self.store.update_downloaded(&record.uuid, &download),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = fetched {
            discard(&download).await;
            return Err(e);
        }

        let body = tokio::fs::read(self.store.mms_path(&record.uuid)?).await?;
        let conf = self.decoder.decode_retrieve_conf(&record.uuid, &body)?;
        self.service.incoming_message_added(conf).await
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "Could not remove partial download"),
    }
}
