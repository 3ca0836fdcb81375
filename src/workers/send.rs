use crate::adapters::transport::MessageTransport;
use crate::domain::draft::DraftMessage;
use crate::error::Result;
use crate::services::{OutgoingMessage, ServiceHandle};
use crate::storage::MessageStore;
use opentelemetry::{global, metrics::Counter};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;
use uuid::Uuid;

pub const STATUS_SENT: &str = "sent";
pub const STATUS_PERMANENT_FAILURE: &str = "permanent-failure";

#[derive(Clone, Debug)]
struct Metrics {
    sent: Counter<u64>,
    errors: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("mmsd");
        Self {
            sent: meter
                .u64_counter("mms_sent_total")
                .with_description("Total number of messages accepted by the MMSC")
                .build(),
            errors: meter
                .u64_counter("mms_send_errors_total")
                .with_description("Total number of messages that could not be submitted")
                .build(),
        }
    }
}

/// Drains `SendMessage` requests of one service: stores the draft, answers
/// the caller with the new message path, then submits the draft.
#[derive(Debug)]
pub struct SendWorker {
    store: MessageStore,
    service: ServiceHandle,
    transport: Arc<dyn MessageTransport>,
    metrics: Metrics,
}

impl SendWorker {
    #[must_use]
    pub fn new(store: MessageStore, service: ServiceHandle, transport: Arc<dyn MessageTransport>) -> Self {
        Self { store, service, transport, metrics: Metrics::new() }
    }

    pub async fn run(self, mut outgoing: mpsc::Receiver<OutgoingMessage>, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            tokio::select! {
                message = outgoing.recv() => {
                    let Some(message) = message else { break };
                    let uuid = Uuid::new_v4().to_string();
                    self.process(&uuid, message)
                        .instrument(tracing::info_span!("send_message", uuid = %uuid))
                        .await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Send worker shutting down...");
    }

    async fn process(&self, uuid: &str, message: OutgoingMessage) {
        let OutgoingMessage { recipients, attachments, reply } = message;
        let draft = DraftMessage { uuid: uuid.to_string(), recipients, attachments };

        if let Err(e) = self.store_draft(&draft) {
            tracing::error!(error = %e, "Could not store draft");
            self.metrics.errors.add(1, &[]);
            if let Err(e) = self.service.reject_send_message(reply, e).await {
                tracing::warn!(error = %e, "Could not reject SendMessage");
            }
            return;
        }

        if let Err(e) = self.service.reply_send_message(reply, uuid).await {
            tracing::error!(error = %e, "Could not register draft");
            return;
        }

        let status = match self.submit(uuid).await {
            Ok(()) => {
                self.metrics.sent.add(1, &[]);
                tracing::info!("Message submitted");
                STATUS_SENT
            }
            Err(e) => {
                self.metrics.errors.add(1, &[]);
                tracing::warn!(error = %e, "Message submission failed");
                STATUS_PERMANENT_FAILURE
            }
        };

        if let Err(e) = self.service.message_status_changed(uuid, status).await {
            tracing::warn!(error = %e, status, "Could not report send status");
        }
    }

    fn store_draft(&self, draft: &DraftMessage) -> Result<()> {
        let mut writer = self.store.create_send_file(&draft.uuid)?;
        serde_json::to_writer(&mut writer, draft)?;
        writer.commit()?;
        Ok(())
    }

    async fn submit(&self, uuid: &str) -> Result<()> {
        let request = self.store.send_request_path(uuid)?;
        let response = self.transport.submit(&request).await?;

        let mut writer = self.store.create_response_file(uuid)?;
        writer.write_all(&response)?;
        writer.commit()?;
        Ok(())
    }
}
