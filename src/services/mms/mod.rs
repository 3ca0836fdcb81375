use crate::adapters::bus::{BusConnection, MethodReturn, ObjectPath};
use crate::config::ServiceConfig;
use crate::domain::attachment::OutAttachment;
use crate::domain::notification::NotificationRecord;
use crate::domain::retrieval::RetrieveConf;
use crate::error::{MmsError, Result};
use crate::services::MMS_DBUS_PATH;
use crate::storage::{MessageStore, validate_uuid};
use opentelemetry::{global, metrics::Counter};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

mod bus_calls;
mod message_loop;
pub mod properties;

use bus_calls::BusCallLoop;
use message_loop::MessageLoop;

/// Static per-identity service configuration.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub identity: String,
    pub modem_object_path: String,
    pub use_delivery_reports: bool,
}

/// A parsed `SendMessage` call waiting for the send worker. The reply is
/// answered through [`ServiceHandle::reply_send_message`] once a UUID exists.
#[derive(Debug)]
pub struct OutgoingMessage {
    pub recipients: Vec<String>,
    pub attachments: Vec<OutAttachment>,
    pub reply: MethodReturn,
}

#[derive(Debug)]
enum ServiceEvent {
    IncomingAdded {
        conf: RetrieveConf,
        done: oneshot::Sender<Result<ObjectPath>>,
    },
    IncomingFailAdded {
        uuid: String,
        from: String,
        retry: mpsc::Sender<NotificationRecord>,
        done: oneshot::Sender<Result<ObjectPath>>,
    },
    ReplySendMessage {
        reply: MethodReturn,
        uuid: String,
        done: oneshot::Sender<Result<ObjectPath>>,
    },
    RejectSendMessage {
        reply: MethodReturn,
        error: MmsError,
    },
    StatusChanged {
        uuid: String,
        status: String,
        done: oneshot::Sender<Result<()>>,
    },
}

#[derive(Clone, Debug)]
struct Metrics {
    added: Counter<u64>,
    removed: Counter<u64>,
    retries: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("mmsd");
        Self {
            added: meter
                .u64_counter("mms_messages_added_total")
                .with_description("Total number of message objects registered on the bus")
                .build(),
            removed: meter
                .u64_counter("mms_messages_removed_total")
                .with_description("Total number of message objects removed from the bus")
                .build(),
            retries: meter
                .u64_counter("mms_retrievals_resubmitted_total")
                .with_description("Total number of notifications resubmitted after a delete before retrieval")
                .build(),
        }
    }
}

/// The MMS service object of one identity.
///
/// Two loops run per service: the bus-call loop answers calls on the
/// service path and owns the service properties, the message loop owns every
/// message object of the identity. Workers reach the message loop through a
/// cloned [`ServiceHandle`], so all changes to the set of live messages
/// happen on that one task.
#[derive(Debug)]
pub struct MmsService {
    handle: ServiceHandle,
    identity: String,
    conn: Arc<dyn BusConnection>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MmsService {
    #[must_use]
    pub fn new(
        conn: Arc<dyn BusConnection>,
        store: MessageStore,
        settings: ServiceSettings,
        outgoing: mpsc::Sender<OutgoingMessage>,
        config: &ServiceConfig,
    ) -> Self {
        let path = ObjectPath::new(MMS_DBUS_PATH).child(&settings.identity);
        let identity = settings.identity.clone();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (calls_tx, calls_rx) = mpsc::channel(config.call_channel_capacity);
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity);
        let (requests_tx, requests_rx) = mpsc::channel(config.event_channel_capacity);

        let metrics = Metrics::new();
        let message_loop =
            MessageLoop::new(Arc::clone(&conn), store.clone(), path.clone(), requests_tx, metrics);
        let bus_calls = BusCallLoop::new(Arc::clone(&conn), store, settings, path.clone(), outgoing);

        conn.register_object_path(path.clone(), calls_tx);

        let tasks = vec![
            tokio::spawn(
                bus_calls
                    .run(calls_rx, shutdown_rx.clone())
                    .instrument(tracing::info_span!("service_calls", identity = %identity)),
            ),
            tokio::spawn(
                message_loop
                    .run(events_rx, requests_rx, shutdown_rx)
                    .instrument(tracing::info_span!("service_messages", identity = %identity)),
            ),
        ];
        tracing::info!(identity = %identity, %path, "MMS service registered");

        Self { handle: ServiceHandle { events: events_tx, path }, identity, conn, shutdown, tasks }
    }

    #[must_use]
    pub fn handle(&self) -> ServiceHandle {
        self.handle.clone()
    }

    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        &self.handle.path
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Unregisters the service, stops both loops and waits for them.
    /// Message objects still registered are closed by the message loop.
    pub async fn close(self) {
        self.conn.unregister_object_path(&self.handle.path);
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, identity = %self.identity, "Service task failed");
            }
        }
        tracing::info!(identity = %self.identity, "MMS service closed");
    }
}

/// Cloneable entry point into a service's message timeline.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    events: mpsc::Sender<ServiceEvent>,
    path: ObjectPath,
}

impl ServiceHandle {
    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Registers a message object for a fully retrieved message.
    ///
    /// # Errors
    /// Returns `MmsError::InvalidArguments` for a malformed UUID, or
    /// `MmsError::NotFound` if an attachment's body is missing from the store;
    /// nothing is registered then.
    pub async fn incoming_message_added(&self, conf: RetrieveConf) -> Result<ObjectPath> {
        validate_uuid(&conf.uuid)?;
        self.request(|done| ServiceEvent::IncomingAdded { conf, done }).await
    }

    /// Registers a placeholder for a message whose retrieval failed. Deleting
    /// it resubmits the stored notification on `retry`.
    ///
    /// # Errors
    /// Returns `MmsError::InvalidArguments` for a malformed UUID, or
    /// `MmsError::ServiceClosed` if the service is gone.
    pub async fn incoming_message_fail_added(
        &self,
        uuid: &str,
        from: &str,
        retry: mpsc::Sender<NotificationRecord>,
    ) -> Result<ObjectPath> {
        validate_uuid(uuid)?;
        let (uuid, from) = (uuid.to_string(), from.to_string());
        self.request(|done| ServiceEvent::IncomingFailAdded { uuid, from, retry, done }).await
    }

    /// Answers a deferred `SendMessage` call with the draft's path and
    /// registers the draft. A malformed UUID answers the call with an error.
    ///
    /// # Errors
    /// Returns `MmsError::InvalidArguments` for a malformed UUID, or
    /// `MmsError::ServiceClosed` if the service is gone.
    pub async fn reply_send_message(&self, reply: MethodReturn, uuid: &str) -> Result<ObjectPath> {
        let uuid = uuid.to_string();
        self.request(|done| ServiceEvent::ReplySendMessage { reply, uuid, done }).await
    }

    /// Answers a deferred `SendMessage` call with `error`; nothing is registered.
    ///
    /// # Errors
    /// Returns `MmsError::ServiceClosed` if the service is gone.
    pub async fn reject_send_message(&self, reply: MethodReturn, error: MmsError) -> Result<()> {
        self.events.send(ServiceEvent::RejectSendMessage { reply, error }).await.map_err(|_| MmsError::ServiceClosed)
    }

    /// # Errors
    /// Returns `MmsError::NotFound` if no message object exists for `uuid`,
    /// or `MmsError::InvalidArguments` if `uuid` cannot name one.
    pub async fn message_status_changed(&self, uuid: &str, status: &str) -> Result<()> {
        validate_uuid(uuid)?;
        let (uuid, status) = (uuid.to_string(), status.to_string());
        self.request(|done| ServiceEvent::StatusChanged { uuid, status, done }).await
    }

    async fn request<T>(&self, event: impl FnOnce(oneshot::Sender<Result<T>>) -> ServiceEvent) -> Result<T> {
        let (done, rx) = oneshot::channel();
        self.events.send(event(done)).await.map_err(|_| MmsError::ServiceClosed)?;
        rx.await.map_err(|_| MmsError::ServiceClosed)?
    }
}
