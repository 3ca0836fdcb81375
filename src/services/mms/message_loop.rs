use super::properties::{STATUS_READ, draft_properties, failed_properties, received_properties};
use super::{Metrics, ServiceEvent};
use crate::adapters::bus::{BusConnection, BusMessage, MethodReturn, ObjectPath, Signal, Variant};
use crate::domain::notification::NotificationRecord;
use crate::domain::retrieval::RetrieveConf;
use crate::error::{MmsError, Result};
use crate::services::{
    MESSAGE_ADDED_SIGNAL, MESSAGE_REMOVED_SIGNAL, MMS_SERVICE_DBUS_IFACE, MessageObject, MessageRequest,
};
use crate::storage::{MessageStore, validate_uuid};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

/// The message timeline of one service. It is the only owner of the
/// path → message object map; every addition, removal and status change
/// of a message object runs here, one at a time.
#[derive(Debug)]
pub(super) struct MessageLoop {
    conn: Arc<dyn BusConnection>,
    store: MessageStore,
    service_path: ObjectPath,
    handlers: HashMap<ObjectPath, MessageObject>,
    requests: mpsc::Sender<MessageRequest>,
    metrics: Metrics,
}

impl MessageLoop {
    pub(super) fn new(
        conn: Arc<dyn BusConnection>,
        store: MessageStore,
        service_path: ObjectPath,
        requests: mpsc::Sender<MessageRequest>,
        metrics: Metrics,
    ) -> Self {
        Self { conn, store, service_path, handlers: HashMap::new(), requests, metrics }
    }

    pub(super) async fn run(
        mut self,
        mut events: mpsc::Receiver<ServiceEvent>,
        mut requests: mpsc::Receiver<MessageRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        while !*shutdown.borrow() {
            tokio::select! {
                Some(event) = events.recv() => self.handle_event(event).await,
                Some(request) = requests.recv() => self.handle_request(request).await,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        for (path, object) in self.handlers.drain() {
            tracing::debug!(%path, "Closing message object");
            object.close();
        }
        tracing::info!("Message loop shutting down...");
    }

    async fn handle_event(&mut self, event: ServiceEvent) {
        match event {
            ServiceEvent::IncomingAdded { conf, done } => {
                let _ = done.send(self.incoming_added(&conf).await);
            }
            ServiceEvent::IncomingFailAdded { uuid, from, retry, done } => {
                let _ = done.send(self.message_added(&uuid, failed_properties(&from), Some(retry)).await);
            }
            ServiceEvent::ReplySendMessage { reply, uuid, done } => {
                let _ = done.send(self.reply_send_message(reply, &uuid).await);
            }
            ServiceEvent::RejectSendMessage { reply, error } => {
                tracing::warn!(error = %error, "SendMessage rejected");
                if let Err(e) = self.conn.send(reply.into_error(&error)).await {
                    tracing::warn!(error = %e, "Could not answer SendMessage");
                }
            }
            ServiceEvent::StatusChanged { uuid, status, done } => {
                let _ = done.send(self.status_changed(&uuid, &status).await);
            }
        }
    }

    async fn handle_request(&mut self, request: MessageRequest) {
        let result = match &request {
            MessageRequest::Delete(path) => self.delete(path).await,
            MessageRequest::MarkRead(path) => self.mark_read(path).await,
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, request = ?request, "Message request failed");
        }
    }

    #[tracing::instrument(err(level = "warn"), skip(self, conf), fields(uuid = %conf.uuid))]
    async fn incoming_added(&mut self, conf: &RetrieveConf) -> Result<ObjectPath> {
        let properties = received_properties(&self.store, conf)?;
        self.message_added(&conf.uuid, properties, None).await
    }

    async fn reply_send_message(&mut self, mut reply: MethodReturn, uuid: &str) -> Result<ObjectPath> {
        if let Err(e) = validate_uuid(uuid) {
            self.answer_send_message(reply.into_error(&e), uuid).await;
            return Err(e);
        }
        reply.append(self.service_path.child(uuid));
        self.answer_send_message(reply.into(), uuid).await;
        self.message_added(uuid, draft_properties(), None).await
    }

    async fn answer_send_message(&self, message: BusMessage, uuid: &str) {
        if let Err(e) = self.conn.send(message).await {
            tracing::warn!(error = %e, uuid, "Could not answer SendMessage");
        }
    }

    async fn message_added(
        &mut self,
        uuid: &str,
        properties: BTreeMap<String, Variant>,
        retry: Option<mpsc::Sender<NotificationRecord>>,
    ) -> Result<ObjectPath> {
        validate_uuid(uuid)?;
        let path = self.service_path.child(uuid);
        if let Some(previous) = self.handlers.remove(&path) {
            tracing::warn!(%path, "Message path already registered, replacing");
            previous.close();
        }

        let signal = Signal::new(self.service_path.clone(), MMS_SERVICE_DBUS_IFACE, MESSAGE_ADDED_SIGNAL)
            .with_arg(path.clone())
            .with_arg(Variant::Dict(properties.clone()));

        let mut object =
            MessageObject::new(Arc::clone(&self.conn), &self.service_path, uuid, properties, self.requests.clone())?;
        if let Some(retry) = retry {
            object = object.with_retry(retry);
        }
        self.handlers.insert(path.clone(), object);
        self.metrics.added.add(1, &[]);
        tracing::info!(%path, "Message added");

        if let Err(e) = self.conn.send(signal.into()).await {
            tracing::warn!(error = %e, %path, "Could not announce new message");
        }
        Ok(path)
    }

    /// Drops the message object and everything stored for it. The removal
    /// is announced even when the store could not be cleaned up.
    async fn message_removed(&mut self, path: &ObjectPath) -> Result<()> {
        let object = self
            .handlers
            .remove(path)
            .ok_or_else(|| MmsError::NotFound(format!("no message registered at '{path}'")))?;
        object.close();

        let destroyed = self.store.destroy(object.uuid());

        let signal = Signal::new(self.service_path.clone(), MMS_SERVICE_DBUS_IFACE, MESSAGE_REMOVED_SIGNAL)
            .with_arg(path.clone());
        if let Err(e) = self.conn.send(signal.into()).await {
            tracing::warn!(error = %e, %path, "Could not announce removed message");
        }
        self.metrics.removed.add(1, &[]);
        tracing::info!(%path, "Message removed");
        destroyed
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&mut self, path: &ObjectPath) -> Result<()> {
        let Some(object) = self.handlers.get(path) else {
            return Err(MmsError::NotFound(format!("no message registered at '{path}'")));
        };
        let retry = object.retry_channel().cloned();
        let uuid = object.uuid().to_string();

        let pending = match self.store.load_notification_record(&uuid) {
            Ok(record) => Some(record),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read pending notification, no retry");
                None
            }
        };

        self.message_removed(path).await?;

        if let Some(record) = pending {
            self.resubmit(record, retry);
        }
        Ok(())
    }

    /// Restores the `NOTIFICATION` record and hands the notification back to
    /// the retrieval side. Never waits on the retry channel.
    fn resubmit(&self, record: NotificationRecord, retry: Option<mpsc::Sender<NotificationRecord>>) {
        let Some(retry) = retry else {
            tracing::warn!(uuid = %record.uuid, "No retry channel, notification dropped");
            return;
        };
        if let Err(e) = self.store.create(&record.uuid, &record.content_location) {
            tracing::error!(error = %e, uuid = %record.uuid, "Could not restore notification state, no retry");
            return;
        }

        self.metrics.retries.add(1, &[]);
        tracing::info!(uuid = %record.uuid, "Resubmitting notification for retrieval");
        match retry.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                tokio::spawn(async move {
                    if retry.send(record).await.is_err() {
                        tracing::warn!("Retry channel closed, notification dropped");
                    }
                });
            }
            Err(TrySendError::Closed(record)) => {
                tracing::warn!(uuid = %record.uuid, "Retry channel closed, notification dropped");
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn mark_read(&mut self, path: &ObjectPath) -> Result<()> {
        let object = self
            .handlers
            .get_mut(path)
            .ok_or_else(|| MmsError::NotFound(format!("no message registered at '{path}'")))?;
        self.store.update_retrieved(object.uuid())?;
        object.status_changed(STATUS_READ).await
    }

    #[tracing::instrument(err(level = "warn"), skip(self))]
    async fn status_changed(&mut self, uuid: &str, status: &str) -> Result<()> {
        validate_uuid(uuid)?;
        let path = self.service_path.child(uuid);
        let object = self
            .handlers
            .get_mut(&path)
            .ok_or_else(|| MmsError::NotFound(format!("no message registered at '{path}'")))?;
        object.status_changed(status).await
    }
}
