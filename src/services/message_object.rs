use crate::adapters::bus::{BusConnection, MethodCall, ObjectPath, Signal, Variant};
use crate::domain::notification::NotificationRecord;
use crate::error::{MmsError, Result};
use crate::services::{MMS_MESSAGE_DBUS_IFACE, PROPERTY_CHANGED_SIGNAL, STATUS_PROPERTY};
use crate::storage::validate_uuid;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Instrument;

const CALL_CHANNEL_CAPACITY: usize = 4;

/// Work a message object asks its owning service to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageRequest {
    Delete(ObjectPath),
    MarkRead(ObjectPath),
}

/// Bus handle for one message.
///
/// The object answers calls on its own path but never mutates the store:
/// `Delete` and `MarkRead` are forwarded to the owning service, which
/// performs them on its message timeline.
#[derive(Debug)]
pub struct MessageObject {
    uuid: String,
    path: ObjectPath,
    properties: BTreeMap<String, Variant>,
    conn: Arc<dyn BusConnection>,
    retry: Option<mpsc::Sender<NotificationRecord>>,
}

impl MessageObject {
    /// Registers the object for `uuid` under `parent` and starts answering its calls.
    ///
    /// # Errors
    /// Returns `MmsError::InvalidArguments` if `uuid` is not a single path segment.
    pub fn new(
        conn: Arc<dyn BusConnection>,
        parent: &ObjectPath,
        uuid: &str,
        properties: BTreeMap<String, Variant>,
        requests: mpsc::Sender<MessageRequest>,
    ) -> Result<Self> {
        validate_uuid(uuid)?;
        let path = parent.child(uuid);
        let (calls_tx, calls_rx) = mpsc::channel(CALL_CHANNEL_CAPACITY);
        conn.register_object_path(path.clone(), calls_tx);
        tokio::spawn(
            watch_calls(Arc::clone(&conn), path.clone(), calls_rx, requests)
                .instrument(tracing::debug_span!("message_object", %path)),
        );
        Ok(Self { uuid: uuid.to_string(), path, properties, conn, retry: None })
    }

    /// Remembers where the original notification goes if this message is
    /// deleted before it was ever retrieved.
    #[must_use]
    pub fn with_retry(mut self, retry: mpsc::Sender<NotificationRecord>) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    #[must_use]
    pub const fn path(&self) -> &ObjectPath {
        &self.path
    }

    #[must_use]
    pub const fn properties(&self) -> &BTreeMap<String, Variant> {
        &self.properties
    }

    #[must_use]
    pub fn status(&self) -> Option<&str> {
        match self.properties.get(STATUS_PROPERTY) {
            Some(Variant::Str(status)) => Some(status.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub const fn retry_channel(&self) -> Option<&mpsc::Sender<NotificationRecord>> {
        self.retry.as_ref()
    }

    /// Updates the visible status and announces it.
    ///
    /// # Errors
    /// Returns `MmsError::Bus` if the signal cannot be sent.
    pub async fn status_changed(&mut self, status: &str) -> Result<()> {
        self.properties.insert(STATUS_PROPERTY.to_string(), status.into());
        let signal = Signal::new(self.path.clone(), MMS_MESSAGE_DBUS_IFACE, PROPERTY_CHANGED_SIGNAL)
            .with_arg(STATUS_PROPERTY)
            .with_arg(status);
        self.conn.send(signal.into()).await
    }

    /// Releases the bus registration; the call watcher ends once its channel drains.
    pub fn close(&self) {
        self.conn.unregister_object_path(&self.path);
    }
}

async fn watch_calls(
    conn: Arc<dyn BusConnection>,
    path: ObjectPath,
    mut calls: mpsc::Receiver<MethodCall>,
    requests: mpsc::Sender<MessageRequest>,
) {
    while let Some(call) = calls.recv().await {
        tracing::debug!(member = %call.member, "Received message call");
        let (reply, request) = if call.interface == MMS_MESSAGE_DBUS_IFACE {
            match call.member.as_str() {
                "Delete" => (call.method_return().into(), Some(MessageRequest::Delete(path.clone()))),
                "MarkRead" => (call.method_return().into(), Some(MessageRequest::MarkRead(path.clone()))),
                member => {
                    let err = MmsError::UnknownMethod { member: member.to_string(), path: path.to_string() };
                    (call.error_from(&err), None)
                }
            }
        } else {
            let err = MmsError::UnknownInterface { interface: call.interface.clone(), path: path.to_string() };
            (call.error_from(&err), None)
        };

        if let Err(e) = conn.send(reply).await {
            tracing::warn!(error = %e, "Could not send reply");
        }
        if let Some(request) = request
            && requests.send(request).await.is_err()
        {
            tracing::debug!("Owning service is gone, stop watching calls");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::bus::{BusMessage, MemoryBus};

    fn call(path: &ObjectPath, interface: &str, member: &str) -> MethodCall {
        MethodCall::new(1, path.clone(), interface, member, Vec::new())
    }

    fn register(bus: &Arc<MemoryBus>, requests: mpsc::Sender<MessageRequest>) -> MessageObject {
        let conn = Arc::clone(bus) as Arc<dyn BusConnection>;
        MessageObject::new(conn, &ObjectPath::new("/org/ofono/mms/311"), "abc", BTreeMap::new(), requests)
            .expect("register")
    }

    #[tokio::test]
    async fn test_delete_is_forwarded_not_performed() {
        let (bus, mut outbox) = MemoryBus::new();
        let (requests_tx, mut requests_rx) = mpsc::channel(4);
        let object = register(&bus, requests_tx);
        let path = object.path().clone();

        bus.dispatch(call(&path, MMS_MESSAGE_DBUS_IFACE, "Delete")).await.expect("dispatch");

        assert_eq!(requests_rx.recv().await, Some(MessageRequest::Delete(path.clone())));
        assert!(matches!(outbox.recv().await, Some(BusMessage::Return(_))));
        assert!(bus.is_registered(object.path()), "only the service unregisters the object");
    }

    #[tokio::test]
    async fn test_unknown_member_and_interface() {
        let (bus, mut outbox) = MemoryBus::new();
        let (requests_tx, _requests_rx) = mpsc::channel(4);
        let object = register(&bus, requests_tx);
        let path = object.path().clone();

        bus.dispatch(call(&path, MMS_MESSAGE_DBUS_IFACE, "Explode")).await.expect("dispatch");
        let Some(BusMessage::Error(err)) = outbox.recv().await else { panic!("expected error reply") };
        assert_eq!(err.name, crate::error::ERROR_UNKNOWN_METHOD);
        assert!(err.text.contains("Explode"));

        bus.dispatch(call(&path, "org.example.Other", "Delete")).await.expect("dispatch");
        let Some(BusMessage::Error(err)) = outbox.recv().await else { panic!("expected error reply") };
        assert_eq!(err.name, crate::error::ERROR_UNKNOWN_INTERFACE);
        assert!(err.text.contains("org.example.Other"));
    }

    #[tokio::test]
    async fn test_status_changed_updates_and_signals() {
        let (bus, mut outbox) = MemoryBus::new();
        let (requests_tx, _requests_rx) = mpsc::channel(4);
        let mut object = register(&bus, requests_tx);
        let path = object.path().clone();

        object.status_changed("sent").await.expect("status");
        assert_eq!(object.status(), Some("sent"));

        let Some(BusMessage::Signal(signal)) = outbox.recv().await else { panic!("expected signal") };
        assert_eq!(signal.path, path);
        assert_eq!(signal.member, PROPERTY_CHANGED_SIGNAL);
        assert_eq!(signal.args, vec![Variant::from(STATUS_PROPERTY), Variant::from("sent")]);

        object.close();
        assert!(!bus.is_registered(&path));
    }

    #[tokio::test]
    async fn test_uuid_must_be_one_segment() {
        let (bus, _outbox) = MemoryBus::new();
        let (requests_tx, _requests_rx) = mpsc::channel(4);
        let parent = ObjectPath::new("/org/ofono/mms/311");

        for uuid in ["", ".", "..", "x/victim"] {
            let conn = Arc::clone(&bus) as Arc<dyn BusConnection>;
            let err = MessageObject::new(conn, &parent, uuid, BTreeMap::new(), requests_tx.clone())
                .expect_err("rejected");
            assert!(matches!(err, MmsError::InvalidArguments(_)), "{uuid:?}");
        }
        assert!(bus.registered_paths().is_empty());

        let object = register(&bus, requests_tx);
        assert_eq!(object.uuid(), "abc");
        assert_eq!(object.path(), &ObjectPath::new("/org/ofono/mms/311/abc"));
    }
}
