mod common;

use async_trait::async_trait;
use common::Harness;
use mmsd::adapters::bus::{ObjectPath, Variant};
use mmsd::adapters::transport::{MessageTransport, TransportError};
use mmsd::domain::draft::DraftMessage;
use mmsd::domain::message::MessageState;
use mmsd::domain::notification::NotificationRecord;
use mmsd::domain::retrieval::{DataPart, RetrieveConf};
use mmsd::error::{ERROR_FAILED, MmsError, Result};
use mmsd::services::{
    MESSAGE_ADDED_SIGNAL, MESSAGE_REMOVED_SIGNAL, MMS_MESSAGE_DBUS_IFACE, MMS_SERVICE_DBUS_IFACE,
    PROPERTY_CHANGED_SIGNAL,
};
use mmsd::workers::{RetrievalWorker, RetrieveDecoder, SendWorker};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

#[derive(Debug, Default)]
struct FakeTransport {
    body: Option<Vec<u8>>,
    response: Option<Vec<u8>>,
    fetched: Mutex<Vec<String>>,
    submitted: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl MessageTransport for FakeTransport {
    async fn fetch(&self, content_location: &str, destination: &Path) -> std::result::Result<(), TransportError> {
        self.fetched.lock().expect("lock").push(content_location.to_string());
        match &self.body {
            Some(body) => Ok(tokio::fs::write(destination, body).await?),
            None => {
                tokio::fs::write(destination, b"trunc").await?;
                Err(TransportError::Rejected(404))
            }
        }
    }

    async fn submit(&self, request: &Path) -> std::result::Result<Vec<u8>, TransportError> {
        let body = tokio::fs::read(request).await?;
        self.submitted.lock().expect("lock").push(body);
        self.response.clone().ok_or(TransportError::Rejected(500))
    }
}

/// Treats the body as a JSON-encoded retrieval result.
#[derive(Debug)]
struct JsonDecoder;

impl RetrieveDecoder for JsonDecoder {
    fn decode_retrieve_conf(&self, uuid: &str, body: &[u8]) -> Result<RetrieveConf> {
        let mut conf: RetrieveConf = serde_json::from_slice(body).map_err(|e| MmsError::Decode(e.to_string()))?;
        conf.uuid = uuid.to_string();
        Ok(conf)
    }
}

fn send_args() -> Vec<Variant> {
    vec![Variant::from(vec!["+15550001"]), Variant::Array(Vec::new())]
}

fn spawn_sender(h: &mut Harness, transport: Arc<FakeTransport>) -> watch::Sender<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = SendWorker::new(h.store.clone(), h.handle.clone(), transport);
    tokio::spawn(worker.run(h.outgoing.take().expect("outgoing"), shutdown_rx));
    shutdown_tx
}

fn uuid_of(path: &ObjectPath) -> String {
    path.basename().expect("uuid segment").to_string()
}

#[tokio::test]
async fn test_send_worker_submits_draft_and_reports_sent() {
    let mut h = Harness::new();
    let transport = Arc::new(FakeTransport { response: Some(b"m-send.conf".to_vec()), ..FakeTransport::default() });
    let _shutdown = spawn_sender(&mut h, Arc::clone(&transport));

    let call = h.call_on(h.service_path(), MMS_SERVICE_DBUS_IFACE, "SendMessage", send_args());
    h.bus.dispatch(call).await.expect("dispatch");

    let ret = h.next_return().await;
    let Some(Variant::ObjectPath(path)) = ret.body.first().cloned() else { panic!("expected message path") };
    let added = h.next_signal(MESSAGE_ADDED_SIGNAL).await;
    assert_eq!(added.args[0], Variant::from(path.clone()));

    let changed = h.next_signal(PROPERTY_CHANGED_SIGNAL).await;
    assert_eq!(changed.path, path);
    assert_eq!(changed.args, vec![Variant::from("Status"), Variant::from("sent")]);

    let uuid = uuid_of(&path);
    let draft: DraftMessage =
        serde_json::from_slice(&std::fs::read(h.store.send_request_path(&uuid).expect("draft")).expect("read"))
            .expect("decode draft");
    assert_eq!(draft.recipients, vec!["+15550001".to_string()]);
    assert_eq!(transport.submitted.lock().expect("lock").len(), 1);

    let response = h.store.cache_dir().join(format!("{uuid}.m-notifyresp.ind"));
    assert_eq!(std::fs::read(response).expect("response stored"), b"m-send.conf");
    assert_eq!(h.store.record(&uuid).expect("record").state, MessageState::Draft);
}

#[tokio::test]
async fn test_send_worker_reports_permanent_failure() {
    let mut h = Harness::new();
    let transport = Arc::new(FakeTransport::default());
    let _shutdown = spawn_sender(&mut h, Arc::clone(&transport));

    let call = h.call_on(h.service_path(), MMS_SERVICE_DBUS_IFACE, "SendMessage", send_args());
    h.bus.dispatch(call).await.expect("dispatch");

    h.next_return().await;
    h.next_signal(MESSAGE_ADDED_SIGNAL).await;
    let changed = h.next_signal(PROPERTY_CHANGED_SIGNAL).await;
    assert_eq!(changed.args[1], Variant::from("permanent-failure"));
}

#[tokio::test]
async fn test_send_worker_rejects_when_draft_cannot_be_stored() {
    let mut h = Harness::new();
    let _shutdown = spawn_sender(&mut h, Arc::new(FakeTransport::default()));
    std::fs::remove_dir_all(h.store.cache_dir()).expect("remove cache root");

    let call = h.call_on(h.service_path(), MMS_SERVICE_DBUS_IFACE, "SendMessage", send_args());
    let serial = call.serial;
    h.bus.dispatch(call).await.expect("dispatch");

    let err = h.next_error().await;
    assert_eq!(err.reply_serial, serial);
    assert_eq!(err.name, ERROR_FAILED);
    assert_eq!(h.bus.registered_paths(), vec![h.service_path()]);
}

fn retrieval_worker(
    h: &Harness,
    transport: Arc<FakeTransport>,
) -> (mpsc::Sender<NotificationRecord>, watch::Sender<bool>) {
    let (notifications_tx, notifications_rx) = mpsc::channel(4);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker =
        RetrievalWorker::new(h.store.clone(), h.handle.clone(), transport, Arc::new(JsonDecoder), notifications_tx);
    let sender = worker.retry_sender();
    tokio::spawn(worker.run(notifications_rx, shutdown_rx));
    (sender, shutdown_tx)
}

#[tokio::test]
async fn test_retrieval_worker_downloads_and_registers() {
    let mut h = Harness::new();
    let conf = RetrieveConf {
        from: "+15551234/TYPE=PLMN".to_string(),
        to: vec!["+15550001/TYPE=PLMN".to_string()],
        subject: "Hello".to_string(),
        data_parts: vec![DataPart {
            content_id: "<t1>".to_string(),
            media_type: "text/plain".to_string(),
            offset: 0,
            length: 5,
        }],
        ..RetrieveConf::default()
    };
    let body = serde_json::to_vec(&conf).expect("encode");
    let transport = Arc::new(FakeTransport { body: Some(body.clone()), ..FakeTransport::default() });
    let (notifications, _shutdown) = retrieval_worker(&h, Arc::clone(&transport));

    let record = common::notification("in-1", "http://mmsc.example/in-1");
    notifications.send(record).await.expect("queue notification");

    let added = h.next_signal(MESSAGE_ADDED_SIGNAL).await;
    assert_eq!(added.args[0], Variant::from(h.message_path("in-1")));
    let props = common::dict(&added, 1);
    assert_eq!(props["Sender"], Variant::from("+15551234"));
    assert_eq!(props["Subject"], Variant::from("Hello"));

    assert_eq!(h.store.record("in-1").expect("record").state, MessageState::Downloaded);
    assert_eq!(std::fs::read(h.store.mms_path("in-1").expect("body")).expect("read"), body);
    assert!(h.store.notification_record_path("in-1").is_err());
    assert!(!h.store.cache_dir().join("in-1.download").exists());
    assert_eq!(*transport.fetched.lock().expect("lock"), vec!["http://mmsc.example/in-1".to_string()]);
}

#[tokio::test]
async fn test_retrieval_failure_registers_placeholder_and_retries_on_delete() {
    let mut h = Harness::new();
    let transport = Arc::new(FakeTransport::default());
    let (notifications, _shutdown) = retrieval_worker(&h, Arc::clone(&transport));

    let record = common::notification("flaky", "http://mmsc.example/flaky");
    notifications.send(record.clone()).await.expect("queue notification");

    let added = h.next_signal(MESSAGE_ADDED_SIGNAL).await;
    let path = h.message_path("flaky");
    assert_eq!(added.args[0], Variant::from(path.clone()));
    let props = common::dict(&added, 1);
    assert_eq!(props["Status"], Variant::from("received"));
    assert_eq!(props["Sender"], Variant::from("+15551234"));
    assert!(!props.contains_key("Attachments"));

    assert_eq!(h.store.load_notification_record("flaky").expect("kept for retry"), record);
    assert_eq!(h.store.record("flaky").expect("record").state, MessageState::Notification);
    assert!(!h.store.cache_dir().join("flaky.download").exists());

    // Deleting the placeholder sends the notification around again.
    let call = h.call_on(path.clone(), MMS_MESSAGE_DBUS_IFACE, "Delete", Vec::new());
    h.bus.dispatch(call).await.expect("dispatch");
    h.next_return().await;
    h.next_signal(MESSAGE_REMOVED_SIGNAL).await;

    let again = h.next_signal(MESSAGE_ADDED_SIGNAL).await;
    assert_eq!(again.args[0], Variant::from(path));
    assert_eq!(transport.fetched.lock().expect("lock").len(), 2);
    assert_eq!(h.store.load_notification_record("flaky").expect("still pending"), record);
}
