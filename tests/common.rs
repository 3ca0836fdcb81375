#![allow(dead_code)]

use mmsd::adapters::bus::{
    BusConnection, BusMessage, ErrorReply, MemoryBus, MethodCall, MethodReturn, ObjectPath, Signal, Variant,
};
use mmsd::config::ServiceConfig;
use mmsd::domain::notification::NotificationRecord;
use mmsd::services::{MmsService, OutgoingMessage, ServiceHandle, ServiceSettings};
use mmsd::storage::MessageStore;
use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const IDENTITY: &str = "311480123";
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

pub fn setup_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into())
            .add_directive("mmsd=debug".parse().unwrap())
            .add_directive("reqwest=warn".parse().unwrap());
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

pub fn temp_store() -> (MessageStore, TempDir) {
    setup_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MessageStore::open(dir.path().join("data"), dir.path().join("cache")).expect("open store");
    (store, dir)
}

pub fn notification(uuid: &str, content_location: &str) -> NotificationRecord {
    NotificationRecord {
        uuid: uuid.to_string(),
        transaction_id: format!("tx-{uuid}"),
        from: "+15551234/TYPE=PLMN".to_string(),
        content_location: content_location.to_string(),
        size: 2048,
        expiry: 604_800,
    }
}

/// Puts a downloaded body for `uuid` into the store.
pub fn downloaded(store: &MessageStore, scratch: &Path, uuid: &str, body: &[u8]) {
    store.create(uuid, &format!("http://mmsc.example/{uuid}")).expect("create");
    let tmp = scratch.join(format!("{uuid}.tmp"));
    std::fs::write(&tmp, body).expect("write body");
    store.update_downloaded(uuid, &tmp).expect("update downloaded");
}

/// One service on an in-memory bus, plus everything the service emits.
pub struct Harness {
    pub bus: Arc<MemoryBus>,
    pub outbox: mpsc::UnboundedReceiver<BusMessage>,
    pub service: MmsService,
    pub handle: ServiceHandle,
    pub store: MessageStore,
    pub outgoing: Option<mpsc::Receiver<OutgoingMessage>>,
    pub dir: TempDir,
    serial: u32,
}

impl Harness {
    pub fn new() -> Self {
        let (store, dir) = temp_store();
        let (bus, outbox) = MemoryBus::new();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(4);
        let settings = ServiceSettings {
            identity: IDENTITY.to_string(),
            modem_object_path: "/ril_0".to_string(),
            use_delivery_reports: false,
        };
        let conn = Arc::clone(&bus) as Arc<dyn BusConnection>;
        let service = MmsService::new(conn, store.clone(), settings, outgoing_tx, &ServiceConfig::default());
        let handle = service.handle();
        Self { bus, outbox, service, handle, store, outgoing: Some(outgoing_rx), dir, serial: 0 }
    }

    pub fn service_path(&self) -> ObjectPath {
        self.service.path().clone()
    }

    pub fn message_path(&self, uuid: &str) -> ObjectPath {
        self.service.path().child(uuid)
    }

    pub fn call_on(&mut self, path: ObjectPath, interface: &str, member: &str, args: Vec<Variant>) -> MethodCall {
        self.serial += 1;
        MethodCall::new(self.serial, path, interface, member, args)
    }

    /// Dispatches a call and waits for its reply, failing on anything else.
    pub async fn call(&mut self, path: ObjectPath, interface: &str, member: &str, args: Vec<Variant>) -> BusMessage {
        let call = self.call_on(path, interface, member, args);
        self.bus.dispatch(call).await.expect("dispatch");
        self.next().await
    }

    pub async fn next(&mut self) -> BusMessage {
        tokio::time::timeout(RECV_TIMEOUT, self.outbox.recv())
            .await
            .expect("timed out waiting for bus message")
            .expect("bus closed")
    }

    pub async fn next_return(&mut self) -> MethodReturn {
        match self.next().await {
            BusMessage::Return(reply) => reply,
            other => panic!("expected method return, got {other:?}"),
        }
    }

    pub async fn next_error(&mut self) -> ErrorReply {
        match self.next().await {
            BusMessage::Error(err) => err,
            other => panic!("expected error reply, got {other:?}"),
        }
    }

    pub async fn next_signal(&mut self, member: &str) -> Signal {
        match self.next().await {
            BusMessage::Signal(signal) if signal.member == member => signal,
            other => panic!("expected {member} signal, got {other:?}"),
        }
    }

    /// Returns once the message loop has finished everything queued before.
    pub async fn sync(&self) {
        let err = self.handle.message_status_changed("sync-barrier", "none").await.expect_err("no such message");
        assert!(err.is_not_found());
    }

    pub fn assert_quiet(&mut self) {
        if let Ok(message) = self.outbox.try_recv() {
            panic!("unexpected bus message {message:?}");
        }
    }
}

pub fn dict(signal: &Signal, index: usize) -> std::collections::BTreeMap<String, Variant> {
    match signal.args.get(index) {
        Some(Variant::Dict(map)) => map.clone(),
        other => panic!("expected dict argument, got {other:?}"),
    }
}
