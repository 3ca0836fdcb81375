use crate::adapters::bus::{BusConnection, BusMessage, MethodCall, ObjectPath, ObjectRegistry};
use crate::error::{ERROR_UNKNOWN_OBJECT, MmsError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// In-process bus. Everything the daemon sends lands on the receiver handed
/// out by [`MemoryBus::new`]; calls are injected with [`MemoryBus::dispatch`].
#[derive(Debug)]
pub struct MemoryBus {
    registry: ObjectRegistry,
    outbox: mpsc::UnboundedSender<BusMessage>,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<BusMessage>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { registry: ObjectRegistry::default(), outbox }), rx)
    }

    /// Delivers a call to the object registered at its path.
    ///
    /// # Errors
    /// Returns `MmsError::NotFound` when no object is registered there; an
    /// `UnknownObject` error reply is also emitted, as a real bus would.
    pub async fn dispatch(&self, call: MethodCall) -> Result<()> {
        match self.registry.route(call).await {
            Ok(()) => Ok(()),
            Err(call) => {
                let text = format!("No such object path '{}'", call.path);
                let _ = self.outbox.send(call.error(ERROR_UNKNOWN_OBJECT, text.clone()));
                Err(MmsError::NotFound(text))
            }
        }
    }

    #[must_use]
    pub fn is_registered(&self, path: &ObjectPath) -> bool {
        self.registry.contains(path)
    }

    #[must_use]
    pub fn registered_paths(&self) -> Vec<ObjectPath> {
        self.registry.paths()
    }
}

#[async_trait]
impl BusConnection for MemoryBus {
    async fn send(&self, message: BusMessage) -> Result<()> {
        self.outbox.send(message).map_err(|_| MmsError::Bus("memory bus receiver dropped".into()))
    }

    fn register_object_path(&self, path: ObjectPath, calls: mpsc::Sender<MethodCall>) {
        self.registry.register(path, calls);
    }

    fn unregister_object_path(&self, path: &ObjectPath) {
        self.registry.unregister(path);
    }
}
