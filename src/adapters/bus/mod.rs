use crate::error::{MmsError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

pub mod memory;
pub mod socket;
pub mod variant;

pub use memory::MemoryBus;
pub use socket::SocketBus;
pub use variant::{FromVariant, Variant};

/// Hierarchical address of an object on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectPath(String);

impl ObjectPath {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        Self(format!("{}/{segment}", self.0.trim_end_matches('/')))
    }

    /// Last path segment, if it names something.
    #[must_use]
    pub fn basename(&self) -> Option<&str> {
        match self.0.rsplit('/').next() {
            None | Some("" | "." | "..") => None,
            Some(segment) => Some(segment),
        }
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incoming method invocation addressed to an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodCall {
    pub serial: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub path: ObjectPath,
    pub interface: String,
    pub member: String,
    #[serde(default)]
    pub args: Vec<Variant>,
}

impl MethodCall {
    #[must_use]
    pub fn new(serial: u32, path: ObjectPath, interface: &str, member: &str, args: Vec<Variant>) -> Self {
        Self { serial, sender: None, path, interface: interface.to_string(), member: member.to_string(), args }
    }

    /// Empty successful reply to this call; arguments can be appended before sending.
    #[must_use]
    pub fn method_return(&self) -> MethodReturn {
        MethodReturn { reply_serial: self.serial, destination: self.sender.clone(), body: Vec::new() }
    }

    #[must_use]
    pub fn error(&self, name: &str, text: impl Into<String>) -> BusMessage {
        BusMessage::Error(ErrorReply {
            reply_serial: self.serial,
            destination: self.sender.clone(),
            name: name.to_string(),
            text: text.into(),
        })
    }

    #[must_use]
    pub fn error_from(&self, err: &MmsError) -> BusMessage {
        self.error(err.bus_name(), err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodReturn {
    pub reply_serial: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub body: Vec<Variant>,
}

impl MethodReturn {
    pub fn append(&mut self, value: impl Into<Variant>) {
        self.body.push(value.into());
    }

    #[must_use]
    pub fn with_arg(mut self, value: impl Into<Variant>) -> Self {
        self.append(value);
        self
    }

    /// Answers the same call with an error instead.
    #[must_use]
    pub fn into_error(self, err: &MmsError) -> BusMessage {
        BusMessage::Error(ErrorReply {
            reply_serial: self.reply_serial,
            destination: self.destination,
            name: err.bus_name().to_string(),
            text: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReply {
    pub reply_serial: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub path: ObjectPath,
    pub interface: String,
    pub member: String,
    pub args: Vec<Variant>,
}

impl Signal {
    #[must_use]
    pub fn new(path: ObjectPath, interface: &str, member: &str) -> Self {
        Self { path, interface: interface.to_string(), member: member.to_string(), args: Vec::new() }
    }

    #[must_use]
    pub fn with_arg(mut self, value: impl Into<Variant>) -> Self {
        self.args.push(value.into());
        self
    }
}

/// Anything the daemon emits onto the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BusMessage {
    Return(MethodReturn),
    Error(ErrorReply),
    Signal(Signal),
}

impl BusMessage {
    /// Client the message is addressed to; signals go to everyone.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        match self {
            Self::Return(r) => r.destination.as_deref(),
            Self::Error(e) => e.destination.as_deref(),
            Self::Signal(_) => None,
        }
    }
}

impl From<MethodReturn> for BusMessage {
    fn from(value: MethodReturn) -> Self {
        Self::Return(value)
    }
}

impl From<Signal> for BusMessage {
    fn from(value: Signal) -> Self {
        Self::Signal(value)
    }
}

/// Connection to the object bus: sends replies and signals, and routes
/// incoming calls for registered paths onto per-object channels.
#[async_trait]
pub trait BusConnection: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns `MmsError::Bus` if the message cannot be delivered.
    async fn send(&self, message: BusMessage) -> Result<()>;

    fn register_object_path(&self, path: ObjectPath, calls: mpsc::Sender<MethodCall>);

    fn unregister_object_path(&self, path: &ObjectPath);
}

/// Path → call channel table shared by the bus implementations.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: DashMap<ObjectPath, mpsc::Sender<MethodCall>>,
}

impl ObjectRegistry {
    pub fn register(&self, path: ObjectPath, calls: mpsc::Sender<MethodCall>) {
        tracing::debug!(%path, "Registering object path");
        if self.objects.insert(path.clone(), calls).is_some() {
            tracing::warn!(%path, "Object path was already registered, replaced");
        }
    }

    pub fn unregister(&self, path: &ObjectPath) -> bool {
        tracing::debug!(%path, "Unregistering object path");
        self.objects.remove(path).is_some()
    }

    #[must_use]
    pub fn contains(&self, path: &ObjectPath) -> bool {
        self.objects.contains_key(path)
    }

    #[must_use]
    pub fn paths(&self) -> Vec<ObjectPath> {
        let mut paths: Vec<_> = self.objects.iter().map(|entry| entry.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Hands the call to the object registered at its path. The call is given
    /// back when nothing is registered there or the object stopped listening.
    ///
    /// # Errors
    /// Returns the undelivered call.
    pub async fn route(&self, call: MethodCall) -> std::result::Result<(), MethodCall> {
        let Some(tx) = self.objects.get(&call.path).map(|entry| entry.value().clone()) else {
            return Err(call);
        };
        tx.send(call).await.map_err(|e| e.0)
    }
}
