use super::{OutgoingMessage, ServiceSettings};
use crate::adapters::bus::{BusConnection, MethodCall, ObjectPath, Signal, Variant};
use crate::domain::attachment::OutAttachment;
use crate::error::{ERROR_FAILED, MmsError, Result};
use crate::services::{
    IDENTITY_PROPERTY, MMS_SERVICE_DBUS_IFACE, MODEM_OBJECT_PATH_PROPERTY, PREFERRED_CONTEXT_PROPERTY,
    PROPERTY_CHANGED_SIGNAL, USE_DELIVERY_REPORTS_PROPERTY,
};
use crate::storage::MessageStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

const NO_CONTEXT: &str = "/";

/// One recognized call on the service interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum ServiceCall {
    GetMessages,
    GetProperties,
    SetProperty { name: String, value: Variant },
    SendMessage { recipients: Vec<String>, attachments: Vec<OutAttachment> },
}

impl ServiceCall {
    pub(super) fn decode(call: &MethodCall) -> Result<Self> {
        if call.interface != MMS_SERVICE_DBUS_IFACE {
            return Err(MmsError::UnknownInterface {
                interface: call.interface.clone(),
                path: call.path.to_string(),
            });
        }
        match call.member.as_str() {
            "GetMessages" => Ok(Self::GetMessages),
            "GetProperties" => Ok(Self::GetProperties),
            "SetProperty" => match call.args.as_slice() {
                [name, value] => Ok(Self::SetProperty { name: name.decode()?, value: value.clone() }),
                _ => Err(MmsError::InvalidArguments("SetProperty takes a name and a value".into())),
            },
            "SendMessage" => decode_send(&call.args),
            member => Err(MmsError::UnknownMethod { member: member.to_string(), path: call.path.to_string() }),
        }
    }
}

fn decode_send(args: &[Variant]) -> Result<ServiceCall> {
    let cannot_parse = || MmsError::InvalidArguments("Cannot parse New Message".into());
    let [recipients, attachments] = args else {
        return Err(cannot_parse());
    };
    let recipients: Vec<String> = recipients.decode().map_err(|_| cannot_parse())?;
    let attachments: Vec<OutAttachment> = attachments.decode().map_err(|_| cannot_parse())?;
    if recipients.is_empty() {
        return Err(cannot_parse());
    }
    Ok(ServiceCall::SendMessage { recipients, attachments })
}

/// Answers calls on the service path, one at a time.
#[derive(Debug)]
pub(super) struct BusCallLoop {
    conn: Arc<dyn BusConnection>,
    store: MessageStore,
    settings: ServiceSettings,
    path: ObjectPath,
    outgoing: mpsc::Sender<OutgoingMessage>,
    preferred_context: Option<ObjectPath>,
}

impl BusCallLoop {
    pub(super) const fn new(
        conn: Arc<dyn BusConnection>,
        store: MessageStore,
        settings: ServiceSettings,
        path: ObjectPath,
        outgoing: mpsc::Sender<OutgoingMessage>,
    ) -> Self {
        Self { conn, store, settings, path, outgoing, preferred_context: None }
    }

    pub(super) async fn run(mut self, mut calls: mpsc::Receiver<MethodCall>, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            tokio::select! {
                call = calls.recv() => {
                    let Some(call) = call else { break };
                    self.handle_call(call).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Service call loop shutting down...");
    }

    async fn handle_call(&mut self, call: MethodCall) {
        tracing::debug!(member = %call.member, "Received service call");
        let reply = match ServiceCall::decode(&call) {
            Ok(ServiceCall::GetMessages) => Some(call.method_return().with_arg(Variant::Array(Vec::new())).into()),
            Ok(ServiceCall::GetProperties) => {
                Some(call.method_return().with_arg(Variant::Dict(self.properties())).into())
            }
            Ok(ServiceCall::SetProperty { name, value }) => match self.set_property(&name, &value).await {
                Ok(()) => Some(call.method_return().into()),
                Err(e) => Some(call.error_from(&e)),
            },
            Ok(ServiceCall::SendMessage { recipients, attachments }) => {
                let message = OutgoingMessage { recipients, attachments, reply: call.method_return() };
                if self.outgoing.send(message).await.is_ok() {
                    None
                } else {
                    tracing::error!("Send worker is gone, rejecting message");
                    Some(call.error(ERROR_FAILED, "Message sending is not available"))
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Rejected service call");
                Some(call.error_from(&e))
            }
        };

        if let Some(reply) = reply
            && let Err(e) = self.conn.send(reply).await
        {
            tracing::warn!(error = %e, "Could not send reply");
        }
    }

    fn properties(&mut self) -> BTreeMap<String, Variant> {
        let mut properties = BTreeMap::new();
        properties.insert(IDENTITY_PROPERTY.to_string(), self.settings.identity.as_str().into());
        properties.insert(USE_DELIVERY_REPORTS_PROPERTY.to_string(), self.settings.use_delivery_reports.into());
        properties.insert(
            MODEM_OBJECT_PATH_PROPERTY.to_string(),
            ObjectPath::new(self.settings.modem_object_path.as_str()).into(),
        );
        properties.insert(PREFERRED_CONTEXT_PROPERTY.to_string(), self.preferred_context().into());
        properties
    }

    /// Loads the context on first use. A read failure other than a missing
    /// file is retried on the next access.
    fn preferred_context(&mut self) -> ObjectPath {
        if let Some(context) = &self.preferred_context {
            return context.clone();
        }
        let context = match self.store.preferred_context(&self.settings.identity) {
            Ok(context) => ObjectPath::new(context),
            Err(e) if e.is_not_found() => ObjectPath::new(NO_CONTEXT),
            Err(e) => {
                tracing::warn!(error = %e, "Could not load preferred context");
                return ObjectPath::new(NO_CONTEXT);
            }
        };
        self.preferred_context = Some(context.clone());
        context
    }

    async fn set_property(&mut self, name: &str, value: &Variant) -> Result<()> {
        if name != PREFERRED_CONTEXT_PROPERTY {
            return Err(MmsError::InvalidArguments(format!("Property '{name}' cannot be set")));
        }
        let context: ObjectPath = value.decode()?;
        if self.preferred_context() == context {
            return Ok(());
        }

        self.store.set_preferred_context(&self.settings.identity, context.as_str())?;
        self.preferred_context = Some(context.clone());
        tracing::info!(context = %context, "Preferred context changed");

        let signal = Signal::new(self.path.clone(), MMS_SERVICE_DBUS_IFACE, PROPERTY_CHANGED_SIGNAL)
            .with_arg(PREFERRED_CONTEXT_PROPERTY)
            .with_arg(context);
        if let Err(e) = self.conn.send(signal.into()).await {
            tracing::warn!(error = %e, "Could not announce preferred context change");
        }
        Ok(())
    }
}
