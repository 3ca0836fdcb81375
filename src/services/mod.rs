pub mod message_object;
pub mod mms;

pub use message_object::{MessageObject, MessageRequest};
pub use mms::{MmsService, OutgoingMessage, ServiceHandle, ServiceSettings};

pub const MMS_DBUS_PATH: &str = "/org/ofono/mms";
pub const MMS_SERVICE_DBUS_IFACE: &str = "org.ofono.mms.Service";
pub const MMS_MESSAGE_DBUS_IFACE: &str = "org.ofono.mms.Message";

pub const MESSAGE_ADDED_SIGNAL: &str = "MessageAdded";
pub const MESSAGE_REMOVED_SIGNAL: &str = "MessageRemoved";
pub const PROPERTY_CHANGED_SIGNAL: &str = "PropertyChanged";

pub const IDENTITY_PROPERTY: &str = "Identity";
pub const USE_DELIVERY_REPORTS_PROPERTY: &str = "UseDeliveryReports";
pub const MODEM_OBJECT_PATH_PROPERTY: &str = "ModemObjectPath";
pub const PREFERRED_CONTEXT_PROPERTY: &str = "PreferredContext";
pub const STATUS_PROPERTY: &str = "Status";
