use thiserror::Error;

pub const ERROR_UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
pub const ERROR_UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
pub const ERROR_UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
pub const ERROR_INVALID_ARGUMENTS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
pub const ERROR_FAILED: &str = "org.freedesktop.DBus.Error.Failed";

#[derive(Error, Debug)]
pub enum MmsError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("No such interface '{interface}' at object path '{path}'")]
    UnknownInterface { interface: String, path: String },
    #[error("No such method '{member}' at object path '{path}'")]
    UnknownMethod { member: String, path: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Bus error: {0}")]
    Bus(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Service is closed")]
    ServiceClosed,
}

pub type Result<T> = std::result::Result<T, MmsError>;

impl MmsError {
    /// Bus error name used when this error is surfaced as a call reply.
    #[must_use]
    pub const fn bus_name(&self) -> &'static str {
        match self {
            Self::InvalidArguments(_) => ERROR_INVALID_ARGUMENTS,
            Self::UnknownInterface { .. } => ERROR_UNKNOWN_INTERFACE,
            Self::UnknownMethod { .. } => ERROR_UNKNOWN_METHOD,
            Self::NotFound(_) => ERROR_UNKNOWN_OBJECT,
            Self::Io(_)
            | Self::Json(_)
            | Self::Bus(_)
            | Self::Transport(_)
            | Self::Decode(_)
            | Self::ServiceClosed => ERROR_FAILED,
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
