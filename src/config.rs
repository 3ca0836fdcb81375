use clap::{Args, Parser, ValueEnum};
use std::path::PathBuf;

const STORE_SUBPATH: &str = "mmsd/store";

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Identities (one per modem line) to expose a service for
    #[arg(long, env = "MMSD_IDENTITIES", value_delimiter = ',', required = true)]
    pub identities: Vec<String>,

    /// Object path of the modem the services are bound to
    #[arg(long, env = "MMSD_MODEM_OBJECT_PATH", default_value = "/ril_0")]
    pub modem_object_path: String,

    /// Request delivery reports for outgoing messages
    #[arg(long, env = "MMSD_USE_DELIVERY_REPORTS", default_value_t = false)]
    pub use_delivery_reports: bool,

    /// Seconds to wait for background tasks during shutdown
    #[arg(long, env = "MMSD_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,

    #[command(flatten)]
    pub storage: StorageConfig,

    #[command(flatten)]
    pub bus: BusConfig,

    #[command(flatten)]
    pub service: ServiceConfig,

    #[command(flatten)]
    pub transport: TransportConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Args)]
pub struct StorageConfig {
    /// Directory for message records, notifications and bodies
    #[arg(long, env = "MMSD_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Directory for drafts and send responses
    #[arg(long, env = "MMSD_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
}

impl StorageConfig {
    #[must_use]
    pub fn data_root(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join(STORE_SUBPATH))
    }

    #[must_use]
    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join(STORE_SUBPATH))
    }
}

#[derive(Clone, Debug, Args)]
pub struct BusConfig {
    /// Unix socket the local object bus listens on
    #[arg(long, env = "MMSD_BUS_SOCKET", default_value = "/run/mmsd/bus.sock")]
    pub socket_path: PathBuf,

    /// Number of outgoing bus messages buffered per client
    #[arg(long, env = "MMSD_BUS_BUFFER_SIZE", default_value_t = 256)]
    pub buffer_size: usize,
}

#[derive(Clone, Debug, Args)]
pub struct ServiceConfig {
    /// Capacity of the per-service bus call channel
    #[arg(long, env = "MMSD_CALL_CHANNEL_CAPACITY", default_value_t = 32)]
    pub call_channel_capacity: usize,

    /// Capacity of the per-service message event channel
    #[arg(long, env = "MMSD_EVENT_CHANNEL_CAPACITY", default_value_t = 32)]
    pub event_channel_capacity: usize,

    /// Capacity of the outbound send request channel
    #[arg(long, env = "MMSD_OUTGOING_CHANNEL_CAPACITY", default_value_t = 16)]
    pub outgoing_channel_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { call_channel_capacity: 32, event_channel_capacity: 32, outgoing_channel_capacity: 16 }
    }
}

#[derive(Clone, Debug, Args)]
pub struct TransportConfig {
    /// MMSC URL outgoing messages are posted to
    #[arg(long, env = "MMSD_MMSC_URL")]
    pub mmsc_url: Option<String>,

    /// HTTP proxy for MMS traffic
    #[arg(long, env = "MMSD_MMS_PROXY")]
    pub proxy: Option<String>,

    /// Timeout for a single fetch or submission
    #[arg(long, env = "MMSD_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    pub request_timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Default, Args)]
pub struct TelemetryConfig {
    /// Log output format
    #[arg(long, env = "MMSD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// OTLP collector endpoint; traces and metrics are exported when set
    #[arg(long, env = "MMSD_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identities_and_defaults() {
        let config = Config::try_parse_from([
            "mmsd",
            "--identities",
            "311480123,311480456",
            "--data-dir",
            "/var/lib/mmsd",
        ])
        .expect("parse");
        assert_eq!(config.identities, vec!["311480123".to_string(), "311480456".to_string()]);
        assert_eq!(config.storage.data_root(), PathBuf::from("/var/lib/mmsd"));
        assert!(config.storage.cache_root().ends_with(STORE_SUBPATH));
        assert_eq!(config.modem_object_path, "/ril_0");
        assert_eq!(config.telemetry.log_format, LogFormat::Text);
        assert_eq!(config.service.outgoing_channel_capacity, 16);
    }
}
