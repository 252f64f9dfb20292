//! Configuration file support for UDT CLI tools

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use udt::protocol::packet::MAX_PAYLOAD_SIZE;
use udt::protocol::SeqNumber;
use udt::{SendQueueConfig, DEFAULT_FLOW_WINDOW};

/// Sender configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Peer address
    pub destination: SocketAddr,
    /// Local bind address (defaults to an ephemeral port)
    pub bind: Option<SocketAddr>,
    /// Input source (file path or "-" for stdin)
    #[serde(default = "default_stdio")]
    pub input: String,
    /// Payload bytes per packet
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
    /// Maximum packets in flight
    #[serde(default = "default_flow_window")]
    pub flow_window: u32,
    /// Spacing between new packets in microseconds (0 = unpaced)
    #[serde(default)]
    pub send_period_us: u64,
    /// Seconds the window may stay full before the sender gives up
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
    /// First sequence number
    #[serde(default)]
    pub initial_seq: u32,
    /// Peer socket ID written into data packets
    #[serde(default)]
    pub dest_socket_id: u32,
    /// Statistics interval in seconds (0 disables)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_stdio() -> String {
    "-".to_string()
}

fn default_payload_size() -> usize {
    1316
}

fn default_flow_window() -> u32 {
    DEFAULT_FLOW_WINDOW
}

fn default_inactivity_timeout() -> u64 {
    5
}

fn default_stats_interval() -> u64 {
    1
}

/// Sink (test receiver) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Listen address
    pub listen: SocketAddr,
    /// Output destination (file path or "-" for stdout)
    #[serde(default = "default_stdio")]
    pub output: String,
    /// How often cumulative ACKs are sent, in milliseconds
    #[serde(default = "default_ack_interval")]
    pub ack_interval_ms: u64,
    /// First sequence number the sender will use
    #[serde(default)]
    pub initial_seq: u32,
    /// Statistics interval in seconds (0 disables)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_ack_interval() -> u64 {
    10
}

/// Combined configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Sender configuration
    pub sender: Option<SenderConfig>,
    /// Sink configuration
    pub sink: Option<SinkConfig>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Create example sender configuration
    pub fn example_sender() -> Self {
        Config {
            sender: Some(SenderConfig {
                send_period_us: 100,
                ..SenderConfig::new(SocketAddr::from(([127, 0, 0, 1], 9000)))
            }),
            sink: None,
        }
    }

    /// Create example sink configuration
    pub fn example_sink() -> Self {
        Config {
            sender: None,
            sink: Some(SinkConfig {
                listen: SocketAddr::from(([0, 0, 0, 0], 9000)),
                output: default_stdio(),
                ack_interval_ms: default_ack_interval(),
                initial_seq: 0,
                stats_interval_secs: default_stats_interval(),
            }),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl SenderConfig {
    /// Defaults for everything but the destination
    pub fn new(destination: SocketAddr) -> Self {
        SenderConfig {
            destination,
            bind: None,
            input: default_stdio(),
            payload_size: default_payload_size(),
            flow_window: default_flow_window(),
            send_period_us: 0,
            inactivity_timeout_secs: default_inactivity_timeout(),
            initial_seq: 0,
            dest_socket_id: 0,
            stats_interval_secs: default_stats_interval(),
        }
    }

    /// Check values the send queue would reject or misbehave on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payload_size == 0 || self.payload_size > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::Invalid(format!(
                "payload_size must be between 1 and {}",
                MAX_PAYLOAD_SIZE
            )));
        }
        if self.flow_window == 0 {
            return Err(ConfigError::Invalid(
                "flow_window must be at least 1".to_string(),
            ));
        }
        SeqNumber::try_from_raw(self.initial_seq)
            .ok_or_else(|| ConfigError::Invalid("initial_seq exceeds 31 bits".to_string()))?;
        Ok(())
    }

    /// Build the library-level queue configuration
    pub fn send_queue_config(&self) -> Result<SendQueueConfig, ConfigError> {
        self.validate()?;

        Ok(SendQueueConfig {
            initial_seq: SeqNumber::new_unchecked(self.initial_seq),
            dest_socket_id: self.dest_socket_id,
            flow_window: self.flow_window,
            send_period: Duration::from_micros(self.send_period_us),
            inactivity_timeout: self.inactivity_timeout(),
            max_payload_size: self.payload_size,
            ..SendQueueConfig::default()
        })
    }

    /// Get inactivity timeout as Duration
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

impl SinkConfig {
    /// Get ACK interval as Duration
    pub fn ack_interval(&self) -> Duration {
        Duration::from_millis(self.ack_interval_ms)
    }

    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_configs() {
        let sender_config = Config::example_sender();
        assert!(sender_config.sender.is_some());

        let sink_config = Config::example_sink();
        assert!(sink_config.sink.is_some());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = Config::example_sender();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_defaults_applied() {
        let parsed: Config = toml::from_str(
            r#"
            [sender]
            destination = "10.0.0.2:9000"
            "#,
        )
        .unwrap();

        let sender = parsed.sender.unwrap();
        assert_eq!(sender.input, "-");
        assert_eq!(sender.flow_window, DEFAULT_FLOW_WINDOW);
        assert_eq!(sender.inactivity_timeout(), Duration::from_secs(5));
        assert_eq!(sender.send_period_us, 0);
    }

    #[test]
    fn test_send_queue_config() {
        let mut sender = Config::example_sender().sender.unwrap();
        sender.initial_seq = 42;

        let queue_config = sender.send_queue_config().unwrap();
        assert_eq!(queue_config.initial_seq, SeqNumber::new(42));
        assert_eq!(queue_config.send_period, Duration::from_micros(100));
        assert_eq!(queue_config.max_payload_size, 1316);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut sender = Config::example_sender().sender.unwrap();
        sender.payload_size = MAX_PAYLOAD_SIZE + 1;
        assert!(matches!(sender.validate(), Err(ConfigError::Invalid(_))));

        sender.payload_size = 1000;
        sender.flow_window = 0;
        assert!(sender.validate().is_err());

        sender.flow_window = 16;
        sender.initial_seq = u32::MAX;
        assert!(sender.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("udt-config-{}.toml", std::process::id()));
        let config = Config::example_sink();

        config.to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(loaded, config);
    }
}
