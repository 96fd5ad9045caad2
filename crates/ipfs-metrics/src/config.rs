// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;
use crate::sink::RetryStrategy;
use crate::tag::Tag;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 9123;
const DEFAULT_DB: &str = "ipfsmetrics";
/// Slots in each of a proxy's two queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_SINK_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SINK_RETRIES: u32 = 3;
const DEFAULT_SINK_BACKOFF_MS: u64 = 100;

/// Wire encoding used by a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Format {
    Json,
    LineProtocol,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::LineProtocol => "lineprotocol",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = s.trim().to_lowercase();
        match format.as_str() {
            "" => Err(ConfigError::NoSinkFormat),
            "json" => Ok(Format::Json),
            "lineprotocol" => Ok(Format::LineProtocol),
            _ => Err(ConfigError::UnknownFormat(format)),
        }
    }
}

impl TryFrom<String> for Format {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Format> for String {
    fn from(format: Format) -> Self {
        format.as_str().to_string()
    }
}

/// A remote daemon producing a log event stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Source {
    #[serde(alias = "Address", default)]
    pub address: String,
    #[serde(alias = "Port", default)]
    pub port: String,
    #[serde(alias = "Tags", default)]
    pub tags: Vec<Tag>,
}

impl Source {
    pub fn new(address: impl Into<String>, port: impl Into<String>, tags: Vec<Tag>) -> Self {
        Source {
            address: address.into(),
            port: port.into(),
            tags,
        }
    }

    /// Splits an `address:port` string into a source without tags.
    pub fn from_addr(addr: &str) -> Result<Self, ConfigError> {
        match addr.rsplit_once(':') {
            Some((address, port)) if !address.is_empty() && !port.is_empty() => {
                Ok(Source::new(address, port, Vec::new()))
            }
            _ => Err(ConfigError::Invalid(format!(
                "expected address:port, got {addr:?}"
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.is_empty() || self.port.is_empty() {
            return Err(ConfigError::NoSource);
        }
        for tag in &self.tags {
            tag.validate()?;
        }
        Ok(())
    }

    pub fn tail_url(&self) -> String {
        format!("http://{self}/api/v0/log/tail?encoding=json&stream-channels=true")
    }

    pub fn id_url(&self) -> String {
        format!("http://{self}/api/v0/id")
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Destination of encoded events. An empty address and port means stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sink {
    #[serde(alias = "Address", default)]
    pub address: String,
    #[serde(alias = "Port", default)]
    pub port: String,
    #[serde(alias = "Format")]
    pub format: Format,
}

impl Sink {
    pub fn new(address: impl Into<String>, port: impl Into<String>, format: Format) -> Self {
        Sink {
            address: address.into(),
            port: port.into(),
            format,
        }
    }

    pub fn stdout(format: Format) -> Self {
        Sink::new("", "", format)
    }

    pub fn is_stdout(&self) -> bool {
        self.address.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.address.is_empty(), self.port.is_empty()) {
            (false, true) => Err(ConfigError::NoSinkPort),
            (true, false) => Err(ConfigError::NoSinkAddress),
            _ => Ok(()),
        }
    }

    pub fn write_url(&self, db: &str) -> String {
        format!("http://{}:{}/write?db={db}", self.address, self.port)
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_stdout() {
            f.write_str("stdout")
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

/// Static configuration file: one or more sources and a single sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "Source", alias = "source")]
    pub sources: Vec<Source>,
    #[serde(rename = "Sink", alias = "sink")]
    pub sink: Sink,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&contents)?;
        debug!(
            "Loaded config from {} with {} sources",
            path.as_ref().display(),
            config.sources.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSource);
        }
        for source in &self.sources {
            source.validate()?;
        }
        self.sink.validate()
    }
}

/// Runtime settings of the daemon, read from `IPFS_METRICS_*` environment variables.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Address the control plane listens on
    pub host: String,
    pub port: u16,
    /// Database named in every sink write
    pub db: String,
    /// When set, the database is created on this `host:port` at startup
    pub influx_addr: Option<String>,
    pub queue_capacity: usize,
    pub sink_timeout: Duration,
    pub retry_strategy: RetryStrategy,
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            db: DEFAULT_DB.to_string(),
            influx_addr: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sink_timeout: Duration::from_millis(DEFAULT_SINK_TIMEOUT_MS),
            retry_strategy: RetryStrategy::LinearBackoff(
                DEFAULT_SINK_RETRIES,
                DEFAULT_SINK_BACKOFF_MS,
            ),
            log_level: "info".to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, falling back to defaults
    /// for missing or unparsable values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = DaemonConfig::default();

        let host = lookup("IPFS_METRICS_HOST").unwrap_or(defaults.host);
        let port = parse_var(lookup("IPFS_METRICS_PORT")).unwrap_or(defaults.port);
        let db = lookup("IPFS_METRICS_DB")
            .filter(|db| !db.trim().is_empty())
            .unwrap_or(defaults.db);
        let influx_addr = lookup("IPFS_METRICS_INFLUX").filter(|addr| !addr.trim().is_empty());
        let queue_capacity = parse_var::<usize>(lookup("IPFS_METRICS_QUEUE_CAPACITY"))
            .unwrap_or(defaults.queue_capacity);
        let sink_timeout = parse_var::<u64>(lookup("IPFS_METRICS_SINK_TIMEOUT_MS"))
            .map(Duration::from_millis)
            .unwrap_or(defaults.sink_timeout);
        let retries = parse_var::<u32>(lookup("IPFS_METRICS_SINK_RETRIES"))
            .unwrap_or(DEFAULT_SINK_RETRIES);
        let backoff_ms = parse_var::<u64>(lookup("IPFS_METRICS_SINK_BACKOFF_MS"))
            .unwrap_or(DEFAULT_SINK_BACKOFF_MS);
        let log_level = lookup("IPFS_METRICS_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = DaemonConfig {
            host,
            port,
            db,
            influx_addr,
            queue_capacity,
            sink_timeout,
            retry_strategy: RetryStrategy::LinearBackoff(retries, backoff_ms),
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("control port must be non-zero".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacity must be non-zero".into()));
        }
        Ok(())
    }
}

/// Parses straight into the target type so out-of-range values are rejected
/// rather than truncated.
fn parse_var<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|val| val.trim().parse::<T>().ok())
}
