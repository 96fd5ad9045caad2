// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the log proxy.

use std::time::Duration;

/// Errors raised while validating a `name=value` tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("Invalid tag: {0}")]
    Invalid(String),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config, no source specified")]
    NoSource,
    #[error("invalid config, no sink port given")]
    NoSinkPort,
    #[error("invalid config, no sink address given")]
    NoSinkAddress,
    #[error("invalid config, no sink format given")]
    NoSinkFormat,
    #[error("invalid config, unknown format: {0}")]
    UnknownFormat(String),
    #[error("invalid config, {0}")]
    Invalid(String),
    #[error(transparent)]
    Tag(#[from] TagError),
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised while encoding a single event. The event is dropped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("missing required message key: {0}")]
    MissingKey(&'static str),
    #[error("invalid time {value:?}: {reason}")]
    InvalidTime { value: String, reason: String },
    #[error("unsupported type for {key}: {value}")]
    UnsupportedType { key: String, value: String },
    #[error("failed to serialize event: {0}")]
    Json(String),
}

/// Errors raised while resolving a daemon's node identifier.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Get NodeId from {0}, is the ipfs daemon running? {1}")]
    Request(String, #[source] reqwest::Error),
    #[error("Could not get NodeID from {0}, are you sure this is an ipfs daemon?")]
    MissingId(String),
    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
}

/// Errors raised while delivering bytes to a sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The sink answered with something other than success. The event is dropped.
    #[error("sink rejected write with status {0}")]
    Rejected(u16),
    /// The sink could not be reached after every retry. Fatal to the owning proxy.
    #[error("sink transport failure after {attempts} attempts: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write to stdout: {0}")]
    Stdout(#[from] std::io::Error),
}

/// Reasons a pipeline stage ends abnormally.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("writer stopped: {0}")]
    Sink(#[from] SinkError),
}

/// Errors raised while starting or running a proxy.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("ERROR - Source: {0} already in collection")]
    Duplicate(String),
    #[error("failed to open log stream from {url}: {source}")]
    SourceConnect {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("timed out after {timeout:?} opening log stream from {url}")]
    SourceTimeout { url: String, timeout: Duration },
    #[error("proxy {0} was already started")]
    AlreadyStarted(String),
    #[error("proxy {0} was closed before it started")]
    Closed(String),
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Errors raised while creating the sink database.
#[derive(Debug, thiserror::Error)]
pub enum InfluxError {
    #[error("failed to reach {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("creating database {db} failed with status {status}: {body}")]
    Status { db: String, status: u16, body: String },
}

/// Errors surfaced to a control plane caller as the command result.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("ERROR - Source: {0} not in collection")]
    NotFound(String),
    #[error("no node given")]
    MissingNode,
    #[error("no source given")]
    MissingSource,
    #[error("no sink given")]
    MissingSink,
    #[error("unknown command type: {0}")]
    UnknownCommand(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ControlError::NotFound("QmNode".to_string());
        assert_eq!(error.to_string(), "ERROR - Source: QmNode not in collection");

        let error = ProxyError::Duplicate("QmNode".to_string());
        assert_eq!(
            error.to_string(),
            "ERROR - Source: QmNode already in collection"
        );
    }

    #[test]
    fn test_config_error_from_tag_error() {
        let error: ConfigError = TagError::Invalid("t=".to_string()).into();
        assert_eq!(error.to_string(), "Invalid tag: t=");
    }
}
