// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One source-to-sink pipeline and its lifecycle.
//!
//! `Created -> Running -> Cancelling -> Stopped`, or `Failed` when a stage gives
//! up on its own. A supervisor task joins the three stages and publishes the
//! terminal state, so `close` returning means no stage is left running.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{DaemonConfig, Format, Sink, Source, DEFAULT_QUEUE_CAPACITY};
use crate::errors::{ProxyError, StageError};
use crate::http_utils::{build_client, build_stream_client};
use crate::pipeline;
use crate::registry::Registry;
use crate::sink::{RetryStrategy, SinkWriter};
use crate::source::open_event_stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyState {
    Created,
    Running,
    Cancelling,
    Stopped,
    Failed,
}

impl ProxyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyState::Created => "created",
            ProxyState::Running => "running",
            ProxyState::Cancelling => "cancelling",
            ProxyState::Stopped => "stopped",
            ProxyState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProxyState::Stopped | ProxyState::Failed)
    }
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings shared by every proxy the daemon starts.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Client for log tails, no overall timeout
    pub source_client: reqwest::Client,
    /// Bound on waiting for a tail's response head
    pub open_timeout: Duration,
    pub sink_client: reqwest::Client,
    pub db: String,
    pub queue_capacity: usize,
    pub retry_strategy: RetryStrategy,
}

impl Default for ProxySettings {
    fn default() -> Self {
        let config = DaemonConfig::default();
        ProxySettings {
            source_client: reqwest::Client::new(),
            open_timeout: config.sink_timeout,
            sink_client: reqwest::Client::new(),
            db: config.db,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry_strategy: config.retry_strategy,
        }
    }
}

impl ProxySettings {
    pub fn from_config(config: &DaemonConfig) -> Result<Self, ProxyError> {
        Ok(ProxySettings {
            source_client: build_stream_client(config.sink_timeout).map_err(ProxyError::Client)?,
            open_timeout: config.sink_timeout,
            sink_client: build_client(Some(config.sink_timeout)).map_err(ProxyError::Client)?,
            db: config.db.clone(),
            queue_capacity: config.queue_capacity,
            retry_strategy: config.retry_strategy,
        })
    }
}

/// What `list` reports about a proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyInfo {
    pub name: String,
    pub source: String,
    pub sink: String,
    pub format: Format,
    pub tags: Vec<String>,
    pub state: ProxyState,
}

pub struct Proxy {
    name: String,
    source: Source,
    sink: Sink,
    settings: ProxySettings,
    cancel_token: CancellationToken,
    state: watch::Sender<ProxyState>,
    started: AtomicBool,
}

impl Proxy {
    pub fn new(
        name: impl Into<String>,
        source: Source,
        sink: Sink,
        settings: ProxySettings,
    ) -> Self {
        let (state, _) = watch::channel(ProxyState::Created);
        Proxy {
            name: name.into(),
            source,
            sink,
            settings,
            cancel_token: CancellationToken::new(),
            state,
            started: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn sink(&self) -> &Sink {
        &self.sink
    }

    pub fn state(&self) -> ProxyState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, state: ProxyState) {
        self.state.send_replace(state);
    }

    /// Opens the source stream, registers the proxy and spawns its stages.
    ///
    /// Registration is the dedup point: if another active proxy already holds
    /// this name the stream is dropped and `Duplicate` returned.
    pub async fn start(self: &Arc<Self>, registry: &Registry) -> Result<(), ProxyError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ProxyError::AlreadyStarted(self.name.clone()));
        }

        let stream = open_event_stream(
            &self.settings.source_client,
            &self.source,
            self.settings.open_timeout,
        )
        .await?;
        registry.try_insert(Arc::clone(self))?;

        let running = self.state.send_if_modified(|state| {
            if *state == ProxyState::Created {
                *state = ProxyState::Running;
                true
            } else {
                false
            }
        });
        if !running {
            registry.remove_if_same(&self.name, self);
            return Err(ProxyError::Closed(self.name.clone()));
        }

        let capacity = self.settings.queue_capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let writer = SinkWriter::new(
            &self.sink,
            &self.settings.db,
            self.settings.sink_client.clone(),
            self.settings.retry_strategy,
        );

        let mut stages = JoinSet::new();
        stages.spawn(pipeline::read_source(
            self.source.to_string(),
            stream,
            inbound_tx,
            self.cancel_token.clone(),
        ));
        stages.spawn(pipeline::tag_events(
            self.source.to_string(),
            self.source.tags.clone(),
            inbound_rx,
            outbound_tx,
            self.cancel_token.clone(),
        ));
        stages.spawn(pipeline::write_sink(
            self.sink.to_string(),
            writer,
            self.sink.format,
            outbound_rx,
            self.cancel_token.clone(),
        ));

        let proxy = Arc::clone(self);
        tokio::spawn(async move { proxy.supervise(stages).await });
        info!(
            "Started proxy {}: {} -> {} ({})",
            self.name, self.source, self.sink, self.sink.format
        );
        Ok(())
    }

    async fn supervise(&self, mut stages: JoinSet<Result<(), StageError>>) {
        let mut failed = false;
        while let Some(joined) = stages.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Proxy {} stage failed: {e}", self.name);
                    failed = true;
                }
                Err(e) => {
                    error!("Proxy {} stage task died: {e}", self.name);
                    self.cancel_token.cancel();
                    failed = true;
                }
            }
        }
        let terminal = if failed {
            ProxyState::Failed
        } else {
            ProxyState::Stopped
        };
        self.state.send_replace(terminal);
        debug!("Proxy {} is {terminal}", self.name);
    }

    /// Cancels every stage and waits until they have all returned.
    ///
    /// Safe to call more than once and on a proxy that never started.
    pub async fn close(&self) {
        info!("Closing Connection: {}", self.name);
        self.cancel_token.cancel();
        self.state.send_if_modified(|state| match state {
            ProxyState::Created => {
                *state = ProxyState::Stopped;
                true
            }
            ProxyState::Running => {
                *state = ProxyState::Cancelling;
                true
            }
            _ => false,
        });
        let mut state = self.state.subscribe();
        if state.wait_for(ProxyState::is_terminal).await.is_err() {
            debug!("Proxy {} state channel closed", self.name);
        }
    }

    pub fn info(&self) -> ProxyInfo {
        ProxyInfo {
            name: self.name.clone(),
            source: self.source.to_string(),
            sink: self.sink.to_string(),
            format: self.sink.format,
            tags: self.source.tags.iter().map(ToString::to_string).collect(),
            state: self.state(),
        }
    }
}
