// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `add`, `remove` and `list` over the shared registry.
//!
//! Requests and responses share the [`Command`] shape; the response echoes the
//! request with `result` filled in.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{Sink, Source};
use crate::errors::{ControlError, InfluxError, ProxyError};
use crate::identity::NodeIdResolver;
use crate::influx;
use crate::proxy::{Proxy, ProxyInfo, ProxySettings};
use crate::registry::Registry;
use crate::tag::Tag;

pub const SUCCESS: &str = "Success";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Target of `remove`
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub source: Vec<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink: Option<Sink>,
    #[serde(default)]
    pub result: String,
}

impl Command {
    pub fn add(source: Vec<Source>, sink: Sink) -> Self {
        Command {
            kind: "add".to_string(),
            source,
            sink: Some(sink),
            ..Default::default()
        }
    }

    pub fn remove(node: impl Into<String>) -> Self {
        Command {
            kind: "remove".to_string(),
            node: node.into(),
            ..Default::default()
        }
    }

    pub fn list() -> Self {
        Command {
            kind: "list".to_string(),
            ..Default::default()
        }
    }
}

/// What happened to one source of an `add`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Started(String),
    /// An active proxy already reads from this node
    Skipped(String),
    Failed { source: String, reason: String },
}

impl fmt::Display for AddOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddOutcome::Started(node) => write!(f, "Started {node}"),
            AddOutcome::Skipped(node) => write!(f, "{}", ProxyError::Duplicate(node.clone())),
            AddOutcome::Failed { source, reason } => write!(f, "{source}: {reason}"),
        }
    }
}

pub struct ControlPlane {
    registry: Arc<Registry>,
    resolver: Arc<dyn NodeIdResolver>,
    settings: ProxySettings,
    /// Sink addresses whose database is known to exist
    databases: Mutex<HashSet<String>>,
}

impl ControlPlane {
    pub fn new(
        registry: Arc<Registry>,
        resolver: Arc<dyn NodeIdResolver>,
        settings: ProxySettings,
    ) -> Self {
        ControlPlane {
            registry,
            resolver,
            settings,
            databases: Mutex::new(HashSet::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Runs `cmd` and renders the response body.
    pub async fn handle(&self, mut cmd: Command) -> Result<String, serde_json::Error> {
        debug!("Handling {} command", cmd.kind);
        let result = match cmd.kind.as_str() {
            "add" => self.handle_add(&cmd).await,
            "remove" => self.remove(&cmd.node).await.map(|()| SUCCESS.to_string()),
            "list" => return render_list(&self.list()),
            other => Err(ControlError::UnknownCommand(other.to_string())),
        };
        cmd.result = result.unwrap_or_else(|e| e.to_string());
        serde_json::to_string_pretty(&cmd)
    }

    async fn handle_add(&self, cmd: &Command) -> Result<String, ControlError> {
        if cmd.source.is_empty() {
            return Err(ControlError::MissingSource);
        }
        let sink = cmd.sink.as_ref().ok_or(ControlError::MissingSink)?;
        sink.validate()?;

        let diagnostics: Vec<String> = self
            .add(&cmd.source, sink)
            .await
            .iter()
            .filter(|outcome| !matches!(outcome, AddOutcome::Started(_)))
            .map(ToString::to_string)
            .collect();
        if diagnostics.is_empty() {
            Ok(SUCCESS.to_string())
        } else {
            Ok(diagnostics.join("; "))
        }
    }

    /// Starts a proxy per source. Sources are handled independently and one
    /// failing never stops the others.
    ///
    /// The sink database is created first; if that fails no source is started.
    pub async fn add(&self, sources: &[Source], sink: &Sink) -> Vec<AddOutcome> {
        if let Err(e) = self.ensure_database(sink).await {
            error!("Please ensure that influxdb is running: {e}");
            return sources
                .iter()
                .map(|source| AddOutcome::Failed {
                    source: source.to_string(),
                    reason: e.to_string(),
                })
                .collect();
        }
        futures::future::join_all(sources.iter().map(|source| self.add_source(source, sink)))
            .await
    }

    /// Creates the database on `sink` the first time that address is used.
    async fn ensure_database(&self, sink: &Sink) -> Result<(), InfluxError> {
        if sink.is_stdout() {
            return Ok(());
        }
        let addr = sink.to_string();
        if self.databases().contains(&addr) {
            return Ok(());
        }
        info!("Ensuring database {} exists on {addr}", self.settings.db);
        influx::create_database(&self.settings.sink_client, &addr, &self.settings.db).await?;
        self.databases().insert(addr);
        Ok(())
    }

    fn databases(&self) -> MutexGuard<'_, HashSet<String>> {
        self.databases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn add_source(&self, source: &Source, sink: &Sink) -> AddOutcome {
        let failed = |reason: String| AddOutcome::Failed {
            source: source.to_string(),
            reason,
        };
        if let Err(e) = source.validate() {
            warn!("Skipping source {source}: {e}");
            return failed(e.to_string());
        }

        let node = match self.resolver.resolve(source).await {
            Ok(node) => node,
            Err(e) => {
                error!("{e}");
                return failed(e.to_string());
            }
        };
        if self.registry.contains_active(&node) {
            info!("{}", ProxyError::Duplicate(node.clone()));
            return AddOutcome::Skipped(node);
        }

        let mut tagged = source.clone();
        tagged.tags.push(Tag::node_id(node.as_str()));
        let proxy = Arc::new(Proxy::new(
            node.as_str(),
            tagged,
            sink.clone(),
            self.settings.clone(),
        ));
        match proxy.start(&self.registry).await {
            Ok(()) => AddOutcome::Started(node),
            Err(ProxyError::Duplicate(node)) => {
                info!("{}", ProxyError::Duplicate(node.clone()));
                AddOutcome::Skipped(node)
            }
            Err(e) => {
                error!("Failed to start proxy for {source}: {e}");
                failed(e.to_string())
            }
        }
    }

    /// Closes the proxy registered as `node` and removes its entry.
    pub async fn remove(&self, node: &str) -> Result<(), ControlError> {
        if node.is_empty() {
            return Err(ControlError::MissingNode);
        }
        let proxy = self
            .registry
            .get(node)
            .ok_or_else(|| ControlError::NotFound(node.to_string()))?;
        proxy.close().await;
        self.registry.remove_if_same(node, &proxy);
        info!("Removed {node} from collection");
        Ok(())
    }

    pub fn list(&self) -> Vec<ProxyInfo> {
        self.registry
            .snapshot()
            .iter()
            .map(|proxy| proxy.info())
            .collect()
    }
}

/// One pretty-printed object per entry, back to back.
pub fn render_list(entries: &[ProxyInfo]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&serde_json::to_string_pretty(entry)?);
    }
    Ok(out)
}

/// Splits a rendered list back into entries.
pub fn parse_list(body: &str) -> Result<Vec<ProxyInfo>, serde_json::Error> {
    serde_json::Deserializer::from_str(body)
        .into_iter::<ProxyInfo>()
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Format;
    use crate::errors::IdentityError;
    use crate::proxy::ProxyState;
    use async_trait::async_trait;

    struct FixedResolver(Option<&'static str>);

    #[async_trait]
    impl NodeIdResolver for FixedResolver {
        async fn resolve(&self, source: &Source) -> Result<String, IdentityError> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| IdentityError::MissingId(source.to_string()))
        }
    }

    fn control(node: Option<&'static str>) -> ControlPlane {
        ControlPlane::new(
            Arc::new(Registry::new()),
            Arc::new(FixedResolver(node)),
            ProxySettings::default(),
        )
    }

    fn registered(control: &ControlPlane, name: &str) -> Arc<Proxy> {
        let proxy = Arc::new(Proxy::new(
            name,
            Source::new("127.0.0.1", "5001", vec![Tag::node_id(name)]),
            Sink::new("127.0.0.1", "8086", Format::LineProtocol),
            ProxySettings::default(),
        ));
        control.registry().try_insert(Arc::clone(&proxy)).unwrap();
        proxy
    }

    fn response(body: &str) -> Command {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_command_wire_shape() {
        let cmd: Command = serde_json::from_str(
            r#"{"type":"add","source":[{"address":"127.0.0.1","port":"5001","tags":[{"Name":"env","Value":"dev"}]}],"sink":{"address":"","port":"","format":"LineProtocol"}}"#,
        )
        .unwrap();
        assert_eq!(cmd.kind, "add");
        assert_eq!(cmd.source[0].tags, vec![Tag::new("env", "dev")]);
        assert_eq!(cmd.sink.unwrap().format, Format::LineProtocol);

        let json = serde_json::to_value(Command::remove("QmNode")).unwrap();
        assert_eq!(json["type"], "remove");
        assert_eq!(json["node"], "QmNode");
        assert!(json.get("sink").is_none());
    }

    #[tokio::test]
    async fn test_add_skips_active_duplicate() {
        let control = control(Some("QmNode"));
        let existing = registered(&control, "QmNode");

        let outcomes = control
            .add(
                &[Source::new("127.0.0.1", "5002", vec![])],
                &Sink::stdout(Format::Json),
            )
            .await;
        assert_eq!(outcomes, vec![AddOutcome::Skipped("QmNode".to_string())]);
        assert_eq!(control.registry().len(), 1);
        assert!(Arc::ptr_eq(&control.registry().get("QmNode").unwrap(), &existing));
    }

    #[tokio::test]
    async fn test_add_reports_each_failure() {
        let control = control(None);
        let cmd = Command::add(
            vec![
                Source::new("127.0.0.1", "5001", vec![]),
                Source::new("127.0.0.1", "5002", vec![Tag::new("bad", "a,b")]),
            ],
            Sink::stdout(Format::Json),
        );
        let reply = response(&control.handle(cmd).await.unwrap());
        let diagnostics: Vec<_> = reply.result.split("; ").collect();
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics[0].starts_with("127.0.0.1:5001: Could not get NodeID"));
        assert_eq!(diagnostics[1], "127.0.0.1:5002: Invalid tag: bad=a,b");
        assert!(control.registry().is_empty());
    }

    #[tokio::test]
    async fn test_add_requires_source_and_valid_sink() {
        let control = control(Some("QmNode"));
        let mut cmd = Command::add(vec![], Sink::stdout(Format::Json));
        let reply = response(&control.handle(cmd.clone()).await.unwrap());
        assert_eq!(reply.result, "no source given");

        cmd.source = vec![Source::new("127.0.0.1", "5001", vec![])];
        cmd.sink = Some(Sink::new("influx", "", Format::Json));
        let reply = response(&control.handle(cmd).await.unwrap());
        assert_eq!(reply.result, "invalid config, no sink port given");
    }

    fn sink_for(server: &mockito::Server) -> Sink {
        let host = server.host_with_port();
        let (address, port) = host.rsplit_once(':').unwrap();
        Sink::new(address, port, Format::LineProtocol)
    }

    #[tokio::test]
    async fn test_add_creates_database_once_per_sink() {
        let mut server = mockito::Server::new_async().await;
        let query = server
            .mock("POST", "/query")
            .match_body(mockito::Matcher::UrlEncoded(
                "q".into(),
                "CREATE DATABASE ipfsmetrics".into(),
            ))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let control = control(Some("QmNode"));
        let sink = sink_for(&server);
        // nothing listens on the source, so the proxy itself never starts
        let source = Source::new("127.0.0.1", "9", vec![]);
        for _ in 0..2 {
            let outcomes = control.add(&[source.clone()], &sink).await;
            assert!(matches!(&outcomes[..], [AddOutcome::Failed { reason, .. }]
                if reason.starts_with("failed to open log stream")));
        }
        query.assert_async().await;
    }

    #[tokio::test]
    async fn test_add_fails_every_source_when_database_cannot_be_created() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/query")
            .with_status(401)
            .with_body("authorization failed")
            .create_async()
            .await;

        let control = control(Some("QmNode"));
        let cmd = Command::add(
            vec![
                Source::new("127.0.0.1", "5001", vec![]),
                Source::new("127.0.0.1", "5002", vec![]),
            ],
            sink_for(&server),
        );
        let reply = response(&control.handle(cmd).await.unwrap());
        let diagnostics: Vec<_> = reply.result.split("; ").collect();
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics[0].starts_with("127.0.0.1:5001: creating database ipfsmetrics failed"));
        assert!(diagnostics[1].contains("authorization failed"));
        assert!(control.registry().is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_node() {
        let control = control(Some("QmNode"));
        let other = registered(&control, "QmOther");

        let reply = response(&control.handle(Command::remove("QmNode")).await.unwrap());
        assert_eq!(reply.result, "ERROR - Source: QmNode not in collection");
        assert_eq!(reply.node, "QmNode");
        assert!(Arc::ptr_eq(&control.registry().get("QmOther").unwrap(), &other));
    }

    #[tokio::test]
    async fn test_remove_known_node_leaves_others() {
        let control = control(Some("QmNode"));
        let target = registered(&control, "QmNode");
        registered(&control, "QmOther");

        let reply = response(&control.handle(Command::remove("QmNode")).await.unwrap());
        assert_eq!(reply.result, SUCCESS);
        assert_eq!(target.state(), ProxyState::Stopped);
        assert!(control.registry().get("QmNode").is_none());
        assert!(control.registry().get("QmOther").is_some());
    }

    #[tokio::test]
    async fn test_remove_without_node() {
        let control = control(Some("QmNode"));
        let reply = response(&control.handle(Command::remove("")).await.unwrap());
        assert_eq!(reply.result, "no node given");
    }

    #[tokio::test]
    async fn test_list_renders_concatenated_entries() {
        let control = control(Some("QmNode"));
        registered(&control, "QmB");
        registered(&control, "QmA");

        let body = control.handle(Command::list()).await.unwrap();
        assert!(body.starts_with('{'));
        assert!(!body.starts_with('['));
        let entries = parse_list(&body).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "QmA");
        assert_eq!(entries[0].source, "127.0.0.1:5001");
        assert_eq!(entries[0].sink, "127.0.0.1:8086");
        assert_eq!(entries[0].format, Format::LineProtocol);
        assert_eq!(entries[0].tags, vec!["nodeId=QmA".to_string()]);
        assert_eq!(entries[0].state, ProxyState::Created);
    }

    #[tokio::test]
    async fn test_list_empty() {
        let control = control(None);
        assert_eq!(control.handle(Command::list()).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let control = control(None);
        let cmd = Command {
            kind: "restart".to_string(),
            ..Default::default()
        };
        let reply = response(&control.handle(cmd).await.unwrap());
        assert_eq!(reply.result, "unknown command type: restart");
        assert_eq!(reply.kind, "restart");
    }
}
