// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use ipfs_metrics::{
    client,
    config::{Config, DaemonConfig, Format, Sink, Source},
    control::{Command, ControlPlane},
    http_utils::build_client,
    identity::HttpNodeIdResolver,
    influx,
    proxy::ProxySettings,
    registry::Registry,
    server,
    tag::parse_tags,
};

/// ipfs-metrics is a tool for working with ipfs events
#[derive(Parser, Debug)]
#[command(name = "ipfs-metrics")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Starts ipfs-metricsd
    Start,

    /// Add an ipfs daemon to metrics collection
    Add {
        /// Input of the event logs (ip:port)
        #[arg(short, long)]
        input: Option<String>,

        /// Output to which the event logs will flow (ip:port, stdout if empty)
        #[arg(short, long)]
        output: Option<String>,

        /// Use Line Protocol Format (Influxdb) when writing to output
        #[arg(long, visible_alias = "lp")]
        lineprotocol: bool,

        /// JSON config file with sources and sink, replaces the flags above
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Extra tags, tagKey=tagValue
        tags: Vec<String>,
    },

    /// Remove ipfs daemon from metrics collection
    Remove {
        /// Node id of the daemon
        node: String,
    },

    /// List ipfs daemons in metrics collection
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = DaemonConfig::from_env().context("invalid IPFS_METRICS_* configuration")?;
    init_logging(&config.log_level)?;

    let cmd = match args.command {
        Commands::Start => return start(config).await,
        Commands::Add {
            input,
            output,
            lineprotocol,
            config: path,
            tags,
        } => add_command(input, output, lineprotocol, path, &tags)?,
        Commands::Remove { node } => Command::remove(node),
        Commands::List => Command::list(),
    };

    let response = client::send_command(&config.host, config.port, &cmd)
        .await
        .context("Please run `ipfs-metrics start` first")?;
    println!("{response}");
    Ok(())
}

fn init_logging(log_level: &str) -> anyhow::Result<()> {
    let env_filter = format!("hyper=off,reqwest=off,{log_level}");
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter).context("could not parse log level")?)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;
    debug!("Logging subsystem enabled");
    Ok(())
}

fn add_command(
    input: Option<String>,
    output: Option<String>,
    lineprotocol: bool,
    config: Option<PathBuf>,
    tags: &[String],
) -> anyhow::Result<Command> {
    let extra_tags = parse_tags(tags)?;

    if let Some(path) = config {
        let config = Config::from_file(&path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        config.validate()?;
        if config.sink.is_stdout() {
            info!("No output given, will write to stdout");
        }
        let sources = config
            .sources
            .into_iter()
            .map(|mut source| {
                source.tags.extend(extra_tags.iter().cloned());
                source
            })
            .collect();
        return Ok(Command::add(sources, config.sink));
    }

    let Some(input) = input.filter(|input| !input.is_empty()) else {
        bail!("Source of event logs required: 'ipfs-metrics add -i 127.0.0.1:5001'");
    };
    let mut source = Source::from_addr(&input)?;
    source.tags = extra_tags;

    let format = if lineprotocol {
        Format::LineProtocol
    } else {
        Format::Json
    };
    let sink = match output.filter(|output| !output.is_empty()) {
        Some(output) => {
            let addr = Source::from_addr(&output)?;
            Sink::new(addr.address, addr.port, format)
        }
        None => {
            info!("No output given, will write to stdout");
            Sink::stdout(format)
        }
    };
    Ok(Command::add(vec![source], sink))
}

async fn start(config: DaemonConfig) -> anyhow::Result<()> {
    info!("ipfs-metricsd starting...");
    let settings = ProxySettings::from_config(&config)?;

    if let Some(addr) = &config.influx_addr {
        info!("Ensuring database exists...");
        if let Err(e) = influx::create_database(&settings.sink_client, addr, &config.db).await {
            error!("Please ensure that influxdb is running");
            return Err(e.into());
        }
    }

    let resolver = HttpNodeIdResolver::new(build_client(Some(config.sink_timeout))?);
    let control = Arc::new(ControlPlane::new(
        Arc::new(Registry::new()),
        Arc::new(resolver),
        settings,
    ));

    let listener = server::bind(&config.host, config.port)
        .await
        .with_context(|| format!("failed to listen on {}:{}", config.host, config.port))?;

    let cancel_token = CancellationToken::new();
    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutting down"),
            Err(e) => error!("Failed to listen for ctrl-c: {e}"),
        }
        shutdown.cancel();
    });

    server::serve(listener, control, cancel_token).await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ipfs_metrics::tag::Tag;

    #[test]
    fn test_parse_add_flags() {
        let args = Args::try_parse_from([
            "ipfs-metrics",
            "add",
            "-i",
            "127.0.0.1:5001",
            "--lp",
            "env=dev",
        ])
        .unwrap();
        let Commands::Add {
            input,
            output,
            lineprotocol,
            config,
            tags,
        } = args.command
        else {
            panic!("expected add");
        };
        let cmd = add_command(input, output, lineprotocol, config, &tags).unwrap();
        assert_eq!(cmd.kind, "add");
        assert_eq!(
            cmd.source,
            vec![Source::new("127.0.0.1", "5001", vec![Tag::new("env", "dev")])]
        );
        assert_eq!(cmd.sink, Some(Sink::stdout(Format::LineProtocol)));
    }

    #[test]
    fn test_add_with_output() {
        let cmd = add_command(
            Some("127.0.0.1:5001".into()),
            Some("127.0.0.1:8086".into()),
            false,
            None,
            &[],
        )
        .unwrap();
        assert_eq!(cmd.sink, Some(Sink::new("127.0.0.1", "8086", Format::Json)));
    }

    #[test]
    fn test_add_requires_input_and_valid_tags() {
        assert!(add_command(None, None, false, None, &[]).is_err());
        let bad = vec!["t=v=v2".to_string()];
        assert!(add_command(Some("127.0.0.1:5001".into()), None, false, None, &bad).is_err());
    }

    #[test]
    fn test_parse_remove() {
        let args = Args::try_parse_from(["ipfs-metrics", "remove", "QmNode"]).unwrap();
        assert!(matches!(args.command, Commands::Remove { node } if node == "QmNode"));
    }
}
