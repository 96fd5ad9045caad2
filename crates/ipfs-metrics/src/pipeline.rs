// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The three stages of a proxy: read, tag, write.
//!
//! Stages only talk through the two bounded queues. A full queue suspends the
//! stage feeding it, which in turn stops the reader from pulling more bytes off
//! the network. Every suspension point also races the proxy's cancellation
//! token, and events already dequeued when it fires are abandoned.

use std::fmt::Display;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::config::Format;
use crate::errors::{SinkError, StageError};
use crate::event::LogEvent;
use crate::sink::SinkWriter;
use crate::source::JsonStreamDecoder;
use crate::tag::Tag;

/// Pulls records off the log stream and queues them on `inbound`.
///
/// A decode error ends the stream for this source; it is not retried.
pub async fn read_source<S, E>(
    source: String,
    mut stream: S,
    inbound: Sender<LogEvent>,
    cancel_token: CancellationToken,
) -> Result<(), StageError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    info!("Reader Open In-Stream: {source}");
    let mut decoder = JsonStreamDecoder::default();

    'read: loop {
        loop {
            match decoder.next_record() {
                Ok(Some(message)) => {
                    tokio::select! {
                        biased;
                        _ = cancel_token.cancelled() => break 'read,
                        sent = inbound.send(LogEvent::new(message)) => {
                            if sent.is_err() {
                                debug!("Reader {source}: tagger gone");
                                break 'read;
                            }
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Read Source Decode from {source}: {e}");
                    break 'read;
                }
            }
        }

        let chunk = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break 'read,
            chunk = stream.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => decoder.push(&bytes),
            Some(Err(e)) => {
                error!("Read Source from {source}: {e}");
                break;
            }
            None => {
                if decoder.has_pending() {
                    warn!("Read Source from {source}: stream ended mid-record, discarding it");
                }
                break;
            }
        }
    }

    // dropping the stream closes the connection
    drop(stream);
    info!("Reader Close In-Stream: {source}");
    Ok(())
}

/// Appends the source's tags to each event on its way from `inbound` to `outbound`.
pub async fn tag_events(
    source: String,
    tags: Vec<Tag>,
    mut inbound: Receiver<LogEvent>,
    outbound: Sender<LogEvent>,
    cancel_token: CancellationToken,
) -> Result<(), StageError> {
    info!("Filter Open In-Stream: {source}");
    loop {
        let mut event = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            event = inbound.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        event.add_tags(&tags);
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            sent = outbound.send(event) => {
                if sent.is_err() {
                    debug!("Filter {source}: writer gone");
                    break;
                }
            }
        }
    }
    info!("Filter Close In-Stream: {source}");
    Ok(())
}

/// Encodes events from `outbound` and hands them to the sink.
///
/// Events that fail to encode or that the sink rejects are dropped. A sink
/// that cannot be reached cancels the whole proxy.
pub async fn write_sink(
    sink_name: String,
    sink: SinkWriter,
    format: Format,
    mut outbound: Receiver<LogEvent>,
    cancel_token: CancellationToken,
) -> Result<(), StageError> {
    info!("Writer Open Out-Stream: {sink_name}");
    loop {
        let mut event = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            event = outbound.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let payload = match codec::encode(format, &mut event) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                error!("Write Sink encode for {sink_name}: {e}: {:?}", event.message);
                continue;
            }
        };

        let written = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            written = sink.write(payload) => written,
        };
        match written {
            Ok(()) => {}
            Err(SinkError::Rejected(status)) => {
                debug!("Dropped event rejected by {sink_name} with status {status}");
            }
            Err(e) => {
                error!("Writer {sink_name} giving up, stopping proxy: {e}");
                cancel_token.cancel();
                info!("Writer Close Out-Stream: {sink_name}");
                return Err(e.into());
            }
        }
    }
    info!("Writer Close Out-Stream: {sink_name}");
    Ok(())
}
