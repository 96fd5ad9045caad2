// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Opening and decoding a daemon's log tail.
//!
//! The tail endpoint streams JSON objects back to back with no delimiter, and
//! network chunks can cut an object anywhere, so decoding is incremental.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::Source;
use crate::errors::ProxyError;

/// Raw byte stream of a daemon's log tail.
pub type EventStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// Issues the tail request and returns the body as a byte stream.
///
/// `open_timeout` bounds the wait for the response head. The body itself is
/// never timed out.
pub async fn open_event_stream(
    client: &reqwest::Client,
    source: &Source,
    open_timeout: Duration,
) -> Result<EventStream, ProxyError> {
    let url = source.tail_url();
    let response = tokio::time::timeout(open_timeout, client.get(&url).send())
        .await
        .map_err(|_| ProxyError::SourceTimeout {
            url: url.clone(),
            timeout: open_timeout,
        })?
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| ProxyError::SourceConnect {
            url: url.clone(),
            source: e,
        })?;
    debug!("Opened log stream {url}");
    Ok(response.bytes_stream().boxed())
}

/// Buffers chunks and yields one complete JSON object at a time.
#[derive(Debug, Default)]
pub struct JsonStreamDecoder {
    buf: Vec<u8>,
}

impl JsonStreamDecoder {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Returns `Ok(None)` when more bytes are needed for the next record.
    pub fn next_record(&mut self) -> Result<Option<Map<String, Value>>, serde_json::Error> {
        let (next, consumed) = {
            let mut records =
                serde_json::Deserializer::from_slice(&self.buf).into_iter::<Map<String, Value>>();
            let next = records.next();
            (next, records.byte_offset())
        };
        match next {
            None => {
                self.buf.clear();
                Ok(None)
            }
            Some(Ok(record)) => {
                self.buf.drain(..consumed);
                Ok(Some(record))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(e),
        }
    }

    /// True if a partial record is buffered.
    pub fn has_pending(&self) -> bool {
        self.buf.iter().any(|b| !b.is_ascii_whitespace())
    }
}
