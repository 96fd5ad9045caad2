// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use crate::config::Sink;
use crate::errors::SinkError;

/// How often a write is attempted when the sink cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Up to `n` attempts back to back
    Immediate(u32),
    /// Up to `n` attempts, waiting `attempt * ms` milliseconds between them
    LinearBackoff(u32, u64),
}

impl RetryStrategy {
    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryStrategy::Immediate(n) | RetryStrategy::LinearBackoff(n, _) => (*n).max(1),
        }
    }

    fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryStrategy::Immediate(_) => None,
            RetryStrategy::LinearBackoff(_, ms) => {
                Some(Duration::from_millis(ms.saturating_mul(u64::from(attempt))))
            }
        }
    }
}

/// Delivers encoded events to stdout or to a sink's write endpoint.
#[derive(Clone, Debug)]
pub enum SinkWriter {
    Stdout,
    Http {
        client: reqwest::Client,
        url: String,
        retry_strategy: RetryStrategy,
    },
}

impl SinkWriter {
    pub fn new(sink: &Sink, db: &str, client: reqwest::Client, retry_strategy: RetryStrategy) -> Self {
        if sink.is_stdout() {
            SinkWriter::Stdout
        } else {
            SinkWriter::Http {
                client,
                url: sink.write_url(db),
                retry_strategy,
            }
        }
    }

    pub async fn write(&self, payload: Bytes) -> Result<(), SinkError> {
        match self {
            SinkWriter::Stdout => write_stdout(&payload).await,
            SinkWriter::Http {
                client,
                url,
                retry_strategy,
            } => write_http(client, url, *retry_strategy, payload).await,
        }
    }
}

/// Writes one event per line. JSON payloads get a trailing newline so
/// consecutive events stay separable; line protocol already ends in one.
async fn write_stdout(payload: &[u8]) -> Result<(), SinkError> {
    let mut line = Vec::with_capacity(payload.len() + 1);
    line.extend_from_slice(payload);
    if !line.ends_with(b"\n") {
        line.push(b'\n');
    }
    let mut stdout = tokio::io::stdout();
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(())
}

async fn write_http(
    client: &reqwest::Client,
    url: &str,
    retry_strategy: RetryStrategy,
    payload: Bytes,
) -> Result<(), SinkError> {
    let max_attempts = retry_strategy.max_attempts();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let response = client
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(payload.clone())
            .send()
            .await;

        match response {
            Ok(resp) if resp.status() == StatusCode::NO_CONTENT => {
                debug!("Wrote {} bytes to {url}", payload.len());
                return Ok(());
            }
            Ok(resp) => {
                let status = resp.status();
                let headers = resp.headers().clone();
                let body = resp.text().await.unwrap_or_default();
                error!(
                    "Write Sink write to {url}: {:?}",
                    String::from_utf8_lossy(&payload)
                );
                error!("Status: {status}");
                error!("Headers: {headers:?}");
                error!("Body: {body}");
                return Err(SinkError::Rejected(status.as_u16()));
            }
            Err(e) => {
                if attempts >= max_attempts {
                    error!("Failed to write to {url} after {attempts} attempts: {e}");
                    return Err(SinkError::Transport {
                        attempts,
                        source: e,
                    });
                }
                warn!("Network error writing to {url} (attempt {attempts}): {e}");
                if let Some(delay) = retry_strategy.delay(attempts) {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Format;
    use mockito::{Matcher, Server};
    use tracing_test::traced_test;

    fn http_writer(server: &Server, retry_strategy: RetryStrategy) -> SinkWriter {
        let host = server.host_with_port();
        let (address, port) = host.rsplit_once(':').unwrap();
        SinkWriter::new(
            &Sink::new(address, port, Format::LineProtocol),
            "ipfsmetrics",
            reqwest::Client::new(),
            retry_strategy,
        )
    }

    #[test]
    fn test_stdout_when_sink_empty() {
        let writer = SinkWriter::new(
            &Sink::stdout(Format::Json),
            "ipfsmetrics",
            reqwest::Client::new(),
            RetryStrategy::Immediate(1),
        );
        assert!(matches!(writer, SinkWriter::Stdout));
    }

    #[tokio::test]
    async fn test_stdout_write() {
        let writer = SinkWriter::Stdout;
        writer.write(Bytes::from_static(b"{\"system\":\"dht\"}")).await.unwrap();
        writer
            .write(Bytes::from_static(b"dht duration=0 1\n"))
            .await
            .unwrap();
    }

    #[test]
    fn test_retry_delays() {
        assert_eq!(RetryStrategy::Immediate(3).delay(1), None);
        assert_eq!(
            RetryStrategy::LinearBackoff(3, 10).delay(2),
            Some(Duration::from_millis(20))
        );
        assert_eq!(RetryStrategy::Immediate(0).max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_http_write_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .match_query(Matcher::UrlEncoded("db".into(), "ipfsmetrics".into()))
            .match_header("content-type", "application/octet-stream")
            .match_body("dht duration=0 1\n")
            .with_status(204)
            .create_async()
            .await;

        let writer = http_writer(&server, RetryStrategy::Immediate(1));
        writer
            .write(Bytes::from_static(b"dht duration=0 1\n"))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_http_write_rejected_is_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":"unable to parse"}"#)
            .expect(1)
            .create_async()
            .await;

        let writer = http_writer(&server, RetryStrategy::Immediate(3));
        let err = writer
            .write(Bytes::from_static(b"garbage\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Rejected(400)));
        assert!(logs_contain("Status: 400"));
        assert!(logs_contain("unable to parse"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_write_transport_failure_after_retries() {
        // nothing listens on the discard port
        let writer = SinkWriter::new(
            &Sink::new("127.0.0.1", "9", Format::Json),
            "ipfsmetrics",
            reqwest::Client::new(),
            RetryStrategy::LinearBackoff(2, 1),
        );
        let err = writer.write(Bytes::from_static(b"{}")).await.unwrap_err();
        assert!(matches!(err, SinkError::Transport { attempts: 2, .. }));
    }
}
