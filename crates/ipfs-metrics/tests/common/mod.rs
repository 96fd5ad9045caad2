// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fake IPFS daemon whose log tail stays open until the test drops it.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use ipfs_metrics::config::Source;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

type Body = UnsyncBoxBody<Bytes, Infallible>;

pub struct MockDaemon {
    pub addr: SocketAddr,
    events: broadcast::Sender<Bytes>,
}

impl MockDaemon {
    /// Serves `/api/v0/id` with `node_id` and a streaming `/api/v0/log/tail`.
    pub async fn start(node_id: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock daemon");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let (events, _) = broadcast::channel(64);

        let id_body = Bytes::from(format!(r#"{{"ID":"{node_id}","AgentVersion":"mock"}}"#));
        let tx = events.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let io = TokioIo::new(stream);
                let tx = tx.clone();
                let id_body = id_body.clone();
                tokio::spawn(async move {
                    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let response = respond(req.uri().path(), &id_body, &tx);
                        async move { Ok::<_, Infallible>(response) }
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockDaemon { addr, events }
    }

    pub fn source(&self) -> Source {
        Source::new(self.addr.ip().to_string(), self.addr.port().to_string(), vec![])
    }

    /// Pushes one record to every open tail.
    pub fn emit(&self, record: &str) {
        let _ = self.events.send(Bytes::from(record.to_string()));
    }
}

fn respond(path: &str, id_body: &Bytes, events: &broadcast::Sender<Bytes>) -> Response<Body> {
    match path {
        "/api/v0/id" => Response::new(Full::new(id_body.clone()).boxed_unsync()),
        "/api/v0/log/tail" => {
            let rx = events.subscribe();
            let records = futures::stream::unfold(rx, |mut rx| async move {
                loop {
                    match rx.recv().await {
                        Ok(record) => return Some((Ok::<_, Infallible>(Frame::data(record)), rx)),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            });
            Response::new(StreamBody::new(records).boxed_unsync())
        }
        _ => {
            let mut response = Response::new(Full::new(Bytes::new()).boxed_unsync());
            *response.status_mut() = hyper::StatusCode::NOT_FOUND;
            response
        }
    }
}

/// Sink that answers a single request with `200` and then stops listening,
/// so later writes fail to connect.
pub async fn start_vanishing_sink() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind vanishing sink");
    let addr = listener.local_addr().expect("Failed to get local addr");
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        drop(listener);
        let service = hyper::service::service_fn(|_req: Request<Incoming>| async {
            let mut response = Response::new(Full::new(Bytes::new()));
            response.headers_mut().insert(
                hyper::header::CONNECTION,
                hyper::header::HeaderValue::from_static("close"),
            );
            Ok::<_, Infallible>(response)
        });
        let _ = hyper::server::conn::http1::Builder::new()
            .keep_alive(false)
            .serve_connection(TokioIo::new(stream), service)
            .await;
    });
    addr
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
