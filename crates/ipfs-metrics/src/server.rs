// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP front of the control plane. Every request body is a [`Command`].

use std::io;
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{http, Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::control::{Command, ControlPlane};
use crate::http_utils::{create_text_response, log_and_create_http_response, HttpResponse};

pub async fn bind(host: &str, port: u16) -> io::Result<TcpListener> {
    let listener = TcpListener::bind((host, port)).await?;
    info!("Control plane listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Serves commands until `cancel_token` fires, then closes every proxy.
pub async fn serve(
    listener: TcpListener,
    control: Arc<ControlPlane>,
    cancel_token: CancellationToken,
) -> io::Result<()> {
    let server = hyper::server::conn::http1::Builder::new();
    let mut joinset = JoinSet::new();

    let result = loop {
        let conn = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break Ok(()),
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("Server error: {e}");
                    break Err(e);
                }
                Ok((conn, peer)) => {
                    debug!("Accepted control connection from {peer}");
                    conn
                }
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                Err(e) if e.is_panic() => {
                    error!("Connection handler panicked: {e:?}");
                    continue;
                }
                Ok(()) | Err(_) => continue,
            },
        };

        let conn = TokioIo::new(conn);
        let server = server.clone();
        let control = Arc::clone(&control);
        joinset.spawn(async move {
            let service = service_fn(move |req| handle_request(Arc::clone(&control), req));
            if let Err(e) = server.serve_connection(conn, service).await {
                error!("Connection error: {e}");
            }
        });
    };

    joinset.shutdown().await;
    info!("Control plane stopped, closing proxies");
    control.registry().shutdown_all().await;
    result
}

async fn handle_request(
    control: Arc<ControlPlane>,
    req: Request<Incoming>,
) -> http::Result<HttpResponse> {
    debug!("{} {}", req.method(), req.uri());
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return log_and_create_http_response(
                &format!("Error reading request body: {e}"),
                StatusCode::BAD_REQUEST,
            );
        }
    };
    let cmd: Command = match serde_json::from_slice(&body) {
        Ok(cmd) => cmd,
        Err(e) => {
            return log_and_create_http_response(
                &format!("Error decoding command: {e}"),
                StatusCode::BAD_REQUEST,
            );
        }
    };
    match control.handle(cmd).await {
        Ok(response) => create_text_response(response),
        Err(e) => log_and_create_http_response(
            &format!("Error encoding response: {e}"),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    }
}
