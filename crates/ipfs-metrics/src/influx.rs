// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tracing::{error, info};

use crate::errors::InfluxError;

/// Creates `db` on the sink at `addr` (`host:port`). Safe to repeat.
pub async fn create_database(
    client: &reqwest::Client,
    addr: &str,
    db: &str,
) -> Result<(), InfluxError> {
    let url = format!("http://{addr}/query");
    let query = format!("CREATE DATABASE {db}");
    let response = client
        .post(&url)
        .form(&[("q", query.as_str())])
        .send()
        .await
        .map_err(|source| InfluxError::Request {
            url: url.clone(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!("Create database {db} on {addr}: {status} {body}");
        return Err(InfluxError::Status {
            db: db.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    info!("Created database {db} on {addr}");
    Ok(())
}
