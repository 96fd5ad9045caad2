// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};

use crate::config::Source;
use crate::errors::IdentityError;

/// Resolves the stable node identifier of the daemon behind a source.
#[async_trait]
pub trait NodeIdResolver: Send + Sync {
    async fn resolve(&self, source: &Source) -> Result<String, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    #[serde(rename = "ID", default)]
    id: Option<String>,
}

/// Asks the daemon's `/api/v0/id` endpoint for its identity.
#[derive(Clone)]
pub struct HttpNodeIdResolver {
    client: reqwest::Client,
}

impl HttpNodeIdResolver {
    pub fn new(client: reqwest::Client) -> Self {
        HttpNodeIdResolver { client }
    }
}

#[async_trait]
impl NodeIdResolver for HttpNodeIdResolver {
    async fn resolve(&self, source: &Source) -> Result<String, IdentityError> {
        let url = source.id_url();
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| IdentityError::Request(url.clone(), e))?;
        if !response.status().is_success() {
            error!("Node id request to {url} failed: {}", response.status());
            return Err(IdentityError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        let info: NodeInfo = response
            .json()
            .await
            .map_err(|e| IdentityError::Request(url.clone(), e))?;
        match info.id {
            Some(id) if !id.is_empty() => {
                debug!("Resolved {source} to node {id}");
                Ok(id)
            }
            _ => Err(IdentityError::MissingId(source.to_string())),
        }
    }
}
