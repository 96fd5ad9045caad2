// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tracing::debug;

use crate::control::Command;

/// Sends `cmd` to a running daemon and returns the raw response body.
pub async fn send_command(host: &str, port: u16, cmd: &Command) -> Result<String, reqwest::Error> {
    let url = format!("http://{host}:{port}/");
    debug!("Sending {} command to {url}", cmd.kind);
    reqwest::Client::new()
        .put(&url)
        .json(cmd)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
}
