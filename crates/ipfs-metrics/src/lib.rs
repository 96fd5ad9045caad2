// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Proxies the JSON log tail of IPFS daemons to a metrics sink.
//!
//! Each source gets a [`proxy::Proxy`] running three stages connected by
//! bounded queues. The [`control::ControlPlane`] adds, removes and lists
//! proxies at runtime over HTTP.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod client;
pub mod codec;
pub mod config;
pub mod control;
pub mod errors;
pub mod event;
pub mod http_utils;
pub mod identity;
pub mod influx;
pub mod pipeline;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod sink;
pub mod source;
pub mod tag;
