// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Table of active proxies keyed by node identifier.
//!
//! Shared by the control plane and every proxy's startup path. All access goes
//! through one mutex and no await happens while it is held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::errors::ProxyError;
use crate::proxy::Proxy;

#[derive(Default)]
pub struct Registry {
    proxies: Mutex<HashMap<String, Arc<Proxy>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    // a panic while holding the lock cannot leave the map half-updated
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Proxy>>> {
        self.proxies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `proxy` under its name unless an active proxy already holds it.
    ///
    /// A proxy that already reached a terminal state is replaced.
    pub fn try_insert(&self, proxy: Arc<Proxy>) -> Result<(), ProxyError> {
        let mut proxies = self.lock();
        if let Some(existing) = proxies.get(proxy.name()) {
            if !existing.state().is_terminal() {
                return Err(ProxyError::Duplicate(proxy.name().to_string()));
            }
            info!(
                "Replacing {} proxy for {}",
                existing.state(),
                existing.name()
            );
        }
        debug!("Registered proxy {}", proxy.name());
        proxies.insert(proxy.name().to_string(), proxy);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Proxy>> {
        self.lock().get(name).cloned()
    }

    /// True if `name` is held by a proxy that has not stopped.
    pub fn contains_active(&self, name: &str) -> bool {
        self.lock()
            .get(name)
            .is_some_and(|proxy| !proxy.state().is_terminal())
    }

    /// Removes `name` only if it still maps to this exact proxy.
    pub fn remove_if_same(&self, name: &str, proxy: &Arc<Proxy>) -> bool {
        let mut proxies = self.lock();
        match proxies.get(name) {
            Some(current) if Arc::ptr_eq(current, proxy) => {
                proxies.remove(name);
                debug!("Deregistered proxy {name}");
                true
            }
            _ => false,
        }
    }

    /// Point-in-time copy of every registered proxy, sorted by name.
    pub fn snapshot(&self) -> Vec<Arc<Proxy>> {
        let mut proxies: Vec<_> = self.lock().values().cloned().collect();
        proxies.sort_by(|a, b| a.name().cmp(b.name()));
        proxies
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Closes every proxy and empties the table.
    pub async fn shutdown_all(&self) {
        let proxies: Vec<_> = self.lock().drain().map(|(_, proxy)| proxy).collect();
        if proxies.is_empty() {
            return;
        }
        info!("Closing {} proxies", proxies.len());
        futures::future::join_all(proxies.iter().map(|proxy| proxy.close())).await;
    }
}
