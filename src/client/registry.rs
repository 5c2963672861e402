//! Caller-owned store of endpoints keyed by id.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::client::endpoint::ConnectionEndpoint;
use crate::config::EndpointConfig;
use crate::error::Result;

/// Endpoints shared by one application, created on first use.
pub struct EndpointRegistry {
    config: EndpointConfig,
    endpoints: Mutex<HashMap<String, ConnectionEndpoint>>,
}

impl EndpointRegistry {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// The endpoint registered under `id`, creating it (disconnected) when
    /// absent. An existing endpoint keeps its original target.
    pub fn get_or_create(&self, id: &str, target: &str) -> Result<ConnectionEndpoint> {
        let mut endpoints = self.endpoints.lock();
        if let Some(endpoint) = endpoints.get(id) {
            return Ok(endpoint.clone());
        }
        let endpoint = ConnectionEndpoint::with_id(id, target, self.config.clone())?;
        endpoints.insert(id.to_string(), endpoint.clone());
        tracing::debug!(endpoint = %id, url = %target, "Endpoint created");
        Ok(endpoint)
    }

    pub fn get(&self, id: &str) -> Option<ConnectionEndpoint> {
        self.endpoints.lock().get(id).cloned()
    }

    /// Forget an endpoint. The caller decides whether to close it.
    pub fn remove(&self, id: &str) -> Option<ConnectionEndpoint> {
        self.endpoints.lock().remove(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.endpoints.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.endpoints.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.lock().is_empty()
    }

    /// Close every endpoint with 1000 and empty the store.
    pub async fn shutdown(&self) {
        let endpoints: Vec<ConnectionEndpoint> =
            self.endpoints.lock().drain().map(|(_, e)| e).collect();
        for endpoint in endpoints {
            endpoint.close(1000, "registry shutdown").await;
        }
    }
}
