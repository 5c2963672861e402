//! Service registry.
//!
//! # Responsibilities
//! - Keep the table of declared services and their last known status
//! - Derive health-check addresses from kind, host and port
//! - Run probes and fold their outcome back into the descriptor
//!
//! # Design Decisions
//! - The table is a `DashMap`; no shard lock is held across an await, probes
//!   work on a cloned descriptor and write back afterwards
//! - A service deregistered while its probe is in flight simply loses the
//!   result
//! - Failures are counted; at `unhealthy_threshold` the recorded error
//!   becomes `ServiceUnavailable`

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{HealthConfig, ServiceConfig};
use crate::error::{FabricError, Result};
use crate::health::probe::{ProbeFailure, ProbeOutcome, Prober};
use crate::health::state::{HealthCheckResult, ServiceKind, ServiceStatus};
use crate::observability::metrics;

/// Last failure recorded against a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    /// `FabricError::kind()` of the failure.
    pub kind: String,
    pub at: DateTime<Utc>,
}

/// A registered service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub id: String,
    pub name: String,
    pub kind: ServiceKind,
    pub host: String,
    pub port: u16,
    pub status: ServiceStatus,
    /// Probe target; `None` for services that are never probed.
    pub health_check: Option<String>,
    pub last_error: Option<ErrorRecord>,
    pub last_checked: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub registered_at: DateTime<Utc>,
    /// Address as registered, before derivation. Kept so host/port updates
    /// re-derive correctly.
    #[serde(skip)]
    declared_health_check: Option<String>,
}

/// Body of a registration, from the HTTP API or the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceRegistration {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: ServiceKind,
    #[serde(default)]
    pub host: Option<String>,
    pub port: u16,
    #[serde(default, alias = "healthCheck")]
    pub health_check: Option<String>,
    #[serde(default)]
    pub status: Option<ServiceStatus>,
}

impl From<&ServiceConfig> for ServiceRegistration {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            kind: config.kind,
            host: Some(config.host.clone()),
            port: config.port,
            health_check: config.health_check.clone(),
            status: None,
        }
    }
}

/// Partial update; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServiceUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<ServiceStatus>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "healthCheck")]
    pub health_check: Option<String>,
    /// Error message reported by the service itself.
    #[serde(default)]
    pub error: Option<String>,
}

/// What `sync_declared` changed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncReport {
    pub registered: Vec<String>,
    pub removed: Vec<String>,
}

/// In-memory table of services plus the prober used to check them.
pub struct ServiceRegistry {
    services: DashMap<String, ServiceDescriptor>,
    prober: Prober,
    config: HealthConfig,
    /// Ids that came from the config file, so a reload can drop stale ones.
    declared: Mutex<HashSet<String>>,
}

impl ServiceRegistry {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            services: DashMap::new(),
            prober: Prober::new(config.timeout()),
            config,
            declared: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Insert or replace a service. Status defaults to `unknown`.
    pub fn register_service(&self, registration: ServiceRegistration) -> ServiceDescriptor {
        let host = registration
            .host
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let health_check = derive_health_check(
            registration.kind,
            &host,
            registration.port,
            &self.config.path,
            registration.health_check.as_deref(),
        );

        let descriptor = ServiceDescriptor {
            name: registration
                .name
                .unwrap_or_else(|| registration.id.clone()),
            id: registration.id,
            kind: registration.kind,
            host,
            port: registration.port,
            status: registration.status.unwrap_or_default(),
            health_check,
            last_error: None,
            last_checked: None,
            consecutive_failures: 0,
            registered_at: Utc::now(),
            declared_health_check: registration.health_check,
        };

        let replaced = self
            .services
            .insert(descriptor.id.clone(), descriptor.clone())
            .is_some();

        tracing::info!(
            service = %descriptor.id,
            kind = ?descriptor.kind,
            health_check = descriptor.health_check.as_deref().unwrap_or("none"),
            replaced,
            "Service registered"
        );

        descriptor
    }

    /// Merge `update` into the stored descriptor.
    pub fn update_service(&self, id: &str, update: ServiceUpdate) -> Result<ServiceDescriptor> {
        let mut entry = self
            .services
            .get_mut(id)
            .ok_or_else(|| FabricError::NotFound(format!("service {id}")))?;
        let descriptor = entry.value_mut();

        if let Some(name) = update.name {
            descriptor.name = name;
        }

        let mut readdress = false;
        if let Some(host) = update.host {
            descriptor.host = host;
            readdress = true;
        }
        if let Some(port) = update.port {
            descriptor.port = port;
            readdress = true;
        }
        if let Some(address) = update.health_check {
            descriptor.declared_health_check = Some(address);
            readdress = true;
        }
        if readdress {
            descriptor.health_check = derive_health_check(
                descriptor.kind,
                &descriptor.host,
                descriptor.port,
                &self.config.path,
                descriptor.declared_health_check.as_deref(),
            );
        }

        if let Some(message) = update.error {
            descriptor.last_error = Some(ErrorRecord {
                message,
                kind: "reported".to_string(),
                at: Utc::now(),
            });
        }

        if let Some(status) = update.status {
            transition(descriptor, status, "update");
            if status == ServiceStatus::Running {
                descriptor.consecutive_failures = 0;
            }
        }

        Ok(descriptor.clone())
    }

    /// Remove a service. Returns false when the id was not registered.
    pub fn deregister_service(&self, id: &str) -> bool {
        let removed = self.services.remove(id).is_some();
        if removed {
            self.declared.lock().remove(id);
            tracing::info!(service = %id, "Service deregistered");
        } else {
            tracing::debug!(service = %id, "Deregister of unknown service ignored");
        }
        removed
    }

    pub fn get_service(&self, id: &str) -> Option<ServiceDescriptor> {
        self.services.get(id).map(|entry| entry.value().clone())
    }

    /// All services, ordered by id.
    pub fn list_services(&self) -> Vec<ServiceDescriptor> {
        let mut services: Vec<ServiceDescriptor> = self
            .services
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Probe one service and record the outcome on its descriptor.
    ///
    /// Only an unknown id is an `Err`; a failed probe is an `Ok` result with
    /// status `error`.
    pub async fn check_service_health(&self, id: &str) -> Result<HealthCheckResult> {
        let descriptor = self
            .get_service(id)
            .ok_or_else(|| FabricError::NotFound(format!("service {id}")))?;

        if !descriptor.kind.is_probeable() {
            if let Some(mut entry) = self.services.get_mut(id) {
                entry.last_checked = Some(Utc::now());
            }
            return Ok(HealthCheckResult {
                status: descriptor.status,
                response_time_ms: 0,
                error: descriptor.last_error.map(|e| e.message),
                payload: None,
            });
        }

        let started = Instant::now();
        let outcome = match (descriptor.kind, descriptor.health_check.as_deref()) {
            (ServiceKind::Http, Some(url)) => self.prober.probe_http(url).await,
            (ServiceKind::Socket, Some(address)) => self.prober.probe_socket(address).await,
            _ => Err(ProbeFailure {
                error: FabricError::Internal(format!("service {id} has no health-check address")),
                response_time_ms: 0,
                payload: None,
            }),
        };
        metrics::record_probe(
            kind_label(descriptor.kind),
            outcome.is_ok(),
            started.elapsed(),
        );

        self.record_outcome(id, outcome)
    }

    /// Probe every service concurrently over a snapshot of ids.
    ///
    /// Services removed while the round runs are left out of the result.
    pub async fn check_all_services_health(&self) -> BTreeMap<String, HealthCheckResult> {
        let ids: Vec<String> = self
            .services
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let checks = ids.into_iter().map(|id| async move {
            let result = self.check_service_health(&id).await;
            (id, result)
        });

        join_all(checks)
            .await
            .into_iter()
            .filter_map(|(id, result)| result.ok().map(|r| (id, r)))
            .collect()
    }

    /// Reconcile the registry with the services declared in config.
    ///
    /// New or changed declarations are (re-)registered; unchanged ones keep
    /// their status. Previously declared ids missing from `services` are
    /// removed. Services registered over the API are never touched.
    pub fn sync_declared(&self, services: &[ServiceConfig]) -> SyncReport {
        let mut report = SyncReport::default();
        let mut declared = self.declared.lock();
        let incoming: HashSet<String> = services.iter().map(|s| s.id.clone()).collect();

        let stale: Vec<String> = declared.difference(&incoming).cloned().collect();
        for id in stale {
            if self.services.remove(&id).is_some() {
                tracing::info!(service = %id, "Declared service removed from config");
                report.removed.push(id.clone());
            }
            declared.remove(&id);
        }

        for service in services {
            let unchanged = self
                .services
                .get(&service.id)
                .map(|existing| matches_declaration(&existing, service))
                .unwrap_or(false);
            if !unchanged {
                self.register_service(ServiceRegistration::from(service));
                report.registered.push(service.id.clone());
            }
            declared.insert(service.id.clone());
        }

        report
    }

    /// Apply a probe outcome to the stored descriptor. `NotFound` when the
    /// service was deregistered while the probe ran.
    fn record_outcome(&self, id: &str, outcome: ProbeOutcome) -> Result<HealthCheckResult> {
        let now = Utc::now();
        let threshold = self.config.unhealthy_threshold;
        let Some(mut descriptor) = self.services.get_mut(id) else {
            tracing::debug!(service = %id, "Service removed during health check, result discarded");
            return Err(FabricError::NotFound(format!("service {id}")));
        };

        match outcome {
            Ok(success) => {
                transition(&mut descriptor, ServiceStatus::Running, "probe");
                descriptor.last_error = None;
                descriptor.last_checked = Some(now);
                descriptor.consecutive_failures = 0;
                Ok(HealthCheckResult {
                    status: ServiceStatus::Running,
                    response_time_ms: success.response_time_ms,
                    error: success.note,
                    payload: success.payload,
                })
            }
            Err(failure) => {
                let failures = descriptor.consecutive_failures + 1;
                let error = if threshold > 0 && failures >= threshold {
                    FabricError::ServiceUnavailable {
                        service: id.to_string(),
                        failures,
                        message: failure.error.to_string(),
                    }
                } else {
                    failure.error
                };
                let message = error.to_string();

                transition(&mut descriptor, ServiceStatus::Error, "probe");
                descriptor.consecutive_failures = failures;
                descriptor.last_checked = Some(now);
                descriptor.last_error = Some(ErrorRecord {
                    message: message.clone(),
                    kind: error.kind().to_string(),
                    at: now,
                });
                tracing::warn!(
                    service = %id,
                    error = %message,
                    kind = error.kind(),
                    failures,
                    "Health check failed"
                );

                Ok(HealthCheckResult {
                    payload: failure.payload,
                    ..HealthCheckResult::failed(failure.response_time_ms, message)
                })
            }
        }
    }
}

fn transition(descriptor: &mut ServiceDescriptor, to: ServiceStatus, source: &'static str) {
    let from = descriptor.status;
    if from == to {
        return;
    }
    descriptor.status = to;
    tracing::info!(
        service = %descriptor.id,
        from = %from,
        to = %to,
        source,
        "Service status changed"
    );
    metrics::record_status_transition(from.as_str(), to.as_str());
}

fn kind_label(kind: ServiceKind) -> &'static str {
    match kind {
        ServiceKind::Http => "http",
        ServiceKind::Socket => "socket",
        ServiceKind::Standalone => "standalone",
        ServiceKind::Unknown => "unknown",
    }
}

fn matches_declaration(existing: &ServiceDescriptor, declared: &ServiceConfig) -> bool {
    existing.kind == declared.kind
        && existing.host == declared.host
        && existing.port == declared.port
        && existing.declared_health_check == declared.health_check
        && existing.name == declared.name.clone().unwrap_or_else(|| declared.id.clone())
}

/// Probe target for a service.
///
/// A declared address starting with `/` is a path on the service itself.
fn derive_health_check(
    kind: ServiceKind,
    host: &str,
    port: u16,
    default_path: &str,
    declared: Option<&str>,
) -> Option<String> {
    match (kind, declared) {
        (ServiceKind::Socket, Some(path)) if path.starts_with('/') => {
            Some(format!("ws://{host}:{port}{path}"))
        }
        (_, Some(path)) if path.starts_with('/') => Some(format!("http://{host}:{port}{path}")),
        (_, Some(address)) => Some(address.to_string()),
        (ServiceKind::Http, None) => Some(format!("http://{host}:{port}{default_path}")),
        (ServiceKind::Socket, None) => Some(format!("ws://{host}:{port}")),
        (ServiceKind::Standalone | ServiceKind::Unknown, None) => None,
    }
}

/// Convenience for tests and callers that build registrations by hand.
impl ServiceRegistration {
    pub fn new(id: impl Into<String>, kind: ServiceKind, port: u16) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            host: None,
            port,
            health_check: None,
            status: None,
        }
    }

    pub fn with_health_check(mut self, address: impl Into<String>) -> Self {
        self.health_check = Some(address.into());
        self
    }

    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = Some(status);
        self
    }
}
