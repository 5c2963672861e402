//! Aggregate health snapshot pushed to viewers as `health_status`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::registry::ServiceDescriptor;
use crate::health::state::{HealthCheckResult, ServiceStatus};

/// Per-service entry of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub name: String,
    pub status: ServiceStatus,
    pub response_time: u64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

/// Point-in-time view of every registered service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub services: BTreeMap<String, ServiceHealth>,
    pub timestamp: DateTime<Utc>,
}

impl HealthSnapshot {
    /// Merge probe results with the descriptors they were taken from.
    ///
    /// Services without a result (registered mid-probe) are reported with
    /// their stored status.
    pub fn from_results(
        descriptors: &[ServiceDescriptor],
        results: &BTreeMap<String, HealthCheckResult>,
    ) -> Self {
        let services = descriptors
            .iter()
            .map(|d| {
                let entry = match results.get(&d.id) {
                    Some(r) => ServiceHealth {
                        name: d.name.clone(),
                        status: r.status,
                        response_time: r.response_time_ms,
                        error: r.error.clone(),
                        last_checked: d.last_checked,
                    },
                    None => ServiceHealth {
                        name: d.name.clone(),
                        status: d.status,
                        response_time: 0,
                        error: d.last_error.as_ref().map(|e| e.message.clone()),
                        last_checked: d.last_checked,
                    },
                };
                (d.id.clone(), entry)
            })
            .collect();

        Self {
            services,
            timestamp: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthConfig;
    use crate::health::registry::{ServiceRegistration, ServiceRegistry};
    use crate::health::state::ServiceKind;

    #[test]
    fn missing_results_fall_back_to_descriptor() {
        let registry = ServiceRegistry::new(HealthConfig::default());
        registry.register_service(ServiceRegistration::new("api", ServiceKind::Http, 5000));
        registry.register_service(
            ServiceRegistration::new("trainer", ServiceKind::Standalone, 0)
                .with_status(ServiceStatus::Stopped),
        );

        let mut results = BTreeMap::new();
        results.insert("api".to_string(), HealthCheckResult::failed(15, "HTTP 500"));

        let snapshot = HealthSnapshot::from_results(&registry.list_services(), &results);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.services["api"].status, ServiceStatus::Error);
        assert_eq!(snapshot.services["api"].response_time, 15);
        assert_eq!(snapshot.services["trainer"].status, ServiceStatus::Stopped);

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["services"]["api"]["responseTime"], 15);
        assert_eq!(value["services"]["api"]["error"], "HTTP 500");
    }
}
