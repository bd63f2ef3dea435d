//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the pickup-lobby
//! service, including readiness and liveness probes.

use crate::amqp::connection::AmqpConnection;
use crate::service::runner::EngineHandle;
use crate::types::LobbySnapshot;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported to Prometheus
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Cloneable view of the running service, shared with the HTTP server and
/// the periodic health task
#[derive(Clone)]
pub struct ServiceProbe {
    service_name: String,
    is_running: Arc<RwLock<bool>>,
    engine: EngineHandle,
    amqp: Option<Arc<AmqpConnection>>,
}

impl ServiceProbe {
    pub fn new(
        service_name: impl Into<String>,
        is_running: Arc<RwLock<bool>>,
        engine: EngineHandle,
        amqp: Option<Arc<AmqpConnection>>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            is_running,
            engine,
            amqp,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn engine_alive(&self) -> bool {
        self.engine.is_alive()
    }

    /// `None` when running without a broker
    pub fn amqp_alive(&self) -> Option<bool> {
        self.amqp.as_ref().map(|connection| connection.is_alive())
    }

    /// Latest snapshot published by the engine task
    pub fn snapshot(&self) -> LobbySnapshot {
        self.engine.snapshot()
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Participants queued across every queue (counted once per queue)
    pub queued_entries: usize,
    /// Queue whose formation is awaiting confirmation
    pub pending_queue: Option<String>,
    pub formations_started: u64,
    pub formations_completed: u64,
    pub formations_aborted: u64,
}

impl ServiceStats {
    fn from_snapshot(snapshot: &LobbySnapshot) -> Self {
        Self {
            queued_entries: snapshot.queues.iter().map(|q| q.members.len()).sum(),
            pending_queue: snapshot.pending.as_ref().map(|p| p.queue.clone()),
            formations_started: snapshot.formations_started,
            formations_completed: snapshot.formations_completed,
            formations_aborted: snapshot.formations_aborted,
        }
    }
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(probe: &ServiceProbe) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(probe).await,
            Self::check_engine(probe),
            Self::check_amqp_health(probe),
        ];

        let status = if checks.iter().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if checks.iter().any(|c| c.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Ok(HealthCheck {
            status,
            service: probe.service_name().to_string(),
            version: crate::VERSION.to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats: ServiceStats::from_snapshot(&probe.snapshot()),
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        if probe.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify events can reach the engine
    pub async fn readiness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        if !probe.is_running().await || !probe.engine_alive() {
            return Ok(HealthStatus::Unhealthy);
        }

        Ok(Self::check_amqp_health(probe).status)
    }

    async fn check_service_running(probe: &ServiceProbe) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if probe.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_engine(probe: &ServiceProbe) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if probe.engine_alive() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Lobby engine task has stopped".to_string()),
            )
        };

        ComponentCheck {
            name: "lobby_engine".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp_health(probe: &ServiceProbe) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match probe.amqp_alive() {
            Some(true) => (HealthStatus::Healthy, None),
            Some(false) => (
                HealthStatus::Degraded,
                Some("AMQP connection is closed".to_string()),
            ),
            None => (
                HealthStatus::Healthy,
                Some("Running without a broker".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
