//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the pickup-lobby service
//! using Prometheus metrics.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the lobby service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Queue and formation metrics
    lobby_metrics: LobbyMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,
}

/// Queue and formation metrics
#[derive(Clone)]
pub struct LobbyMetrics {
    /// Current members per queue
    pub queue_members: IntGaugeVec,

    /// Membership changes by queue and direction
    pub membership_changes_total: IntCounterVec,

    /// Formations started per queue
    pub formations_started_total: IntCounterVec,

    /// Formations resolved per queue and outcome
    pub formations_resolved_total: IntCounterVec,

    /// Confirmation rounds that pinged AFK candidates
    pub confirmation_rounds_total: IntCounter,

    /// Delayed callbacks that fired after being superseded
    pub stale_callbacks_total: IntCounterVec,

    /// Cascade removals by reason
    pub removals_total: IntCounterVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Time spent handling one inbound event or timer
    pub event_handling_duration: HistogramVec,

    /// Time spent publishing outbound messages
    pub publish_duration: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let lobby_metrics = LobbyMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            lobby_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get lobby metrics
    pub fn lobby(&self) -> &LobbyMetrics {
        &self.lobby_metrics
    }

    /// Get performance metrics
    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record a join or leave and the queue's new size
    pub fn record_membership_change(&self, queue: &str, direction: &str, members: usize) {
        self.lobby_metrics
            .membership_changes_total
            .with_label_values(&[queue, direction])
            .inc();
        self.lobby_metrics
            .queue_members
            .with_label_values(&[queue])
            .set(members as i64);
    }

    /// Record a queue filling and entering confirmation
    pub fn record_formation_started(&self, queue: &str) {
        self.lobby_metrics
            .formations_started_total
            .with_label_values(&[queue])
            .inc();
    }

    /// Record a formation ending
    pub fn record_formation_resolved(&self, queue: &str, outcome: &str) {
        self.lobby_metrics
            .formations_resolved_total
            .with_label_values(&[queue, outcome])
            .inc();
    }

    /// Record a reminder round
    pub fn record_confirmation_round(&self) {
        self.lobby_metrics.confirmation_rounds_total.inc();
    }

    /// Record a superseded timer firing
    pub fn record_stale_callback(&self, kind: &str) {
        self.lobby_metrics
            .stale_callbacks_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Record a cascade removal
    pub fn record_removal(&self, reason: &str) {
        self.lobby_metrics
            .removals_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Record event handling duration
    pub fn record_event_handled(&self, kind: &str, duration: Duration) {
        self.performance_metrics
            .event_handling_duration
            .with_label_values(&[kind])
            .observe(duration.as_secs_f64());
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .publish_duration
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        // Metric names are static; registration into a fresh registry cannot collide
        Self::new().expect("metrics registration into a fresh registry")
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("pickup_lobby_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "pickup_lobby_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new(
                "pickup_lobby_amqp_errors_total",
                "AMQP message processing errors",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "pickup_lobby_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
        })
    }
}

impl LobbyMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let queue_members = IntGaugeVec::new(
            Opts::new("pickup_lobby_queue_members", "Current members per queue"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_members.clone()))?;

        let membership_changes_total = IntCounterVec::new(
            Opts::new(
                "pickup_lobby_membership_changes_total",
                "Queue joins and leaves",
            ),
            &["queue", "direction"],
        )?;
        registry.register(Box::new(membership_changes_total.clone()))?;

        let formations_started_total = IntCounterVec::new(
            Opts::new(
                "pickup_lobby_formations_started_total",
                "Queues that filled and entered confirmation",
            ),
            &["queue"],
        )?;
        registry.register(Box::new(formations_started_total.clone()))?;

        let formations_resolved_total = IntCounterVec::new(
            Opts::new(
                "pickup_lobby_formations_resolved_total",
                "Formations that finished, by outcome",
            ),
            &["queue", "outcome"],
        )?;
        registry.register(Box::new(formations_resolved_total.clone()))?;

        let confirmation_rounds_total = IntCounter::new(
            "pickup_lobby_confirmation_rounds_total",
            "Confirmation rounds that pinged AFK candidates",
        )?;
        registry.register(Box::new(confirmation_rounds_total.clone()))?;

        let stale_callbacks_total = IntCounterVec::new(
            Opts::new(
                "pickup_lobby_stale_callbacks_total",
                "Delayed callbacks that fired after being superseded",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(stale_callbacks_total.clone()))?;

        let removals_total = IntCounterVec::new(
            Opts::new(
                "pickup_lobby_removals_total",
                "Participants removed from every queue, by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(removals_total.clone()))?;

        Ok(Self {
            queue_members,
            membership_changes_total,
            formations_started_total,
            formations_resolved_total,
            confirmation_rounds_total,
            stale_callbacks_total,
            removals_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let event_handling_duration = HistogramVec::new(
            HistogramOpts::new(
                "pickup_lobby_event_handling_duration_seconds",
                "Time spent handling one inbound event or timer",
            )
            .buckets(vec![0.00001, 0.0001, 0.001, 0.01, 0.1]),
            &["kind"],
        )?;
        registry.register(Box::new(event_handling_duration.clone()))?;

        let publish_duration = Histogram::with_opts(
            HistogramOpts::new(
                "pickup_lobby_publish_duration_seconds",
                "Time spent publishing outbound messages",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(publish_duration.clone()))?;

        Ok(Self {
            event_handling_duration,
            publish_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    fn encode(collector: &MetricsCollector) -> String {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&collector.registry().gather(), &mut buffer)
            .unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        let _service = collector.service();
        let _lobby = collector.lobby();
        let _performance = collector.performance();
    }

    #[test]
    fn test_formation_metrics() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_membership_change("duel", "join", 2);
        collector.record_formation_started("duel");
        collector.record_confirmation_round();
        collector.record_formation_resolved("duel", "formed");
        collector.record_stale_callback("confirmation");
        collector.record_removal("formed");

        assert_eq!(
            collector
                .lobby()
                .formations_started_total
                .with_label_values(&["duel"])
                .get(),
            1
        );
        assert_eq!(
            collector
                .lobby()
                .queue_members
                .with_label_values(&["duel"])
                .get(),
            2
        );

        let text = encode(&collector);
        assert!(text.contains("pickup_lobby_formations_resolved_total"));
        assert!(text.contains("pickup_lobby_stale_callbacks_total"));
    }

    #[test]
    fn test_metrics_timer() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");
        let timer = collector.start_timer();

        std::thread::sleep(Duration::from_millis(10));
        let duration = timer.elapsed();

        assert!(duration >= Duration::from_millis(10));

        let final_duration = timer.stop();
        assert!(final_duration >= Duration::from_millis(10));
    }
}
