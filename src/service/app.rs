//! Main application state and service coordination
//!
//! This module contains the production AppState that coordinates all
//! service components, AMQP connections, and background tasks.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::ChatEventConsumer;
use crate::amqp::publisher::{
    AmqpLobbyPublisher, LobbyPublisher, LoggingPublisher, PublisherConfig,
};
use crate::config::AppConfig;
use crate::lobby::{InMemoryDirectory, LobbyEngine, LobbyEngineStats};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::service::health::{HealthCheck, ServiceProbe};
use crate::service::runner::{EngineEventForwarder, EngineHandle, EngineRunner};
use amqprs::channel::QueueDeclareArguments;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Broker connection; `None` when running offline
    amqp_connection: Option<Arc<AmqpConnection>>,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    /// Handle into the engine task
    engine: EngineHandle,

    /// Engine runner, until `start` spawns it
    runner: Option<EngineRunner>,

    /// Engine task, once started
    engine_task: Option<JoinHandle<LobbyEngineStats>>,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// AMQP consumer for chat events
    event_consumer: Option<ChatEventConsumer>,

    /// Service status
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application, connecting to the configured broker
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing pickup-lobby service");
        info!(
            "Configuration: service={}, amqp_url={}",
            config.service.name, config.amqp.url
        );

        let amqp_connection = Self::initialize_amqp(&config).await?;
        let channel = amqp_connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to open AMQP channel: {}", e),
            })?;

        let publisher_config = PublisherConfig {
            exchange: config.amqp.outbound_exchange.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
            ..PublisherConfig::default()
        };
        let publisher = AmqpLobbyPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize lobby publisher: {}", e),
            })?;

        Self::assemble(config, Arc::new(publisher), Some(amqp_connection))
    }

    /// Initialize without a broker. Outbound messages are only logged.
    pub fn offline(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing pickup-lobby service without a broker");
        Self::assemble(config, Arc::new(LoggingPublisher), None)
    }

    /// Initialize with a caller-supplied publisher and no broker
    pub fn with_publisher(
        config: AppConfig,
        publisher: Arc<dyn LobbyPublisher>,
    ) -> Result<Self, ServiceError> {
        Self::assemble(config, publisher, None)
    }

    fn assemble(
        config: AppConfig,
        publisher: Arc<dyn LobbyPublisher>,
        amqp_connection: Option<Arc<AmqpConnection>>,
    ) -> Result<Self, ServiceError> {
        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let directory = Arc::new(InMemoryDirectory::new());
        let engine =
            LobbyEngine::with_metrics(config.lobby.clone(), directory.clone(), collector.clone());
        let (runner, engine_handle) =
            EngineRunner::new(engine, directory, publisher, collector.clone());

        let is_running = Arc::new(RwLock::new(false));
        let probe = ServiceProbe::new(
            config.service.name.clone(),
            is_running.clone(),
            engine_handle.clone(),
            amqp_connection.clone(),
        );
        let metrics_service = Self::initialize_metrics(&config, collector, probe);

        Ok(Self {
            config,
            amqp_connection,
            metrics_service,
            engine: engine_handle,
            runner: Some(runner),
            engine_task: None,
            background_tasks: Vec::new(),
            event_consumer: None,
            is_running,
        })
    }

    /// Start the engine task, HTTP endpoints, consumption and background tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting pickup-lobby service");

        let runner = self.runner.take().ok_or_else(|| ServiceError::Initialization {
            message: "Service already started".to_string(),
        })?;
        self.engine_task = Some(runner.spawn());

        *self.is_running.write().await = true;

        self.start_metrics_service().await?;

        if self.amqp_connection.is_some() {
            self.start_amqp_consumption().await?;
        } else {
            info!("No broker configured, skipping AMQP consumption");
        }

        self.start_background_tasks();

        info!("✅ Pickup-lobby service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<LobbyEngineStats, ServiceError> {
        info!("Starting graceful shutdown of pickup-lobby service");

        *self.is_running.write().await = false;

        if let Some(consumer) = self.event_consumer.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP message consumption stopped");
            }
        }

        self.engine.shutdown().await;
        let stats = match self.engine_task.take() {
            Some(task) => match tokio::time::timeout(self.config.shutdown_timeout(), task).await
            {
                Ok(Ok(stats)) => stats,
                Ok(Err(e)) => {
                    return Err(ServiceError::BackgroundTask {
                        message: format!("Lobby engine task failed: {}", e),
                    })
                }
                Err(_) => {
                    return Err(ServiceError::BackgroundTask {
                        message: "Lobby engine task did not stop in time".to_string(),
                    })
                }
            },
            None => LobbyEngineStats::default(),
        };

        self.stop_background_tasks().await;

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        if let Some(connection) = &self.amqp_connection {
            if let Err(e) = connection.close().await {
                warn!("Failed to close AMQP connection: {}", e);
            } else {
                debug!("AMQP connection closed");
            }
        }

        info!("Final engine statistics: {:?}", stats);
        info!("✅ Pickup-lobby service shutdown completed");

        Ok(stats)
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Handle for injecting events into the engine task
    pub fn engine(&self) -> EngineHandle {
        self.engine.clone()
    }

    /// Cloneable view for health checks
    pub fn probe(&self) -> ServiceProbe {
        ServiceProbe::new(
            self.config.service.name.clone(),
            self.is_running.clone(),
            self.engine.clone(),
            self.amqp_connection.clone(),
        )
    }

    /// Get metrics service
    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    fn initialize_metrics(
        config: &AppConfig,
        collector: Arc<MetricsCollector>,
        probe: ServiceProbe,
    ) -> Arc<MetricsService> {
        info!(
            "Initializing metrics service on port {}",
            config.service.health_port
        );

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };

        let health_server =
            Arc::new(HealthServer::new(health_config, collector.clone()).with_probe(probe));
        Arc::new(MetricsService::new(collector, health_server))
    }

    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        info!("Starting metrics and health endpoints");

        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });
        self.background_tasks.push(metrics_handle);

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config = AmqpConfig::from_settings(&config.amqp);
        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            return Ok(());
        };
        let queue = self.config.amqp.inbound_queue.clone();

        let channel = connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let queue_declare_args = QueueDeclareArguments::new(&queue)
            .durable(true)
            .auto_delete(false)
            .finish();
        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue, e),
            })?;
        info!("Queue '{}' declared successfully", queue);

        let forwarder = Arc::new(EngineEventForwarder::new(
            self.engine.clone(),
            self.metrics_service.collector(),
        ));
        let consumer = ChatEventConsumer::new(forwarder, channel);
        consumer
            .start_consuming(&queue)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming messages: {}", e),
            })?;

        self.event_consumer = Some(consumer);
        info!("Listening for chat events on '{}'", queue);
        Ok(())
    }

    fn start_background_tasks(&mut self) {
        let probe = self.probe();
        let collector = self.metrics_service.collector();

        let health_metrics_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            let start_time = tokio::time::Instant::now();
            info!("Health metrics task started");

            while probe.is_running().await {
                interval.tick().await;

                collector
                    .service()
                    .uptime_seconds
                    .set(start_time.elapsed().as_secs() as i64);

                match HealthCheck::check(&probe).await {
                    Ok(health) => {
                        collector.update_health_status(health.status.as_gauge());
                        debug!(
                            "Health check: {} - {} queued, pending: {:?}",
                            health.status, health.stats.queued_entries, health.stats.pending_queue
                        );
                    }
                    Err(e) => warn!("Health check failed: {}", e),
                }
            }

            info!("Health metrics task stopped");
        });

        self.background_tasks.push(health_metrics_task);
        info!("Background health task started");
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for task in self.background_tasks.drain(..) {
            task.abort();
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockLobbyPublisher;
    use crate::types::{ActivityEvent, ChatEvent, Outbound};

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        // unlikely to collide with anything else bound during tests
        config.service.health_port = 38_917;
        config
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = config();
        config.lobby.default_queue = "missing".to_string();

        assert!(matches!(
            AppState::offline(config),
            Err(ServiceError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_offline_lifecycle() {
        let publisher = Arc::new(MockLobbyPublisher::new());
        let mut app = AppState::with_publisher(config(), publisher.clone()).unwrap();
        assert!(!app.is_running().await);

        app.start().await.unwrap();
        assert!(app.is_running().await);
        assert!(app.probe().engine_alive());

        app.engine()
            .send_event(ChatEvent::Activity(ActivityEvent {
                participant: "7".to_string(),
                display_name: Some("seven".to_string()),
                text: "++".to_string(),
                channel_id: None,
                message_id: None,
                timestamp: crate::utils::current_timestamp(),
            }))
            .await
            .unwrap();

        let stats = app.shutdown().await.unwrap();
        assert_eq!(stats.events_processed, 1);
        assert!(!app.is_running().await);
        assert!(publisher
            .published()
            .contains(&Outbound::Broadcast {
                lines: vec!["ctf [1/8] - duel [0/2] - ffa [0/6]".to_string()]
            }));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut config = config();
        config.service.health_port = 38_918;
        let mut app = AppState::offline(config).unwrap();

        app.start().await.unwrap();
        assert!(matches!(
            app.start().await,
            Err(ServiceError::Initialization { .. })
        ));
        app.shutdown().await.unwrap();
    }
}
