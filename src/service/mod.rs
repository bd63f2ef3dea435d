//! Service layer for the pickup-lobby service
//!
//! This module contains the main application state, the task that owns the
//! lobby engine, and health reporting for the running service.

pub mod app;
pub mod health;
pub mod runner;

pub use app::{AppState, ServiceError};
pub use health::{HealthCheck, HealthStatus, ServiceProbe};
pub use runner::{EngineCommand, EngineEventForwarder, EngineHandle, EngineRunner};
