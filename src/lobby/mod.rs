//! Lobby core for the pickup service
//!
//! This module owns queue membership, the formation confirmation protocol,
//! inactivity tracking and everything that turns chat text into commands
//! and lobby state into chat text.

pub mod commands;
pub mod confirmation;
pub mod directory;
pub mod engine;
pub mod inactivity;
pub mod status;

// Re-export commonly used types
pub use commands::Command;
pub use confirmation::{ConfirmationState, FormationOutcome, PendingFormation, RoundDecision};
pub use directory::{Directory, InMemoryDirectory};
pub use engine::{JoinOutcome, LobbyEngine, LobbyEngineStats, RemovalReason};
pub use inactivity::InactivityTracker;
