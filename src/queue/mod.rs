//! Queue registry for the lobby service
//!
//! Owns every configured queue and its ordered member list.

pub mod registry;

pub use registry::{Queue, QueueRegistry};
