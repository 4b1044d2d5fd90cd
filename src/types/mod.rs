//! Core types for the event core.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Client identifiers and delivery tokens
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Dispatch and observability configuration

mod config;
mod errors;
mod ids;

pub use config::{Config, DispatchConfig, ObservabilityConfig};
pub use errors::{Error, Result};
pub use ids::{ClientId, DeliveryToken};
