//! # Kafka Events - Event Dispatch Core for a Kafka Client Binding
//!
//! Bridges the native client's event queue into typed application events:
//! - Polling/translation loop over native event handles
//! - Delivery-report routing back to the producing caller
//! - Exactly-once, pipelined release of native handles
//! - Cooperative cancellation of a blocking dispatch loop
//!
//! ## Architecture
//!
//! ```text
//!   produce ──register──▶ DeliveryRegistry ◀──lookup──┐
//!                                                     │
//!   NativeEventSource ──poll──▶ Dispatcher ──translate┘
//!                                   │
//!          ┌────────────────────────┼─────────────────────┐
//!          ▼                        ▼                     ▼
//!   completion channel      shared EventStream      direct return
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod dispatch;
pub mod events;
pub mod handle;
pub mod native;
pub mod oauth;
pub mod registry;
pub mod types;

// Internal utilities
pub mod observability;

pub use dispatch::{DispatchState, Dispatcher, PollOutcome};
pub use events::{Event, EventStream};
pub use handle::Handle;
pub use types::{Config, DeliveryToken, DispatchConfig, Error, Result};
