//! Domain entities and business logic
//!
//! This module contains the core domain types for banksync:
//! - Account snapshots from the banking provider
//! - Callback subscriptions and the marker-suffix convention
//! - Channel and scheduler state records threaded through the main loop
//! - Domain-specific error types

pub mod account;
pub mod errors;
pub mod state;
pub mod subscription;

// Re-export commonly used types
pub use account::Account;
pub use errors::DomainError;
pub use state::{ChannelState, SchedulerState};
pub use subscription::{Subscription, CALLBACK_MARKER, MUTATION_CATEGORY};
