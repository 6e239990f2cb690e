//! Domain error types
//!
//! Validation failures on domain values. Network and provider errors
//! live with their adapters (`banksync-net`, `banksync-provider`).

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A callback URL that does not end with the required marker suffix
    #[error("Callback URL does not end with marker '{marker}': {url}")]
    BadCallbackUrl {
        /// The required marker suffix
        marker: String,
        /// The offending URL
        url: String,
    },
}
