//! banksync Provider - HTTP adapters for the remote collaborators
//!
//! Provides:
//! - A typed client for the banking provider's REST API
//! - The [`IBankProvider`](banksync_core::ports::IBankProvider) adapter
//!   (account listing, subscription CRUD, paginated payments)
//! - The callback registrar that keeps exactly one marked subscription
//!   per user in sync
//! - The budgeting-service write adapter implementing
//!   [`ILedgerSync`](banksync_core::ports::ILedgerSync)
//!
//! ## Modules
//!
//! - [`client`] - Raw HTTP client and response envelope handling
//! - [`provider`] - Response-to-domain mapping behind the provider port
//! - [`registrar`] - Idempotent callback-subscription synchronization
//! - [`ledger`] - Synchronization passes into the budgeting service

pub mod client;
pub mod ledger;
pub mod provider;
pub mod registrar;

use thiserror::Error;

/// Errors that can occur talking to the remote APIs
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure (connection, TLS, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("API error {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// The response did not have the expected shape
    #[error("Unexpected response shape: {0}")]
    Decode(String),
}
