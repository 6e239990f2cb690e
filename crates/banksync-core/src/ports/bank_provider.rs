//! Banking-provider port (driven/secondary port)
//!
//! Interface to the banking provider's REST API: account listing,
//! callback-subscription CRUD, and paginated payment retrieval. The
//! primary implementation lives in `banksync-provider`; tests use
//! in-memory fakes.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are
//!   adapter-specific and don't need domain-level classification.
//! - `put_subscriptions` is a full-replace operation: the provider
//!   keeps exactly the submitted set afterwards. The registrar relies
//!   on this to implement replace-in-place semantics.
//! - `TransactionRecord` is a port-level DTO, not a domain entity;
//!   the ledger adapter maps it to whatever the budgeting service wants.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{Account, Subscription};

/// A single booked transaction from the banking provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Signed decimal amount as reported by the provider (e.g. "-12.50")
    pub amount: String,
    /// Booking date
    pub date: NaiveDate,
    /// Counterparty display name
    pub payee: String,
    /// Free-form transaction description, trimmed
    pub description: String,
    /// Counterparty IBAN, when known
    pub counterparty_iban: Option<String>,
    /// Provider transaction type (e.g. "PAYMENT")
    pub kind: String,
    /// Provider transaction sub-type
    pub sub_kind: String,
}

/// Port trait for banking-provider API operations
#[async_trait::async_trait]
pub trait IBankProvider: Send + Sync {
    /// Lists all active accounts across the provider users the API key
    /// grants access to.
    async fn list_accounts(&self) -> anyhow::Result<Vec<Account>>;

    /// Lists the callback subscriptions currently registered for a user.
    async fn list_subscriptions(&self, user_id: &str) -> anyhow::Result<Vec<Subscription>>;

    /// Replaces the full set of callback subscriptions for a user.
    async fn put_subscriptions(
        &self,
        user_id: &str,
        subscriptions: Vec<Subscription>,
    ) -> anyhow::Result<()>;

    /// Lists transactions for an account going back to `since`,
    /// oldest first. Pagination against the provider is handled
    /// internally; only complete days are returned.
    async fn list_transactions_since(
        &self,
        user_id: &str,
        account_id: &str,
        since: NaiveDate,
    ) -> anyhow::Result<Vec<TransactionRecord>>;
}
