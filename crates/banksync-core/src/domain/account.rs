//! Account domain entity
//!
//! A read-only snapshot of a monetary account at the banking provider.
//! Snapshots are refreshed once per scheduler iteration via
//! [`ILedgerSync::populate`](crate::ports::ledger_sync::ILedgerSync::populate)
//! and never mutated by the control loop.

use serde::{Deserialize, Serialize};

/// A monetary account as reported by the banking provider.
///
/// Callback subscriptions are registered per `user_id`; the remaining
/// fields identify the account for synchronization and logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Provider user that owns the account; callback subscriptions
    /// are attached at this level
    pub user_id: String,
    /// Provider-specific account identifier
    pub account_id: String,
    /// Human-readable account description
    pub display_name: String,
    /// IBAN of the account
    pub iban: String,
}

impl Account {
    /// Creates a new account snapshot.
    pub fn new(
        user_id: impl Into<String>,
        account_id: impl Into<String>,
        display_name: impl Into<String>,
        iban: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            account_id: account_id.into(),
            display_name: display_name.into(),
            iban: iban.into(),
        }
    }
}

impl std::fmt::Display for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name, self.iban)
    }
}
