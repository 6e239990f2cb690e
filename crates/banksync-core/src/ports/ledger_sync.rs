//! Ledger-write port (driven/secondary port)
//!
//! The collaborator that performs one full synchronization pass:
//! read recent transactions from the banking provider, map them, and
//! write them into the budgeting service. The scheduler core only
//! cares about its success/failure outcome and the account snapshot
//! it maintains.

use crate::domain::Account;

/// Port trait for the ledger-write collaborator
#[async_trait::async_trait]
pub trait ILedgerSync: Send {
    /// Refreshes the cached account snapshot from the remote
    /// collaborators. Called once per outer scheduler iteration.
    async fn populate(&mut self) -> anyhow::Result<()>;

    /// The account snapshot from the last successful [`populate`].
    ///
    /// [`populate`]: ILedgerSync::populate
    fn accounts(&self) -> &[Account];

    /// Runs one synchronization pass. Opaque to the scheduler beyond
    /// its outcome; partial failures inside the pass are the
    /// implementation's own business.
    async fn synchronize(&mut self) -> anyhow::Result<()>;
}
