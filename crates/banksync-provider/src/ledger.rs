//! Budgeting-service write adapter
//!
//! Implements the ledger-write collaborator: one synchronization pass
//! reads recent transactions per account from the banking provider and
//! writes them into the budgeting service in bulk. The budgeting
//! service deduplicates on its side; this adapter is a straight
//! data-mapping wrapper.

use std::sync::Arc;

use anyhow::Context;
use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info};

use banksync_core::domain::Account;
use banksync_core::ports::bank_provider::{IBankProvider, TransactionRecord};
use banksync_core::ports::ledger_sync::ILedgerSync;

use crate::ProviderError;

/// A transaction in the budgeting service's wire format.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LedgerTransaction {
    /// IBAN of the owning account; the service maps it to its own
    /// account identifiers
    pub account_iban: String,
    pub date: NaiveDate,
    /// Amount in milliunits, the service's fixed-point convention
    pub amount: i64,
    pub payee_name: String,
    pub memo: String,
}

impl LedgerTransaction {
    /// Maps a provider transaction to the ledger wire format.
    pub fn from_record(iban: &str, record: &TransactionRecord) -> anyhow::Result<Self> {
        Ok(Self {
            account_iban: iban.to_string(),
            date: record.date,
            amount: amount_milliunits(&record.amount)
                .with_context(|| format!("Unparsable amount: {}", record.amount))?,
            payee_name: record.payee.clone(),
            memo: record.description.clone(),
        })
    }
}

/// Parses a signed decimal amount string into milliunits.
///
/// Done on the string to avoid binary floating point on money:
/// `"-12.50"` becomes `-12500`.
fn amount_milliunits(amount: &str) -> anyhow::Result<i64> {
    let negative = amount.starts_with('-');
    let digits = amount.trim_start_matches('-');
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let mut frac = frac_part.to_string();
    while frac.len() < 3 {
        frac.push('0');
    }
    frac.truncate(3);
    let int_value: i64 = int_part.parse().context("integer part")?;
    let frac_value: i64 = frac.parse().context("fractional part")?;
    let value = int_value * 1000 + frac_value;
    Ok(if negative { -value } else { value })
}

/// HTTP client for the budgeting service's write API.
pub struct LedgerClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    budget_id: String,
}

impl LedgerClient {
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        budget_id: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            budget_id: budget_id.into(),
        }
    }

    /// Bulk-writes transactions into the budget.
    pub async fn create_transactions(
        &self,
        transactions: &[LedgerTransaction],
    ) -> Result<(), ProviderError> {
        let url = format!("{}/budgets/{}/transactions", self.base_url, self.budget_id);
        debug!(url = %url, count = transactions.len(), "POST");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "transactions": transactions }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// The ledger-write collaborator: provider reads plus budgeting-service
/// writes behind [`ILedgerSync`].
pub struct LedgerSync {
    provider: Arc<dyn IBankProvider>,
    ledger: LedgerClient,
    accounts: Vec<Account>,
    lookback_days: u32,
}

impl LedgerSync {
    pub fn new(provider: Arc<dyn IBankProvider>, ledger: LedgerClient, lookback_days: u32) -> Self {
        Self {
            provider,
            ledger,
            accounts: Vec::new(),
            lookback_days,
        }
    }
}

#[async_trait::async_trait]
impl ILedgerSync for LedgerSync {
    async fn populate(&mut self) -> anyhow::Result<()> {
        self.accounts = self
            .provider
            .list_accounts()
            .await
            .context("Failed to list provider accounts")?;
        info!(count = self.accounts.len(), "Refreshed account snapshot");
        Ok(())
    }

    fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    async fn synchronize(&mut self) -> anyhow::Result<()> {
        let since = Utc::now().date_naive() - Days::new(u64::from(self.lookback_days));
        for account in &self.accounts {
            let records = self
                .provider
                .list_transactions_since(&account.user_id, &account.account_id, since)
                .await
                .with_context(|| format!("Failed to read transactions for {account}"))?;
            if records.is_empty() {
                info!(account = %account, "No transactions to write");
                continue;
            }
            let transactions = records
                .iter()
                .map(|record| LedgerTransaction::from_record(&account.iban, record))
                .collect::<anyhow::Result<Vec<_>>>()?;
            self.ledger
                .create_transactions(&transactions)
                .await
                .with_context(|| format!("Failed to write transactions for {account}"))?;
            info!(account = %account, count = transactions.len(), "Wrote transactions");
        }
        Ok(())
    }
}
