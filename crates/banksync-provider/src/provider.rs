//! Provider port adapter
//!
//! Maps the raw API DTOs onto the domain types behind
//! [`IBankProvider`]: active-account filtering with IBAN extraction,
//! subscription conversion, and the payment pagination walk that
//! assembles a complete-days, oldest-first transaction list.

use anyhow::Context;
use chrono::NaiveDate;
use tracing::{debug, info};

use banksync_core::domain::{Account, Subscription};
use banksync_core::ports::bank_provider::{IBankProvider, TransactionRecord};

use crate::client::{BankClient, NotificationFilterDto, PaymentDto};
use crate::ProviderError;

/// [`IBankProvider`] implementation backed by the REST client.
pub struct BankProviderAdapter {
    client: BankClient,
}

impl BankProviderAdapter {
    pub fn new(client: BankClient) -> Self {
        Self { client }
    }

    fn map_payment(payment: &PaymentDto) -> Result<TransactionRecord, ProviderError> {
        // Booking timestamps look like "2024-01-02 12:34:56.000000";
        // only the date part matters here.
        let date_part = payment.created.get(..10).ok_or_else(|| {
            ProviderError::Decode(format!("malformed payment timestamp: {}", payment.created))
        })?;
        let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            .map_err(|e| ProviderError::Decode(format!("bad payment date {date_part}: {e}")))?;

        Ok(TransactionRecord {
            amount: payment.amount.value.clone(),
            date,
            payee: payment.counterparty_alias.display_name.clone(),
            description: payment.description.trim().to_string(),
            counterparty_iban: payment.counterparty_alias.iban.clone(),
            kind: payment.kind.clone(),
            sub_kind: payment.sub_type.clone(),
        })
    }
}

#[async_trait::async_trait]
impl IBankProvider for BankProviderAdapter {
    async fn list_accounts(&self) -> anyhow::Result<Vec<Account>> {
        let mut accounts = Vec::new();
        for user in self.client.list_users().await? {
            // Inactive users keep their accounts but stop notifying;
            // skip them entirely.
            if matches!(user.status.as_deref(), Some(s) if s != "ACTIVE") {
                continue;
            }
            let user_id = user.id.to_string();
            for account in self.client.list_accounts(&user_id).await? {
                if account.status != "ACTIVE" {
                    continue;
                }
                let Some(iban) = account.iban() else {
                    debug!(account = %account.description, "Account has no IBAN alias, skipping");
                    continue;
                };
                accounts.push(Account::new(
                    user_id.clone(),
                    account.id.to_string(),
                    account.description.clone(),
                    iban,
                ));
            }
        }
        Ok(accounts)
    }

    async fn list_subscriptions(&self, user_id: &str) -> anyhow::Result<Vec<Subscription>> {
        let filters = self.client.list_notification_filters(user_id).await?;
        Ok(filters
            .into_iter()
            .map(|filter| Subscription {
                category: filter.category,
                target: filter.notification_target,
            })
            .collect())
    }

    async fn put_subscriptions(
        &self,
        user_id: &str,
        subscriptions: Vec<Subscription>,
    ) -> anyhow::Result<()> {
        let filters: Vec<NotificationFilterDto> = subscriptions
            .into_iter()
            .map(|subscription| NotificationFilterDto {
                category: subscription.category,
                notification_target: subscription.target,
            })
            .collect();
        self.client
            .put_notification_filters(user_id, &filters)
            .await
            .context("Failed to replace callback subscriptions")
    }

    async fn list_transactions_since(
        &self,
        user_id: &str,
        account_id: &str,
        since: NaiveDate,
    ) -> anyhow::Result<Vec<TransactionRecord>> {
        let (page, mut older_url) = self.client.list_payments(user_id, account_id).await?;
        let mut transactions = page
            .iter()
            .map(Self::map_payment)
            .collect::<Result<Vec<_>, _>>()?;
        if transactions.is_empty() {
            info!("No payments found");
            return Ok(Vec::new());
        }

        // Pages run newest to oldest; keep walking until we are past
        // the requested start date or run out of history.
        let mut oldest = transactions.last().map(|t| t.date);
        while let (Some(url), Some(date)) = (older_url.as_deref(), oldest) {
            if date < since {
                break;
            }
            info!(back_to = %date, "Retrieving older payments");
            let (page, next_older) = self.client.payments_page(url).await?;
            if page.is_empty() {
                break;
            }
            transactions.extend(
                page.iter()
                    .map(Self::map_payment)
                    .collect::<Result<Vec<_>, ProviderError>>()?,
            );
            oldest = transactions.last().map(|t| t.date);
            older_url = next_older;
        }

        // Only complete days, oldest first.
        transactions.retain(|t| t.date >= since);
        transactions.reverse();
        Ok(transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AmountDto, CounterpartyDto};

    fn payment(created: &str, amount: &str) -> PaymentDto {
        PaymentDto {
            amount: AmountDto {
                value: amount.to_string(),
            },
            created: created.to_string(),
            kind: "PAYMENT".to_string(),
            sub_type: "PAYMENT".to_string(),
            description: "  coffee  ".to_string(),
            counterparty_alias: CounterpartyDto {
                iban: Some("NL00BANK0123456789".to_string()),
                display_name: "Cafe".to_string(),
            },
        }
    }

    #[test]
    fn test_map_payment_extracts_date_and_trims_description() {
        let record =
            BankProviderAdapter::map_payment(&payment("2024-01-02 12:34:56.000000", "-2.50"))
                .unwrap();
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(record.description, "coffee");
        assert_eq!(record.amount, "-2.50");
        assert_eq!(record.payee, "Cafe");
    }

    #[test]
    fn test_map_payment_rejects_malformed_timestamp() {
        assert!(BankProviderAdapter::map_payment(&payment("bogus", "-2.50")).is_err());
    }
}
