//! Banking-provider HTTP client
//!
//! Thin typed wrapper over the provider's REST API. The provider wraps
//! every response object in a single-key envelope naming its type
//! (`{"UserPerson": {...}}`), and paginates list endpoints through an
//! `older_url` link; both quirks are handled here so the adapter above
//! only sees flat DTOs.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::ProviderError;

/// Page size requested from list endpoints.
const PAGE_SIZE: u32 = 200;

/// One page of API results.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    /// Wrapped response objects
    #[serde(rename = "Response", default)]
    pub response: Vec<serde_json::Value>,
    /// Pagination links, present on list endpoints
    #[serde(rename = "Pagination", default)]
    pub pagination: Option<Pagination>,
}

/// Pagination links attached to a list response.
#[derive(Debug, Deserialize)]
pub struct Pagination {
    /// Path of the next-older page, `None` on the last page
    pub older_url: Option<String>,
}

/// A provider user, as far as banksync cares.
#[derive(Debug, Clone, Deserialize)]
pub struct UserDto {
    pub id: u64,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// A monetary account.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountDto {
    pub id: u64,
    pub description: String,
    pub status: String,
    #[serde(default)]
    pub alias: Vec<AliasDto>,
}

/// An account alias (IBAN, email, phone, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct AliasDto {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl AccountDto {
    /// The account's IBAN alias, when present.
    pub fn iban(&self) -> Option<&str> {
        self.alias
            .iter()
            .find(|alias| alias.kind == "IBAN")
            .map(|alias| alias.value.as_str())
    }
}

/// A registered callback subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationFilterDto {
    pub category: String,
    pub notification_target: String,
}

/// A booked payment.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentDto {
    pub amount: AmountDto,
    /// Booking timestamp, `YYYY-MM-DD hh:mm:ss.ffffff`
    pub created: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sub_type: String,
    pub description: String,
    pub counterparty_alias: CounterpartyDto,
}

/// A monetary amount.
#[derive(Debug, Clone, Deserialize)]
pub struct AmountDto {
    /// Signed decimal string, e.g. `"-12.50"`
    pub value: String,
}

/// The other side of a payment.
#[derive(Debug, Clone, Deserialize)]
pub struct CounterpartyDto {
    #[serde(default)]
    pub iban: Option<String>,
    #[serde(default)]
    pub display_name: String,
}

/// HTTP client for the banking provider's REST API.
pub struct BankClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl BankClient {
    /// Creates a client against the given API base URL. Tests point
    /// this at a mock server.
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn decode(response: reqwest::Response) -> Result<Envelope, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json::<Envelope>().await?)
    }

    /// GET a provider path and decode the envelope.
    pub async fn get(&self, path: &str) -> Result<Envelope, ProviderError> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// POST a JSON body to a provider path.
    pub async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<(), ProviderError> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await?;
        Self::decode(response).await.map(|_| ())
    }

    /// Unwraps the single-key type envelope around a response object.
    fn first_value(entry: &serde_json::Value) -> Result<&serde_json::Value, ProviderError> {
        entry
            .as_object()
            .and_then(|object| object.values().next())
            .ok_or_else(|| {
                ProviderError::Decode("expected a single-key wrapped object".to_string())
            })
    }

    fn unwrap_all<T: DeserializeOwned>(envelope: &Envelope) -> Result<Vec<T>, ProviderError> {
        envelope
            .response
            .iter()
            .map(|entry| {
                let inner = Self::first_value(entry)?;
                serde_json::from_value(inner.clone())
                    .map_err(|e| ProviderError::Decode(e.to_string()))
            })
            .collect()
    }

    /// Lists the users this API key grants access to.
    pub async fn list_users(&self) -> Result<Vec<UserDto>, ProviderError> {
        let envelope = self.get("v1/user").await?;
        Self::unwrap_all(&envelope)
    }

    /// Lists the monetary accounts of a user.
    pub async fn list_accounts(&self, user_id: &str) -> Result<Vec<AccountDto>, ProviderError> {
        let envelope = self
            .get(&format!("v1/user/{user_id}/monetary-account"))
            .await?;
        Self::unwrap_all(&envelope)
    }

    /// Lists the callback subscriptions of a user.
    pub async fn list_notification_filters(
        &self,
        user_id: &str,
    ) -> Result<Vec<NotificationFilterDto>, ProviderError> {
        let envelope = self
            .get(&format!("v1/user/{user_id}/notification-filter-url"))
            .await?;
        Self::unwrap_all(&envelope)
    }

    /// Replaces the full set of callback subscriptions of a user.
    pub async fn put_notification_filters(
        &self,
        user_id: &str,
        filters: &[NotificationFilterDto],
    ) -> Result<(), ProviderError> {
        let body = serde_json::json!({ "notification_filters": filters });
        self.post(&format!("v1/user/{user_id}/notification-filter-url"), &body)
            .await
    }

    /// Fetches the newest page of payments for an account. Returns the
    /// payments plus the path of the next-older page, if any.
    pub async fn list_payments(
        &self,
        user_id: &str,
        account_id: &str,
    ) -> Result<(Vec<PaymentDto>, Option<String>), ProviderError> {
        let path =
            format!("v1/user/{user_id}/monetary-account/{account_id}/payment?count={PAGE_SIZE}");
        self.payments_page(&path).await
    }

    /// Fetches an arbitrary payments page by its path (used to follow
    /// `older_url` links).
    pub async fn payments_page(
        &self,
        path: &str,
    ) -> Result<(Vec<PaymentDto>, Option<String>), ProviderError> {
        let envelope = self.get(path).await?;
        let payments = Self::unwrap_all(&envelope)?;
        let older_url = envelope.pagination.and_then(|p| p.older_url);
        Ok((payments, older_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_value_unwraps_type_envelope() {
        let entry = serde_json::json!({"UserPerson": {"id": 7}});
        let inner = BankClient::first_value(&entry).unwrap();
        assert_eq!(inner["id"], 7);
    }

    #[test]
    fn test_first_value_rejects_non_object() {
        let entry = serde_json::json!([1, 2, 3]);
        assert!(BankClient::first_value(&entry).is_err());
    }

    #[test]
    fn test_account_iban_alias() {
        let account: AccountDto = serde_json::from_value(serde_json::json!({
            "id": 1,
            "description": "Checking",
            "status": "ACTIVE",
            "alias": [
                {"type": "EMAIL", "value": "a@b.c"},
                {"type": "IBAN", "value": "NL00BANK0123456789"}
            ]
        }))
        .unwrap();
        assert_eq!(account.iban(), Some("NL00BANK0123456789"));
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = BankClient::new("https://api.example.com/", "token");
        assert_eq!(client.url("v1/user"), "https://api.example.com/v1/user");
        assert_eq!(client.url("/v1/user"), "https://api.example.com/v1/user");
    }
}
