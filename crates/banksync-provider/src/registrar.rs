//! Callback registrar
//!
//! Synchronizes the desired single marked subscription per provider
//! user against whatever subscriptions currently exist. Subscriptions
//! belonging to other consumers (targets without our marker suffix) are
//! never touched. The provider's replace operation is full-replace, so
//! the registrar rebuilds the complete set and only submits it when
//! something actually changed; repeating a sync with the same desired
//! URL performs zero mutation calls.

use std::sync::Arc;

use tracing::{debug, info};

use banksync_core::domain::{DomainError, Subscription};
use banksync_core::ports::bank_provider::IBankProvider;

/// Keeps the marked callback subscription in sync for a user.
pub struct CallbackRegistrar {
    provider: Arc<dyn IBankProvider>,
}

impl CallbackRegistrar {
    pub fn new(provider: Arc<dyn IBankProvider>) -> Self {
        Self { provider }
    }

    /// Brings the user's subscriptions in line with `desired`.
    ///
    /// With `Some(url)`: an equal subscription is left in place, any
    /// other marker-matching subscription is removed, and the desired
    /// one is added if absent. With `None`: every marker-matching
    /// subscription is removed. Idempotent either way.
    pub async fn sync(
        &self,
        user_id: &str,
        marker: &str,
        desired: Option<&str>,
    ) -> anyhow::Result<()> {
        if let Some(url) = desired {
            if !url.ends_with(marker) {
                return Err(DomainError::BadCallbackUrl {
                    marker: marker.to_string(),
                    url: url.to_string(),
                }
                .into());
            }
        }
        let desired = desired.map(Subscription::mutation);

        let existing = self.provider.list_subscriptions(user_id).await?;
        let mut next = Vec::with_capacity(existing.len() + 1);
        let mut found = false;
        let mut dirty = false;
        for subscription in existing {
            if let Some(want) = &desired {
                if !found && subscription == *want {
                    debug!(subscription = %subscription, "Found callback subscription");
                    found = true;
                    next.push(subscription);
                    continue;
                }
            }
            if subscription.matches_marker(marker) {
                info!(subscription = %subscription, "Removing callback subscription");
                dirty = true;
            } else {
                next.push(subscription);
            }
        }
        if let Some(want) = desired {
            if !found {
                info!(subscription = %want, "Adding callback subscription");
                next.push(want);
                dirty = true;
            }
        }

        if !dirty {
            debug!("Callback subscriptions already as they should be");
            return Ok(());
        }
        self.provider.put_subscriptions(user_id, next).await
    }
}
