//! Callback subscription entity
//!
//! A subscription is a callback registration at the banking provider:
//! a notification category plus a target URL the provider connects to
//! when something in that category changes. banksync identifies its own
//! subscriptions among any others on the account by a fixed marker
//! suffix on the target URL.

use serde::{Deserialize, Serialize};

/// Fixed suffix on every callback URL registered by banksync.
///
/// Distinguishes our subscriptions from any other callback consumer on
/// the same account; the registrar only ever touches subscriptions
/// whose target ends with this marker.
pub const CALLBACK_MARKER: &str = "banksync-autosync";

/// Notification category subscribed to: account mutations (payments).
pub const MUTATION_CATEGORY: &str = "MUTATION";

/// A callback registration record at the banking provider.
///
/// Equality is by `(category, target)`; the registrar relies on this to
/// decide whether an existing subscription can be left in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Notification category (e.g. `MUTATION`)
    pub category: String,
    /// URL the provider connects to when a notification fires
    pub target: String,
}

impl Subscription {
    /// Creates a `MUTATION`-category subscription for the given target URL.
    pub fn mutation(target: impl Into<String>) -> Self {
        Self {
            category: MUTATION_CATEGORY.to_string(),
            target: target.into(),
        }
    }

    /// Returns true if this subscription belongs to banksync, i.e. its
    /// target ends with the given marker suffix.
    pub fn matches_marker(&self, marker: &str) -> bool {
        self.target.ends_with(marker)
    }
}

impl std::fmt::Display for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.category, self.target)
    }
}
