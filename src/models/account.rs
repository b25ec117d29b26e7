//! Trading account model.
//!
//! Accounts are owned by the registry (the database); the engine only ever
//! reads per-tick snapshots and never mutates them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which side of the copy relationship an account sits on.
///
/// The roles are mutually exclusive: an account is either mirrored from or
/// mirrored onto, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    Provider,
    Receiver,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Provider => "provider",
            AccountRole::Receiver => "receiver",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "provider" => Some(AccountRole::Provider),
            "receiver" => Some(AccountRole::Receiver),
            _ => None,
        }
    }
}

/// A trading account snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Registry-assigned identifier
    pub id: i64,

    /// Venue login number
    pub login: i64,

    /// Venue server name (e.g. "ICMarkets-Demo")
    pub server: String,

    /// Broker name, used by symbol-mapping lookups
    pub broker: String,

    /// Display name for logs and events
    pub name: String,

    pub role: AccountRole,

    /// Disabled accounts are skipped by the driver loop
    pub enabled: bool,

    /// Current balance; only consulted by ratio/risk sizing
    pub balance: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        for role in [AccountRole::Provider, AccountRole::Receiver] {
            assert_eq!(AccountRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(AccountRole::parse("master"), None);
    }
}
