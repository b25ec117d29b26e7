//! SQLite persistence: account registry, key/value settings, symbol
//! mappings, and the append-only copy audit log.
//!
//! The audit log is write-only from the engine's perspective; correlation
//! is always rebuilt from venue-held tags, never read back from here.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::error::CopyError;
use crate::models::{Account, AccountRole, TradeDirection};
use crate::policy::SymbolMapping;

/// Database handle; cheap to clone, shares the pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Input for registering an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub login: i64,
    pub server: String,
    pub broker: String,
    pub name: String,
    pub role: AccountRole,
    pub balance: Decimal,
}

/// One audit entry, written by the executor after a successful copy.
#[derive(Debug, Clone)]
pub struct CopyAudit {
    pub provider_account: String,
    pub receiver_account: String,
    pub provider_ticket: u64,
    pub receiver_ticket: u64,
    pub symbol: String,
    pub direction: TradeDirection,
    pub volume: Decimal,
    pub outcome: String,
}

/// Stored audit row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CopyAuditRow {
    pub id: i64,
    pub provider_account: String,
    pub receiver_account: String,
    pub provider_ticket: i64,
    pub receiver_ticket: i64,
    pub symbol: String,
    pub direction: String,
    pub volume: f64,
    pub outcome: String,
    pub timestamp: String,
}

/// Stored symbol mapping with its registry id.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredMapping {
    pub id: i64,
    pub provider_symbol: String,
    pub receiver_symbol: String,
    pub broker_name: String,
}

impl StoredMapping {
    pub fn into_mapping(self) -> SymbolMapping {
        SymbolMapping {
            provider_symbol: self.provider_symbol,
            receiver_symbol: self.receiver_symbol,
            broker: self.broker_name,
        }
    }
}

/// Aggregate audit statistics for reporting.
#[derive(Debug, Clone, Default)]
pub struct CopyStats {
    pub total_copied: i64,
    pub total_volume: f64,
    pub last_copied_at: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct AccountRow {
    id: i64,
    login: i64,
    server: String,
    broker: String,
    name: String,
    role: String,
    enabled: bool,
    balance: f64,
}

impl AccountRow {
    fn into_account(self) -> Result<Account, CopyError> {
        let role = AccountRole::parse(&self.role).ok_or_else(|| {
            CopyError::Configuration(format!(
                "account {} has unknown role {:?}",
                self.id, self.role
            ))
        })?;
        Ok(Account {
            id: self.id,
            login: self.login,
            server: self.server,
            broker: self.broker,
            name: self.name,
            role,
            enabled: self.enabled,
            balance: Decimal::try_from(self.balance).unwrap_or(Decimal::ZERO),
        })
    }
}

const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    ("lot_mode", "multiplier"),
    ("lot_multiplier", "1.0"),
    ("fixed_lot", "0.01"),
    ("risk_percent", "1.0"),
    ("min_lot", "0.01"),
    ("max_lot", "100.0"),
    ("copy_buy", "true"),
    ("copy_sell", "true"),
    ("copy_pending", "true"),
    ("opposite_trades", "false"),
    ("close_on_provider_close", "true"),
    ("copy_interval", "500"),
    ("magic_number", "123456"),
    ("symbol_suffix", ""),
    ("symbol_prefix", ""),
    ("allowed_symbols", ""),
    ("blocked_symbols", ""),
];

impl Database {
    /// Open (or create) the database and ensure schema plus default
    /// settings exist.
    pub async fn connect(url: &str) -> Result<Self, CopyError> {
        // SQLite serializes writers anyway; a single connection also keeps
        // `sqlite::memory:` databases coherent in tests.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), CopyError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                login INTEGER NOT NULL,
                server TEXT NOT NULL,
                broker TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL,
                role TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                balance REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS symbol_mappings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider_symbol TEXT NOT NULL,
                receiver_symbol TEXT NOT NULL,
                broker_name TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS copied_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                provider_account TEXT NOT NULL,
                receiver_account TEXT NOT NULL,
                provider_ticket INTEGER NOT NULL,
                receiver_ticket INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                volume REAL NOT NULL,
                outcome TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for (key, value) in DEFAULT_SETTINGS {
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    // --- accounts ---------------------------------------------------------

    pub async fn add_account(&self, account: &NewAccount) -> Result<i64, CopyError> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (login, server, broker, name, role, enabled, balance)
            VALUES (?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(account.login)
        .bind(&account.server)
        .bind(&account.broker)
        .bind(&account.name)
        .bind(account.role.as_str())
        .bind(account.balance.to_f64().unwrap_or(0.0))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn account(&self, id: i64) -> Result<Option<Account>, CopyError> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AccountRow::into_account).transpose()
    }

    pub async fn accounts(&self) -> Result<Vec<Account>, CopyError> {
        let rows = sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(AccountRow::into_account).collect()
    }

    pub async fn enabled_providers(&self) -> Result<Vec<Account>, CopyError> {
        self.enabled_by_role(AccountRole::Provider).await
    }

    pub async fn enabled_receivers(&self) -> Result<Vec<Account>, CopyError> {
        self.enabled_by_role(AccountRole::Receiver).await
    }

    async fn enabled_by_role(&self, role: AccountRole) -> Result<Vec<Account>, CopyError> {
        let rows = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM accounts WHERE role = ? AND enabled = 1 ORDER BY id",
        )
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AccountRow::into_account).collect()
    }

    pub async fn set_account_enabled(&self, id: i64, enabled: bool) -> Result<(), CopyError> {
        sqlx::query("UPDATE accounts SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_balance(&self, id: i64, balance: Decimal) -> Result<(), CopyError> {
        sqlx::query("UPDATE accounts SET balance = ? WHERE id = ?")
            .bind(balance.to_f64().unwrap_or(0.0))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_account(&self, id: i64) -> Result<(), CopyError> {
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- settings ---------------------------------------------------------

    pub async fn settings(&self) -> Result<HashMap<String, String>, CopyError> {
        let rows = sqlx::query_as::<_, (String, String)>("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    pub async fn update_setting(&self, key: &str, value: &str) -> Result<(), CopyError> {
        sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- symbol mappings --------------------------------------------------

    pub async fn add_symbol_mapping(
        &self,
        provider_symbol: &str,
        receiver_symbol: &str,
        broker_name: &str,
    ) -> Result<i64, CopyError> {
        let result = sqlx::query(
            r#"
            INSERT INTO symbol_mappings (provider_symbol, receiver_symbol, broker_name)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(provider_symbol)
        .bind(receiver_symbol)
        .bind(broker_name)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Mappings in table order; insertion order is the lookup tie-break.
    pub async fn symbol_mappings(&self) -> Result<Vec<StoredMapping>, CopyError> {
        let rows = sqlx::query_as::<_, StoredMapping>(
            "SELECT * FROM symbol_mappings ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn delete_symbol_mapping(&self, id: i64) -> Result<(), CopyError> {
        sqlx::query("DELETE FROM symbol_mappings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- copy audit -------------------------------------------------------

    pub async fn log_copied_trade(&self, audit: &CopyAudit) -> Result<(), CopyError> {
        // Tickets are stored as SQLite INTEGERs; a ticket past i64::MAX
        // must fail loudly rather than wrap.
        let provider_ticket = i64::try_from(audit.provider_ticket).map_err(|_| {
            CopyError::Configuration(format!(
                "provider ticket {} does not fit the audit schema",
                audit.provider_ticket
            ))
        })?;
        let receiver_ticket = i64::try_from(audit.receiver_ticket).map_err(|_| {
            CopyError::Configuration(format!(
                "receiver ticket {} does not fit the audit schema",
                audit.receiver_ticket
            ))
        })?;

        sqlx::query(
            r#"
            INSERT INTO copied_trades
                (provider_account, receiver_account, provider_ticket, receiver_ticket,
                 symbol, direction, volume, outcome, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&audit.provider_account)
        .bind(&audit.receiver_account)
        .bind(provider_ticket)
        .bind(receiver_ticket)
        .bind(&audit.symbol)
        .bind(audit.direction.as_str())
        .bind(audit.volume.to_f64().unwrap_or(0.0))
        .bind(&audit.outcome)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_copies(&self, limit: i64) -> Result<Vec<CopyAuditRow>, CopyError> {
        let rows = sqlx::query_as::<_, CopyAuditRow>(
            "SELECT * FROM copied_trades ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn copy_stats(&self) -> Result<CopyStats, CopyError> {
        let (total_copied, total_volume): (i64, Option<f64>) = sqlx::query_as(
            "SELECT COUNT(*), SUM(volume) FROM copied_trades WHERE outcome = 'copied'",
        )
        .fetch_one(&self.pool)
        .await?;

        let last_copied_at: Option<(String,)> = sqlx::query_as(
            "SELECT timestamp FROM copied_trades ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(CopyStats {
            total_copied,
            total_volume: total_volume.unwrap_or(0.0),
            last_copied_at: last_copied_at.map(|(t,)| t),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn db() -> Database {
        Database::connect("sqlite::memory:").await.unwrap()
    }

    fn new_account(role: AccountRole, name: &str) -> NewAccount {
        NewAccount {
            login: 12345,
            server: "Demo-Server".to_string(),
            broker: "BrokerA".to_string(),
            name: name.to_string(),
            role,
            balance: dec!(10000),
        }
    }

    #[tokio::test]
    async fn account_round_trip_and_role_listing() {
        let db = db().await;
        let p = db
            .add_account(&new_account(AccountRole::Provider, "prov"))
            .await
            .unwrap();
        let r = db
            .add_account(&new_account(AccountRole::Receiver, "recv"))
            .await
            .unwrap();

        let fetched = db.account(p).await.unwrap().unwrap();
        assert_eq!(fetched.name, "prov");
        assert_eq!(fetched.role, AccountRole::Provider);
        assert_eq!(fetched.balance, dec!(10000));
        assert!(fetched.enabled);

        assert_eq!(db.enabled_providers().await.unwrap().len(), 1);
        assert_eq!(db.enabled_receivers().await.unwrap().len(), 1);

        db.set_account_enabled(r, false).await.unwrap();
        assert!(db.enabled_receivers().await.unwrap().is_empty());

        db.delete_account(p).await.unwrap();
        assert!(db.account(p).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn default_settings_seeded_and_updatable() {
        let db = db().await;
        let settings = db.settings().await.unwrap();

        assert_eq!(settings.get("lot_mode").map(String::as_str), Some("multiplier"));
        assert_eq!(settings.get("copy_interval").map(String::as_str), Some("500"));

        db.update_setting("lot_mode", "ratio").await.unwrap();
        let settings = db.settings().await.unwrap();
        assert_eq!(settings.get("lot_mode").map(String::as_str), Some("ratio"));
    }

    #[tokio::test]
    async fn symbol_mappings_keep_insertion_order() {
        let db = db().await;
        db.add_symbol_mapping("XAUUSD", "GOLD", "BrokerB").await.unwrap();
        let second = db.add_symbol_mapping("XAUUSD", "XAUUSD.x", "").await.unwrap();

        let mappings = db.symbol_mappings().await.unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].receiver_symbol, "GOLD");
        assert_eq!(mappings[1].receiver_symbol, "XAUUSD.x");

        db.delete_symbol_mapping(second).await.unwrap();
        assert_eq!(db.symbol_mappings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn audit_log_append_and_stats() {
        let db = db().await;
        let audit = CopyAudit {
            provider_account: "prov".to_string(),
            receiver_account: "recv".to_string(),
            provider_ticket: 555,
            receiver_ticket: 100_001,
            symbol: "EURUSD".to_string(),
            direction: TradeDirection::Buy,
            volume: dec!(0.5),
            outcome: "copied".to_string(),
        };
        db.log_copied_trade(&audit).await.unwrap();
        db.log_copied_trade(&audit).await.unwrap();

        let rows = db.recent_copies(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].direction, "BUY");

        let stats = db.copy_stats().await.unwrap();
        assert_eq!(stats.total_copied, 2);
        assert!((stats.total_volume - 1.0).abs() < 1e-9);
        assert!(stats.last_copied_at.is_some());
    }

    #[tokio::test]
    async fn oversized_ticket_is_rejected_not_wrapped() {
        let db = db().await;
        let audit = CopyAudit {
            provider_account: "prov".to_string(),
            receiver_account: "recv".to_string(),
            provider_ticket: u64::MAX,
            receiver_ticket: 100_001,
            symbol: "EURUSD".to_string(),
            direction: TradeDirection::Buy,
            volume: dec!(0.5),
            outcome: "copied".to_string(),
        };

        assert!(db.log_copied_trade(&audit).await.is_err());
        assert!(db.recent_copies(10).await.unwrap().is_empty());
    }
}
