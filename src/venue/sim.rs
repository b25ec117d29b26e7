//! In-memory simulated venue.
//!
//! Stands in for real broker connectivity: assigns tickets from a counter,
//! keeps per-account position and order books, and fills market orders at
//! a nominal price. Used by the `run` command and by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::VenueError;
use crate::models::{Account, OrderSpec, ReceiverTrade};

use super::VenueClient;

#[derive(Default)]
struct AccountBook {
    positions: HashMap<u64, ReceiverTrade>,
    orders: HashMap<u64, ReceiverTrade>,
}

/// Simulated venue client.
pub struct SimVenue {
    books: Mutex<HashMap<i64, AccountBook>>,
    next_ticket: AtomicU64,
}

impl SimVenue {
    pub fn new() -> Self {
        Self {
            books: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(100_000),
        }
    }

    fn assign_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    /// Seed a trade directly into an account's book, bypassing order entry.
    /// Lets tests and demos stage provider-side state.
    pub async fn seed(&self, account_id: i64, trade: ReceiverTrade) {
        let mut books = self.books.lock().await;
        let book = books.entry(account_id).or_default();
        if trade.is_position() {
            book.positions.insert(trade.ticket, trade);
        } else {
            book.orders.insert(trade.ticket, trade);
        }
    }

    /// Remove a trade from an account's book, as if it closed at the venue.
    pub async fn remove(&self, account_id: i64, ticket: u64) {
        let mut books = self.books.lock().await;
        if let Some(book) = books.get_mut(&account_id) {
            book.positions.remove(&ticket);
            book.orders.remove(&ticket);
        }
    }
}

impl Default for SimVenue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueClient for SimVenue {
    async fn open_positions(&self, account: &Account) -> Result<Vec<ReceiverTrade>, VenueError> {
        let books = self.books.lock().await;
        Ok(books
            .get(&account.id)
            .map(|b| b.positions.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn working_orders(&self, account: &Account) -> Result<Vec<ReceiverTrade>, VenueError> {
        let books = self.books.lock().await;
        Ok(books
            .get(&account.id)
            .map(|b| b.orders.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn place_market_order(
        &self,
        account: &Account,
        spec: &OrderSpec,
    ) -> Result<u64, VenueError> {
        if spec.volume <= Decimal::ZERO {
            return Err(VenueError::Rejected(format!(
                "invalid volume {}",
                spec.volume
            )));
        }

        let ticket = self.assign_ticket();
        let mut books = self.books.lock().await;
        let book = books.entry(account.id).or_default();
        book.positions.insert(
            ticket,
            ReceiverTrade {
                ticket,
                direction: spec.direction,
                symbol: spec.symbol.clone(),
                volume: spec.volume,
                sl: spec.sl,
                tp: spec.tp,
                price_open: None,
                // Nominal fill; the sim has no market data
                price_current: Some(spec.price.unwrap_or(dec!(1.0))),
                comment: spec.comment.clone(),
            },
        );

        info!(
            account = %account.name,
            ticket,
            symbol = %spec.symbol,
            direction = spec.direction.as_str(),
            volume = %spec.volume,
            "sim venue filled market order"
        );
        Ok(ticket)
    }

    async fn place_pending_order(
        &self,
        account: &Account,
        spec: &OrderSpec,
    ) -> Result<u64, VenueError> {
        if spec.volume <= Decimal::ZERO {
            return Err(VenueError::Rejected(format!(
                "invalid volume {}",
                spec.volume
            )));
        }
        let Some(price) = spec.price else {
            return Err(VenueError::Rejected(
                "pending order without a trigger price".to_string(),
            ));
        };

        let ticket = self.assign_ticket();
        let mut books = self.books.lock().await;
        let book = books.entry(account.id).or_default();
        book.orders.insert(
            ticket,
            ReceiverTrade {
                ticket,
                direction: spec.direction,
                symbol: spec.symbol.clone(),
                volume: spec.volume,
                sl: spec.sl,
                tp: spec.tp,
                price_open: Some(price),
                price_current: None,
                comment: spec.comment.clone(),
            },
        );

        info!(
            account = %account.name,
            ticket,
            symbol = %spec.symbol,
            direction = spec.direction.as_str(),
            price = %price,
            "sim venue accepted pending order"
        );
        Ok(ticket)
    }

    async fn modify_stops(
        &self,
        account: &Account,
        ticket: u64,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
    ) -> Result<(), VenueError> {
        let mut books = self.books.lock().await;
        let book = books
            .get_mut(&account.id)
            .ok_or_else(|| VenueError::Connectivity(format!("no session for account {}", account.id)))?;

        let trade = book
            .positions
            .get_mut(&ticket)
            .or_else(|| book.orders.get_mut(&ticket))
            .ok_or_else(|| VenueError::Rejected(format!("unknown ticket {ticket}")))?;

        trade.sl = sl;
        trade.tp = tp;
        Ok(())
    }

    async fn close_position(&self, account: &Account, ticket: u64) -> Result<(), VenueError> {
        let mut books = self.books.lock().await;
        let removed = books
            .get_mut(&account.id)
            .and_then(|b| b.positions.remove(&ticket));
        if removed.is_none() {
            return Err(VenueError::Rejected(format!("no open position {ticket}")));
        }
        info!(account = %account.name, ticket, "sim venue closed position");
        Ok(())
    }

    async fn cancel_order(&self, account: &Account, ticket: u64) -> Result<(), VenueError> {
        let mut books = self.books.lock().await;
        let removed = books
            .get_mut(&account.id)
            .and_then(|b| b.orders.remove(&ticket));
        if removed.is_none() {
            return Err(VenueError::Rejected(format!("no working order {ticket}")));
        }
        info!(account = %account.name, ticket, "sim venue cancelled order");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountRole, TradeDirection};

    fn account(id: i64) -> Account {
        Account {
            id,
            login: 1000 + id,
            server: "Sim-Server".to_string(),
            broker: "SimBroker".to_string(),
            name: format!("sim-{id}"),
            role: AccountRole::Receiver,
            enabled: true,
            balance: dec!(10000),
        }
    }

    fn market_spec() -> OrderSpec {
        OrderSpec {
            symbol: "EURUSD".to_string(),
            direction: TradeDirection::Buy,
            volume: dec!(0.10),
            sl: None,
            tp: None,
            price: None,
            comment: "[TKT=1]".to_string(),
            magic: 123,
        }
    }

    #[tokio::test]
    async fn market_order_becomes_position() {
        let venue = SimVenue::new();
        let acct = account(1);

        let ticket = venue.place_market_order(&acct, &market_spec()).await.unwrap();

        let positions = venue.open_positions(&acct).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].ticket, ticket);
        assert!(positions[0].is_position());
        assert_eq!(positions[0].comment, "[TKT=1]");
        assert!(venue.working_orders(&acct).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_order_requires_price() {
        let venue = SimVenue::new();
        let acct = account(1);

        let mut spec = market_spec();
        spec.direction = TradeDirection::BuyLimit;
        assert!(venue.place_pending_order(&acct, &spec).await.is_err());

        spec.price = Some(dec!(1.0800));
        let ticket = venue.place_pending_order(&acct, &spec).await.unwrap();
        let orders = venue.working_orders(&acct).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].ticket, ticket);
        assert!(!orders[0].is_position());
    }

    #[tokio::test]
    async fn zero_volume_is_rejected() {
        let venue = SimVenue::new();
        let acct = account(1);
        let mut spec = market_spec();
        spec.volume = Decimal::ZERO;

        let err = venue.place_market_order(&acct, &spec).await.unwrap_err();
        assert!(matches!(err, VenueError::Rejected(_)));
    }

    #[tokio::test]
    async fn modify_close_and_cancel_round_trip() {
        let venue = SimVenue::new();
        let acct = account(1);

        let ticket = venue.place_market_order(&acct, &market_spec()).await.unwrap();
        venue
            .modify_stops(&acct, ticket, Some(dec!(1.05)), Some(dec!(1.10)))
            .await
            .unwrap();

        let positions = venue.open_positions(&acct).await.unwrap();
        assert_eq!(positions[0].sl, Some(dec!(1.05)));
        assert_eq!(positions[0].tp, Some(dec!(1.10)));

        venue.close_position(&acct, ticket).await.unwrap();
        assert!(venue.open_positions(&acct).await.unwrap().is_empty());

        // Closing twice is a rejection, not a silent success
        assert!(venue.close_position(&acct, ticket).await.is_err());
    }
}
