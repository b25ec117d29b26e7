//! Trading-venue client seam.
//!
//! The engine never talks to a broker directly; it goes through this trait,
//! one logical client multiplexing all configured accounts. Every call can
//! fail, and every call site decides what a failure means for its tick.

mod sim;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::VenueError;
use crate::models::{Account, OrderSpec, ReceiverTrade};

pub use sim::SimVenue;

/// Venue-side view of an account's trades and order entry.
///
/// Snapshot methods return the venue's full per-trade shape regardless of
/// the account's role; provider snapshots simply discard the receiver-only
/// fields when converted (see `ProviderTrade::from`).
#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn open_positions(&self, account: &Account) -> Result<Vec<ReceiverTrade>, VenueError>;

    async fn working_orders(&self, account: &Account) -> Result<Vec<ReceiverTrade>, VenueError>;

    /// Place a market order; returns the venue-assigned ticket.
    async fn place_market_order(
        &self,
        account: &Account,
        spec: &OrderSpec,
    ) -> Result<u64, VenueError>;

    /// Place a pending order; returns the venue-assigned ticket.
    async fn place_pending_order(
        &self,
        account: &Account,
        spec: &OrderSpec,
    ) -> Result<u64, VenueError>;

    async fn modify_stops(
        &self,
        account: &Account,
        ticket: u64,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
    ) -> Result<(), VenueError>;

    async fn close_position(&self, account: &Account, ticket: u64) -> Result<(), VenueError>;

    async fn cancel_order(&self, account: &Account, ticket: u64) -> Result<(), VenueError>;
}
