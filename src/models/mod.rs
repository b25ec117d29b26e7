//! Domain models for accounts, trades, and order specifications.

mod account;
mod trade;

pub use account::{Account, AccountRole};
pub use trade::{OrderSpec, ProviderTrade, ReceiverTrade, TradeDirection};
