//! Trade models for both sides of the copy relationship.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade, covering market positions and the four pending
/// order types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeDirection {
    Buy,
    Sell,
    BuyLimit,
    SellLimit,
    BuyStop,
    SellStop,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "BUY",
            TradeDirection::Sell => "SELL",
            TradeDirection::BuyLimit => "BUY_LIMIT",
            TradeDirection::SellLimit => "SELL_LIMIT",
            TradeDirection::BuyStop => "BUY_STOP",
            TradeDirection::SellStop => "SELL_STOP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(TradeDirection::Buy),
            "SELL" => Some(TradeDirection::Sell),
            "BUY_LIMIT" => Some(TradeDirection::BuyLimit),
            "SELL_LIMIT" => Some(TradeDirection::SellLimit),
            "BUY_STOP" => Some(TradeDirection::BuyStop),
            "SELL_STOP" => Some(TradeDirection::SellStop),
            _ => None,
        }
    }

    /// Market directions are filled immediately; the rest are pending orders.
    pub fn is_market(&self) -> bool {
        matches!(self, TradeDirection::Buy | TradeDirection::Sell)
    }

    /// True for the sell family (market and pending).
    pub fn is_sell_side(&self) -> bool {
        matches!(
            self,
            TradeDirection::Sell | TradeDirection::SellLimit | TradeDirection::SellStop
        )
    }

    /// Mirror direction used for opposite-trading. An involution: applying
    /// it twice yields the original direction.
    pub fn opposite(&self) -> Self {
        match self {
            TradeDirection::Buy => TradeDirection::Sell,
            TradeDirection::Sell => TradeDirection::Buy,
            TradeDirection::BuyLimit => TradeDirection::SellLimit,
            TradeDirection::SellLimit => TradeDirection::BuyLimit,
            TradeDirection::BuyStop => TradeDirection::SellStop,
            TradeDirection::SellStop => TradeDirection::BuyStop,
        }
    }
}

/// An open position or working order on a provider account.
///
/// Fetched fresh from the venue every tick and never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTrade {
    /// Venue-assigned ticket, unique per account
    pub ticket: u64,

    pub direction: TradeDirection,

    pub symbol: String,

    /// Volume in lots
    pub volume: Decimal,

    /// Stop-loss price, if set
    pub sl: Option<Decimal>,

    /// Take-profit price, if set
    pub tp: Option<Decimal>,

    /// Trigger price; only present for pending directions
    pub price_open: Option<Decimal>,
}

/// An open position or working order on a receiver account.
///
/// The `comment` carries the correlation tag that links the trade back to
/// its provider ticket; it is the only durable link between the two sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverTrade {
    pub ticket: u64,

    pub direction: TradeDirection,

    pub symbol: String,

    pub volume: Decimal,

    pub sl: Option<Decimal>,

    pub tp: Option<Decimal>,

    /// Trigger price for working orders
    pub price_open: Option<Decimal>,

    /// Live market price; present on positions, absent on working orders
    pub price_current: Option<Decimal>,

    /// Free-text comment, scanned for a `[TKT=..]` tag
    pub comment: String,
}

impl ReceiverTrade {
    /// A position carries a live price; a working order does not.
    pub fn is_position(&self) -> bool {
        self.price_current.is_some()
    }
}

impl From<ReceiverTrade> for ProviderTrade {
    /// Provider snapshots come off the venue in the same shape as receiver
    /// trades; the comment and live price are simply not the engine's
    /// concern on that side.
    fn from(t: ReceiverTrade) -> Self {
        ProviderTrade {
            ticket: t.ticket,
            direction: t.direction,
            symbol: t.symbol,
            volume: t.volume,
            sl: t.sl,
            tp: t.tp,
            price_open: t.price_open,
        }
    }
}

/// A fully resolved order ready for the venue client: symbol, direction and
/// volume have already been through the policy evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub symbol: String,

    pub direction: TradeDirection,

    pub volume: Decimal,

    pub sl: Option<Decimal>,

    pub tp: Option<Decimal>,

    /// Trigger price; required when `direction` is a pending type
    pub price: Option<Decimal>,

    /// Correlation tag placed into the venue comment field
    pub comment: String,

    /// Magic number marking the order as copier-placed
    pub magic: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const ALL_DIRECTIONS: [TradeDirection; 6] = [
        TradeDirection::Buy,
        TradeDirection::Sell,
        TradeDirection::BuyLimit,
        TradeDirection::SellLimit,
        TradeDirection::BuyStop,
        TradeDirection::SellStop,
    ];

    #[test]
    fn direction_string_round_trip() {
        for d in ALL_DIRECTIONS {
            assert_eq!(TradeDirection::parse(d.as_str()), Some(d));
        }
        assert_eq!(TradeDirection::parse("CLOSE_BY"), None);
    }

    #[test]
    fn opposite_is_involution() {
        for d in ALL_DIRECTIONS {
            assert_eq!(d.opposite().opposite(), d);
            assert_ne!(d.opposite(), d);
        }
    }

    #[test]
    fn sell_side_matches_family() {
        assert!(TradeDirection::Sell.is_sell_side());
        assert!(TradeDirection::SellLimit.is_sell_side());
        assert!(TradeDirection::SellStop.is_sell_side());
        assert!(!TradeDirection::Buy.is_sell_side());
        assert!(!TradeDirection::BuyStop.is_sell_side());
    }

    #[test]
    fn only_market_directions_are_market() {
        assert!(TradeDirection::Buy.is_market());
        assert!(TradeDirection::Sell.is_market());
        assert!(!TradeDirection::BuyLimit.is_market());
        assert!(!TradeDirection::SellStop.is_market());
    }

    #[test]
    fn position_discriminated_by_live_price() {
        let mut trade = ReceiverTrade {
            ticket: 1,
            direction: TradeDirection::Buy,
            symbol: "EURUSD".to_string(),
            volume: dec!(0.10),
            sl: None,
            tp: None,
            price_open: None,
            price_current: Some(dec!(1.0850)),
            comment: String::new(),
        };
        assert!(trade.is_position());

        trade.price_current = None;
        trade.price_open = Some(dec!(1.0900));
        assert!(!trade.is_position());
    }
}
