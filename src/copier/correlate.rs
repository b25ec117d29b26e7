//! Correlation resolver: rebuilds the provider→receiver trade mapping from
//! venue-held metadata, every tick, with no persistent state of its own.
//!
//! The only durable link between a provider trade and its copy is the
//! `[TKT=<ticket>]` tag the executor embeds in the receiver trade's comment.
//! Rebuilding the map from the venue each cycle makes the engine stateless
//! and restart-safe; the trade-off is that a venue which strips comments
//! makes copies unrecoverable.

use std::collections::HashMap;

use tracing::warn;

use crate::models::ReceiverTrade;

/// Parse a correlation tag out of a comment string.
///
/// Returns the provider ticket and whether the copy was opened in the
/// opposite direction. Exact inverse of `policy::build_tag`.
pub fn parse_tag(comment: &str) -> Option<(u64, bool)> {
    let start = comment.find("TKT=")? + 4;
    let rest = &comment[start..];
    let end = rest.find(']')?;
    let ticket = rest[..end].parse::<u64>().ok()?;
    Some((ticket, comment.contains("[OPPOSITE]")))
}

/// Strategy for mapping provider tickets to already-copied receiver trades.
///
/// Pure over snapshots the driver has already fetched; implementations do
/// no I/O. The default scans comment tags, but a venue with richer metadata
/// can swap in a persisted mapping store behind the same interface.
pub trait CorrelationStrategy: Send + Sync {
    fn resolve(
        &self,
        positions: &[ReceiverTrade],
        orders: &[ReceiverTrade],
    ) -> HashMap<u64, ReceiverTrade>;
}

/// Default strategy: scan receiver comments for embedded `[TKT=..]` tags.
///
/// Positions are scanned before working orders, so if both ever carry the
/// same tag the order entry wins. That situation indicates an earlier
/// reconciliation fault, so the overwrite is logged.
pub struct CommentTagResolver;

impl CorrelationStrategy for CommentTagResolver {
    fn resolve(
        &self,
        positions: &[ReceiverTrade],
        orders: &[ReceiverTrade],
    ) -> HashMap<u64, ReceiverTrade> {
        let mut map = HashMap::new();

        for trade in positions.iter().chain(orders.iter()) {
            let Some((provider_ticket, _)) = parse_tag(&trade.comment) else {
                // No recognizable tag: treated as manually placed, invisible
                // to the engine.
                continue;
            };

            if let Some(previous) = map.insert(provider_ticket, trade.clone()) {
                warn!(
                    provider_ticket,
                    displaced_ticket = previous.ticket,
                    kept_ticket = trade.ticket,
                    "duplicate correlation tag on receiver; keeping the later entry"
                );
            }
        }

        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeDirection;
    use crate::policy::build_tag;
    use rust_decimal_macros::dec;

    fn receiver_trade(ticket: u64, comment: &str, position: bool) -> ReceiverTrade {
        ReceiverTrade {
            ticket,
            direction: TradeDirection::Buy,
            symbol: "EURUSD".to_string(),
            volume: dec!(0.10),
            sl: None,
            tp: None,
            price_open: if position { None } else { Some(dec!(1.08)) },
            price_current: if position { Some(dec!(1.0850)) } else { None },
            comment: comment.to_string(),
        }
    }

    #[test]
    fn tag_round_trip() {
        for ticket in [0u64, 1, 555, 18_446_744_073_709_551_615] {
            for opposite in [false, true] {
                let tag = build_tag(ticket, opposite);
                assert_eq!(parse_tag(&tag), Some((ticket, opposite)));
            }
        }
    }

    #[test]
    fn tag_parses_with_surrounding_text() {
        assert_eq!(parse_tag("copy [TKT=42] v2"), Some((42, false)));
        assert_eq!(parse_tag("[TKT=42][OPPOSITE] mirror"), Some((42, true)));
    }

    #[test]
    fn malformed_tags_are_skipped() {
        assert_eq!(parse_tag(""), None);
        assert_eq!(parse_tag("manual entry"), None);
        assert_eq!(parse_tag("[TKT=]"), None);
        assert_eq!(parse_tag("[TKT=abc]"), None);
        assert_eq!(parse_tag("[TKT=12"), None);
    }

    #[test]
    fn resolver_maps_tagged_trades_only() {
        let positions = vec![
            receiver_trade(10, "[TKT=100]", true),
            receiver_trade(11, "manual", true),
        ];
        let orders = vec![receiver_trade(12, "[TKT=200][OPPOSITE]", false)];

        let map = CommentTagResolver.resolve(&positions, &orders);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&100).map(|t| t.ticket), Some(10));
        assert_eq!(map.get(&200).map(|t| t.ticket), Some(12));
        // The untagged trade is invisible
        assert!(!map.values().any(|t| t.ticket == 11));
    }

    #[test]
    fn order_wins_duplicate_tag() {
        let positions = vec![receiver_trade(10, "[TKT=100]", true)];
        let orders = vec![receiver_trade(20, "[TKT=100]", false)];

        let map = CommentTagResolver.resolve(&positions, &orders);

        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&100).map(|t| t.ticket), Some(20));
    }
}
