//! Reconciliation planner: decides, per tick, what a receiver account must
//! do to match a provider account.
//!
//! Pure comparison of the provider snapshot against the resolved correlation
//! map under an immutable policy. Emits one decision per provider trade plus
//! close/delete entries for orphaned receiver trades. All venue interaction
//! is left to the executor.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{Account, OrderSpec, ProviderTrade, ReceiverTrade};
use crate::policy::{build_tag, CopyPolicy};

/// Why a provider trade produced no receiver action this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A receiver trade already carries this provider ticket's tag
    AlreadyCopied,
    /// Rejected by direction or symbol filters
    Filtered,
    /// The policy carries a malformed value; refusing to size from it
    InvalidPolicy,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyCopied => "already copied",
            SkipReason::Filtered => "filtered",
            SkipReason::InvalidPolicy => "invalid policy",
        }
    }
}

/// One entry of a reconciliation plan.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedAction {
    Open {
        provider_ticket: u64,
        spec: OrderSpec,
    },
    ModifyStops {
        receiver_ticket: u64,
        provider_ticket: u64,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
    },
    Close {
        receiver_ticket: u64,
        provider_ticket: u64,
    },
    DeleteOrder {
        receiver_ticket: u64,
        provider_ticket: u64,
    },
    Skip {
        provider_ticket: u64,
        reason: SkipReason,
    },
}

/// Build the ordered action plan for one (provider, receiver) pair.
///
/// Live-trade actions come first, the orphan pass last, so a ticket that
/// disappears and reappears within one snapshot window is reopened before
/// its stale copy is closed.
pub fn plan_pair(
    provider_trades: &[ProviderTrade],
    correlation: &HashMap<u64, ReceiverTrade>,
    policy: &CopyPolicy,
    provider: &Account,
    receiver: &Account,
) -> Vec<PlannedAction> {
    let mut plan = Vec::with_capacity(provider_trades.len());

    for trade in provider_trades {
        plan.push(decide(trade, correlation, policy, provider, receiver));
    }

    if policy.close_on_provider_close {
        plan.extend(orphan_pass(provider_trades, correlation));
    }

    plan
}

/// Decision for a single provider trade.
///
/// Already-copied trades only ever get stop synchronization; sizing and
/// filtering decisions are frozen at open time and policy changes apply to
/// newly observed trades only.
fn decide(
    trade: &ProviderTrade,
    correlation: &HashMap<u64, ReceiverTrade>,
    policy: &CopyPolicy,
    provider: &Account,
    receiver: &Account,
) -> PlannedAction {
    if let Some(existing) = correlation.get(&trade.ticket) {
        if existing.sl != trade.sl || existing.tp != trade.tp {
            return PlannedAction::ModifyStops {
                receiver_ticket: existing.ticket,
                provider_ticket: trade.ticket,
                sl: trade.sl,
                tp: trade.tp,
            };
        }
        return PlannedAction::Skip {
            provider_ticket: trade.ticket,
            reason: SkipReason::AlreadyCopied,
        };
    }

    if !policy.should_copy(trade.direction, &trade.symbol) {
        return PlannedAction::Skip {
            provider_ticket: trade.ticket,
            reason: SkipReason::Filtered,
        };
    }

    if policy.invalid.is_some() {
        return PlannedAction::Skip {
            provider_ticket: trade.ticket,
            reason: SkipReason::InvalidPolicy,
        };
    }

    let direction = policy.effective_direction(trade.direction);
    let spec = OrderSpec {
        symbol: policy.resolve_symbol(&trade.symbol, &receiver.broker),
        direction,
        volume: policy.sized_volume(trade.volume, provider.balance, receiver.balance),
        sl: trade.sl,
        tp: trade.tp,
        price: if direction.is_market() {
            None
        } else {
            trade.price_open
        },
        comment: build_tag(trade.ticket, policy.opposite_trades),
        magic: policy.magic_number,
    };

    PlannedAction::Open {
        provider_ticket: trade.ticket,
        spec,
    }
}

/// Close/delete entries for every mapped provider ticket that is absent
/// from the current provider snapshot. Positions close, working orders get
/// deleted; the two are discriminated by the presence of a live price.
fn orphan_pass(
    provider_trades: &[ProviderTrade],
    correlation: &HashMap<u64, ReceiverTrade>,
) -> Vec<PlannedAction> {
    let live: HashSet<u64> = provider_trades.iter().map(|t| t.ticket).collect();

    let mut orphans: Vec<(&u64, &ReceiverTrade)> = correlation
        .iter()
        .filter(|(ticket, _)| !live.contains(ticket))
        .collect();
    // Stable plan order regardless of map iteration order
    orphans.sort_by_key(|(ticket, _)| **ticket);

    orphans
        .into_iter()
        .map(|(&provider_ticket, receiver_trade)| {
            if receiver_trade.is_position() {
                PlannedAction::Close {
                    receiver_ticket: receiver_trade.ticket,
                    provider_ticket,
                }
            } else {
                PlannedAction::DeleteOrder {
                    receiver_ticket: receiver_trade.ticket,
                    provider_ticket,
                }
            }
        })
        .collect()
}
