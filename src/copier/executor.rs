//! Plan executor: applies a reconciliation plan against the venue client.
//!
//! Every call is fire-and-forget within the tick: a failure is logged and
//! surfaced as an event, never retried. The next poll re-evaluates from
//! scratch, and a failed open never entered the correlation map, so retry
//! falls out of reconciliation itself.

use std::time::Duration;

use tracing::{debug, error, info};

use crate::db::{CopyAudit, Database};
use crate::events::{CopyEvent, EventBus};
use crate::models::Account;
use crate::venue::VenueClient;

use super::planner::PlannedAction;
use super::with_deadline;

/// Per-pair tally of what one plan application did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub opened: usize,
    pub modified: usize,
    pub closed: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Applies plans, records audit rows, and emits events.
#[derive(Clone)]
pub struct PlanExecutor {
    db: Database,
    events: EventBus,
    venue_timeout: Duration,
}

impl PlanExecutor {
    pub fn new(db: Database, events: EventBus, venue_timeout: Duration) -> Self {
        Self {
            db,
            events,
            venue_timeout,
        }
    }

    /// Apply a plan for one (provider, receiver) pair, in plan order.
    pub async fn execute(
        &self,
        venue: &dyn VenueClient,
        provider: &Account,
        receiver: &Account,
        plan: Vec<PlannedAction>,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for action in plan {
            match action {
                PlannedAction::Open {
                    provider_ticket,
                    spec,
                } => {
                    let placed = if spec.direction.is_market() {
                        with_deadline(self.venue_timeout, venue.place_market_order(receiver, &spec))
                            .await
                    } else {
                        with_deadline(self.venue_timeout, venue.place_pending_order(receiver, &spec))
                            .await
                    };

                    match placed {
                        Ok(receiver_ticket) => {
                            info!(
                                provider = %provider.name,
                                receiver = %receiver.name,
                                provider_ticket,
                                receiver_ticket,
                                symbol = %spec.symbol,
                                volume = %spec.volume,
                                "copied trade"
                            );

                            // Audit is observability only; a write failure
                            // must not fail the copy that already happened.
                            let audit = CopyAudit {
                                provider_account: provider.name.clone(),
                                receiver_account: receiver.name.clone(),
                                provider_ticket,
                                receiver_ticket,
                                symbol: spec.symbol.clone(),
                                direction: spec.direction,
                                volume: spec.volume,
                                outcome: "copied".to_string(),
                            };
                            if let Err(e) = self.db.log_copied_trade(&audit).await {
                                error!(error = %e, "failed to write copy audit row");
                            }

                            self.events.emit(CopyEvent::TradeCopied {
                                provider: provider.name.clone(),
                                receiver: receiver.name.clone(),
                                symbol: spec.symbol,
                                direction: spec.direction,
                                volume: spec.volume,
                                ticket: receiver_ticket,
                            });
                            report.opened += 1;
                        }
                        Err(e) => {
                            self.copy_failed(
                                provider,
                                receiver,
                                format!("open of provider trade {provider_ticket} failed: {e}"),
                            );
                            report.failed += 1;
                        }
                    }
                }

                PlannedAction::ModifyStops {
                    receiver_ticket,
                    provider_ticket,
                    sl,
                    tp,
                } => match with_deadline(
                    self.venue_timeout,
                    venue.modify_stops(receiver, receiver_ticket, sl, tp),
                )
                .await
                {
                    Ok(()) => {
                        info!(
                            receiver = %receiver.name,
                            receiver_ticket,
                            provider_ticket,
                            "synchronized stops"
                        );
                        self.events.emit(CopyEvent::TradeModified {
                            receiver: receiver.name.clone(),
                            receiver_ticket,
                            provider_ticket,
                            sl,
                            tp,
                        });
                        report.modified += 1;
                    }
                    Err(e) => {
                        self.copy_failed(
                            provider,
                            receiver,
                            format!("stop modify on {receiver_ticket} failed: {e}"),
                        );
                        report.failed += 1;
                    }
                },

                PlannedAction::Close {
                    receiver_ticket,
                    provider_ticket,
                } => match with_deadline(
                    self.venue_timeout,
                    venue.close_position(receiver, receiver_ticket),
                )
                .await
                {
                    Ok(()) => {
                        info!(
                            receiver = %receiver.name,
                            receiver_ticket,
                            provider_ticket,
                            "closed position after provider close"
                        );
                        self.events.emit(CopyEvent::TradeClosed {
                            receiver_ticket,
                            provider_ticket,
                            reason: "Provider closed".to_string(),
                        });
                        report.closed += 1;
                    }
                    Err(e) => {
                        self.copy_failed(
                            provider,
                            receiver,
                            format!("close of {receiver_ticket} failed: {e}"),
                        );
                        report.failed += 1;
                    }
                },

                PlannedAction::DeleteOrder {
                    receiver_ticket,
                    provider_ticket,
                } => match with_deadline(
                    self.venue_timeout,
                    venue.cancel_order(receiver, receiver_ticket),
                )
                .await
                {
                    Ok(()) => {
                        info!(
                            receiver = %receiver.name,
                            receiver_ticket,
                            provider_ticket,
                            "deleted order after provider delete"
                        );
                        self.events.emit(CopyEvent::OrderDeleted {
                            receiver_ticket,
                            provider_ticket,
                            reason: "Provider deleted".to_string(),
                        });
                        report.deleted += 1;
                    }
                    Err(e) => {
                        self.copy_failed(
                            provider,
                            receiver,
                            format!("delete of {receiver_ticket} failed: {e}"),
                        );
                        report.failed += 1;
                    }
                },

                PlannedAction::Skip {
                    provider_ticket,
                    reason,
                } => {
                    debug!(provider_ticket, reason = reason.as_str(), "skipped");
                    report.skipped += 1;
                }
            }
        }

        report
    }

    fn copy_failed(&self, provider: &Account, receiver: &Account, message: String) {
        error!(
            provider = %provider.name,
            receiver = %receiver.name,
            "{message}"
        );
        self.events.emit(CopyEvent::CopyError {
            message,
            provider: provider.name.clone(),
            receiver: receiver.name.clone(),
        });
    }
}
