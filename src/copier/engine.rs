//! Copy engine driver: the polling loop across all provider/receiver pairs.
//!
//! The driver holds no authoritative per-trade state. Correctness after a
//! restart rests entirely on the venue-held comment tags, which the
//! resolver rebuilds every tick. Each tick captures one immutable policy
//! snapshot; settings changed mid-tick apply from the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::error::{CopyError, VenueError};
use crate::events::{CopyEvent, EventBus};
use crate::models::{Account, ProviderTrade};
use crate::policy::CopyPolicy;
use crate::venue::VenueClient;

use super::correlate::{CommentTagResolver, CorrelationStrategy};
use super::executor::PlanExecutor;
use super::planner::plan_pair;
use super::with_deadline;

/// Engine status exposed to the dashboard/API layer.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub running: bool,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct EngineCore {
    db: Database,
    venue: Arc<dyn VenueClient>,
    resolver: Arc<dyn CorrelationStrategy>,
    events: EventBus,
    executor: PlanExecutor,
    venue_timeout: Duration,
    running: AtomicBool,
    stop_signal: Notify,
    last_tick_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

/// The polling copy engine.
pub struct CopyEngine {
    core: Arc<EngineCore>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CopyEngine {
    pub fn new(db: Database, venue: Arc<dyn VenueClient>, venue_timeout: Duration) -> Self {
        Self::with_resolver(db, venue, venue_timeout, Arc::new(CommentTagResolver))
    }

    /// Swap in a different correlation strategy, e.g. a persisted mapping
    /// store on venues with richer metadata.
    pub fn with_resolver(
        db: Database,
        venue: Arc<dyn VenueClient>,
        venue_timeout: Duration,
        resolver: Arc<dyn CorrelationStrategy>,
    ) -> Self {
        let events = EventBus::default();
        let executor = PlanExecutor::new(db.clone(), events.clone(), venue_timeout);
        Self {
            core: Arc::new(EngineCore {
                db,
                venue,
                resolver,
                events,
                executor,
                venue_timeout,
                running: AtomicBool::new(false),
                stop_signal: Notify::new(),
                last_tick_at: RwLock::new(None),
                last_error: RwLock::new(None),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CopyEvent> {
        self.core.events.subscribe()
    }

    /// Start the polling loop. Starting an already-running engine is an
    /// error, never a second loop.
    pub async fn start(&self) -> Result<(), CopyError> {
        if self.core.running.swap(true, Ordering::SeqCst) {
            return Err(CopyError::Configuration(
                "copy engine is already running".to_string(),
            ));
        }

        info!("copy engine started");
        self.core.events.emit(CopyEvent::EngineStarted);

        let core = self.core.clone();
        let handle = tokio::spawn(async move {
            while core.running.load(Ordering::SeqCst) {
                let interval = match core.tick().await {
                    Ok(interval) => interval,
                    Err(e) => {
                        error!(error = %e, "tick failed");
                        *core.last_error.write().await = Some(e.to_string());
                        Duration::from_secs(1)
                    }
                };

                if !core.running.load(Ordering::SeqCst) {
                    break;
                }
                tokio::select! {
                    _ = core.stop_signal.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("copy engine stopped");
        });
        *self.handle.lock().await = Some(handle);

        Ok(())
    }

    /// Stop the loop after the current tick completes. Stopping a stopped
    /// engine is a no-op.
    pub async fn stop(&self) {
        if !self.core.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.core.stop_signal.notify_waiters();

        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "engine task panicked");
            }
        }
        self.core.events.emit(CopyEvent::EngineStopped);
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.core.running.load(Ordering::SeqCst),
            last_tick_at: *self.core.last_tick_at.read().await,
            last_error: self.core.last_error.read().await.clone(),
        }
    }

    /// Run exactly one reconciliation pass outside the loop. Used by tests
    /// and one-shot tooling; the background loop calls the same path.
    pub async fn run_once(&self) -> Result<(), CopyError> {
        self.core.tick().await.map(|_| ())
    }
}

impl EngineCore {
    /// One pass over every enabled (provider, receiver) pair. Returns the
    /// sleep interval from the policy snapshot taken this tick.
    async fn tick(&self) -> Result<Duration, CopyError> {
        *self.last_tick_at.write().await = Some(Utc::now());
        // Errors from the previous tick are stale now; pair failures below
        // repopulate it.
        *self.last_error.write().await = None;

        let settings = self.db.settings().await?;
        let mappings = self
            .db
            .symbol_mappings()
            .await?
            .into_iter()
            .map(|m| m.into_mapping())
            .collect();
        let policy = CopyPolicy::from_settings(&settings, mappings);
        if let Some(reason) = &policy.invalid {
            warn!(%reason, "policy carries an invalid value; new trades will be skipped");
        }
        // Floor keeps a misconfigured interval from busy-looping
        let interval = Duration::from_millis(policy.copy_interval_ms.max(50));

        let providers = self.db.enabled_providers().await?;
        let receivers = self.db.enabled_receivers().await?;
        debug!(
            providers = providers.len(),
            receivers = receivers.len(),
            "tick"
        );

        for provider in &providers {
            // A snapshot failure is isolated to this provider's pairs
            let provider_trades = match self.provider_snapshot(provider, &policy).await {
                Ok(trades) => trades,
                Err(e) => {
                    self.pair_failed(provider, None, format!("provider snapshot failed: {e}"))
                        .await;
                    continue;
                }
            };

            for receiver in &receivers {
                if let Err(e) = self
                    .reconcile_pair(provider, receiver, &provider_trades, &policy)
                    .await
                {
                    self.pair_failed(provider, Some(receiver), format!("reconcile failed: {e}"))
                        .await;
                }
            }
        }

        Ok(interval)
    }

    async fn provider_snapshot(
        &self,
        provider: &Account,
        policy: &CopyPolicy,
    ) -> Result<Vec<ProviderTrade>, VenueError> {
        let mut trades = with_deadline(self.venue_timeout, self.venue.open_positions(provider)).await?;
        if policy.copy_pending {
            trades.extend(
                with_deadline(self.venue_timeout, self.venue.working_orders(provider)).await?,
            );
        }
        Ok(trades.into_iter().map(ProviderTrade::from).collect())
    }

    async fn reconcile_pair(
        &self,
        provider: &Account,
        receiver: &Account,
        provider_trades: &[ProviderTrade],
        policy: &CopyPolicy,
    ) -> Result<(), VenueError> {
        // Both snapshots are needed for correlation regardless of the
        // pending-copy toggle: orphaned orders must still be found.
        let positions = with_deadline(self.venue_timeout, self.venue.open_positions(receiver)).await?;
        let orders = with_deadline(self.venue_timeout, self.venue.working_orders(receiver)).await?;

        let correlation = self.resolver.resolve(&positions, &orders);
        let plan = plan_pair(provider_trades, &correlation, policy, provider, receiver);
        let report = self
            .executor
            .execute(&*self.venue, provider, receiver, plan)
            .await;

        debug!(
            provider = %provider.name,
            receiver = %receiver.name,
            opened = report.opened,
            modified = report.modified,
            closed = report.closed,
            deleted = report.deleted,
            skipped = report.skipped,
            failed = report.failed,
            "pair reconciled"
        );
        Ok(())
    }

    async fn pair_failed(&self, provider: &Account, receiver: Option<&Account>, message: String) {
        error!(
            provider = %provider.name,
            receiver = receiver.map(|r| r.name.as_str()).unwrap_or("-"),
            "{message}"
        );
        *self.last_error.write().await = Some(message.clone());
        self.events.emit(CopyEvent::CopyError {
            message,
            provider: provider.name.clone(),
            receiver: receiver.map(|r| r.name.clone()).unwrap_or_default(),
        });
    }
}
