//! The copy-reconciliation engine: correlation resolution, reconciliation
//! planning, plan execution, and the polling driver.

mod correlate;
mod engine;
mod executor;
mod planner;

use std::future::Future;
use std::time::Duration;

use crate::error::VenueError;

pub use correlate::{parse_tag, CommentTagResolver, CorrelationStrategy};
pub use engine::{CopyEngine, EngineStatus};
pub use executor::{ExecutionReport, PlanExecutor};
pub use planner::{plan_pair, PlannedAction, SkipReason};

/// Wrap a venue call in a deadline; a timeout is just another venue failure.
pub(crate) async fn with_deadline<T>(
    deadline: Duration,
    call: impl Future<Output = Result<T, VenueError>>,
) -> Result<T, VenueError> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(VenueError::Timeout(deadline.as_millis() as u64)),
    }
}
