//! Engine error taxonomy.
//!
//! Nothing here is fatal to the process: connectivity and venue failures are
//! isolated to the affected provider/receiver pair, validation failures skip
//! the affected trade, and configuration failures skip the pair for the tick.

use thiserror::Error;

/// Failures surfaced by a venue client call.
#[derive(Debug, Error)]
pub enum VenueError {
    /// Venue unreachable or the transport failed mid-call
    #[error("venue connectivity: {0}")]
    Connectivity(String),

    /// Call exceeded the per-call deadline; treated the same as connectivity
    #[error("venue call timed out after {0}ms")]
    Timeout(u64),

    /// The venue accepted the call but rejected the request
    #[error("venue rejected: {0}")]
    Rejected(String),
}

/// Failures raised by the copy engine itself.
#[derive(Debug, Error)]
pub enum CopyError {
    /// A configured pair references state that does not exist
    #[error("configuration: {0}")]
    Configuration(String),

    /// A settings value could not be interpreted
    #[error("invalid policy value: {0}")]
    Validation(String),

    #[error(transparent)]
    Venue(#[from] VenueError),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}
