//! Error types surfaced by the replication layer.
//!
//! Nothing on the tick path returns these; they cover setup mistakes that a
//! caller must fix before traffic starts. Send failures are not errors: the
//! transport reports them as `false` and the session retries.

use thiserror::Error;

/// Replication setup errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetError {
    /// A configuration value is out of range.
    #[error("invalid replication config: {field} {reason}")]
    InvalidConfig {
        /// Offending field.
        field: &'static str,
        /// Human-readable constraint.
        reason: String,
    },
    /// A peer id was attached to a network twice.
    #[error("peer {0} is already attached")]
    DuplicatePeer(String),
}
