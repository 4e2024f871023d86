//! Error types for the claim engine and its storage collaborators.
use thiserror::Error;

use crate::cooldown::Blocking;
use crate::types::Timestamp;

/// Opaque infrastructure failure from a storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage: {0}")] Storage(String),
    #[error("codec: {0}")] Codec(String),
    #[error("inconsistent state: {0}")] Inconsistent(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The conditional write found the coupon already claimed.
    #[error("coupon already claimed: {0}")] Conflict(String),
    #[error("coupon not found: {0}")] NotFound(String),
    #[error("duplicate coupon code: {0}")] DuplicateCode(String),
    #[error("invalid coupon code: {0}")] InvalidCode(String),
    #[error(transparent)] Store(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("claim already recorded for coupon {0}")] DuplicateClaim(String),
    #[error(transparent)] Store(#[from] StoreError),
}

/// Errors that cross the engine boundary.
///
/// Reservation races never appear here; they are retried inside the engine
/// and surface as [`ClaimError::NoSupply`] once the retry bound is spent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    /// No session key was presented.
    #[error("no session key presented")]
    MissingSession,

    /// At least one cooldown window is still open.
    #[error("cooldown active on {blocking}; retry at {retry_at}")]
    TooSoon {
        /// Which dimension(s) are still cooling down.
        blocking: Blocking,
        /// Earliest instant at which both dimensions are clear.
        retry_at: Timestamp,
        /// Next eligible instant on the session dimension, if any.
        next_by_session: Option<Timestamp>,
        /// Next eligible instant on the address dimension, if any.
        next_by_address: Option<Timestamp>,
    },

    /// No active, unclaimed coupon could be reserved.
    #[error("no coupons available")]
    NoSupply,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PoolError> for ClaimError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Store(inner) => ClaimError::Store(inner),
            other => ClaimError::Store(StoreError::Inconsistent(other.to_string())),
        }
    }
}

impl From<LedgerError> for ClaimError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Store(inner) => ClaimError::Store(inner),
            other => ClaimError::Store(StoreError::Inconsistent(other.to_string())),
        }
    }
}
