//! Storage contracts consumed by the claim engine.
//!
//! - [`CouponPool`]: coupon availability and the one-shot claim transition
//! - [`ClaimLedger`]: append-only history of successful claims
//!
//! [`MemoryStore`](crate::memory::MemoryStore) implements both in process;
//! the RocksDB binding lives in `coupon-store`.

use crate::error::{LedgerError, PoolError, StoreError};
use crate::types::{ClaimRecord, ClientAddress, Coupon, PoolStats, SessionKey, Timestamp};

/// The set of coupons and their active/claimed flags.
///
/// Implementations must be safe to share across request workers. The only
/// mutation the engine performs is [`mark_claimed`](Self::mark_claimed),
/// which must be a single conditional write in the backend.
#[cfg_attr(test, mockall::automock)]
pub trait CouponPool: Send + Sync {
    /// One active, unclaimed coupon, or `None` if the pool is exhausted.
    ///
    /// Two concurrent callers may see the same coupon; only one of them can
    /// subsequently win [`mark_claimed`](Self::mark_claimed).
    fn find_available(&self) -> Result<Option<Coupon>, StoreError>;

    /// Transition `code` from unclaimed to claimed by `by` at `at`.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Conflict`] if the coupon was already claimed when the
    ///   write was attempted
    /// - [`PoolError::NotFound`] if no coupon has this code
    fn mark_claimed(&self, code: &str, by: &ClientAddress, at: Timestamp) -> Result<Coupon, PoolError>;

    /// Flip the `active` flag. Never touches the claim.
    fn toggle_active(&self, code: &str) -> Result<Coupon, PoolError>;

    /// Add a new active, unclaimed coupon.
    ///
    /// # Errors
    ///
    /// - [`PoolError::InvalidCode`] for empty or malformed codes
    /// - [`PoolError::DuplicateCode`] if the code already exists
    fn insert(&self, code: &str, created_at: Timestamp) -> Result<Coupon, PoolError>;

    /// Look up a coupon by code.
    fn get(&self, code: &str) -> Result<Option<Coupon>, StoreError>;

    /// All coupons in creation order.
    fn list(&self) -> Result<Vec<Coupon>, StoreError>;

    /// Pool counts. Default implementation tallies [`list`](Self::list).
    fn stats(&self) -> Result<PoolStats, StoreError> {
        Ok(PoolStats::tally(&self.list()?))
    }
}

/// Append-only record of successful claims.
pub trait ClaimLedger: Send + Sync {
    /// Append a claim record.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DuplicateClaim`] if a record for the same coupon code
    ///   already exists
    fn append(&self, record: &ClaimRecord) -> Result<(), LedgerError>;

    /// The record with the greatest `claimed_at` for this session.
    fn latest_by_session(&self, session: &SessionKey) -> Result<Option<ClaimRecord>, StoreError>;

    /// The record with the greatest `claimed_at` for this address.
    fn latest_by_address(&self, address: &ClientAddress) -> Result<Option<ClaimRecord>, StoreError>;

    /// The record for a coupon code, if it has been claimed.
    fn by_coupon(&self, code: &str) -> Result<Option<ClaimRecord>, StoreError>;

    /// All records, oldest `claimed_at` first.
    fn list(&self) -> Result<Vec<ClaimRecord>, StoreError>;
}
