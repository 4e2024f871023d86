//! In-process coupon pool and claim ledger.
//!
//! Suitable for tests and single-process ephemeral deployments. The claim
//! transition is a compare-and-set performed under the store's write lock, so
//! it is the store itself (not the caller) that serializes competing claims.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::error::{LedgerError, PoolError, StoreError};
use crate::traits::{ClaimLedger, CouponPool};
use crate::types::{normalize_code, ClaimRecord, ClientAddress, Coupon, CouponClaim, SessionKey, Timestamp};

#[derive(Default)]
struct Inner {
    /// Coupons in creation order.
    coupons: Vec<Coupon>,
    /// Code → position in `coupons`.
    by_code: HashMap<String, usize>,
    /// Claim records in append order.
    claims: Vec<ClaimRecord>,
    /// Codes that already have a ledger entry.
    claimed_codes: HashSet<String>,
}

/// Memory-backed [`CouponPool`] and [`ClaimLedger`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with active coupons, in the given order.
    pub fn with_coupons<'a>(
        codes: impl IntoIterator<Item = &'a str>,
        created_at: Timestamp,
    ) -> Result<Self, PoolError> {
        let store = Self::new();
        for code in codes {
            store.insert(code, created_at)?;
        }
        Ok(store)
    }

    pub fn coupon_count(&self) -> usize {
        self.inner.read().coupons.len()
    }

    pub fn claim_count(&self) -> usize {
        self.inner.read().claims.len()
    }
}

impl CouponPool for MemoryStore {
    fn find_available(&self) -> Result<Option<Coupon>, StoreError> {
        let inner = self.inner.read();
        Ok(inner.coupons.iter().find(|c| c.is_available()).cloned())
    }

    fn mark_claimed(&self, code: &str, by: &ClientAddress, at: Timestamp) -> Result<Coupon, PoolError> {
        let mut inner = self.inner.write();
        let idx = *inner
            .by_code
            .get(code)
            .ok_or_else(|| PoolError::NotFound(code.to_string()))?;
        let coupon = &mut inner.coupons[idx];
        // Conditional on the coupon still being allocatable at write time.
        if !coupon.is_available() {
            return Err(PoolError::Conflict(code.to_string()));
        }
        coupon.claim = Some(CouponClaim { by: by.clone(), at });
        Ok(coupon.clone())
    }

    fn toggle_active(&self, code: &str) -> Result<Coupon, PoolError> {
        let mut inner = self.inner.write();
        let idx = *inner
            .by_code
            .get(code)
            .ok_or_else(|| PoolError::NotFound(code.to_string()))?;
        let coupon = &mut inner.coupons[idx];
        coupon.active = !coupon.active;
        Ok(coupon.clone())
    }

    fn insert(&self, code: &str, created_at: Timestamp) -> Result<Coupon, PoolError> {
        let code = normalize_code(code).ok_or_else(|| PoolError::InvalidCode(code.to_string()))?;
        let mut inner = self.inner.write();
        if inner.by_code.contains_key(&code) {
            return Err(PoolError::DuplicateCode(code));
        }
        let coupon = Coupon::new(code.clone(), created_at);
        let idx = inner.coupons.len();
        inner.coupons.push(coupon.clone());
        inner.by_code.insert(code, idx);
        Ok(coupon)
    }

    fn get(&self, code: &str) -> Result<Option<Coupon>, StoreError> {
        let inner = self.inner.read();
        Ok(inner.by_code.get(code).map(|&idx| inner.coupons[idx].clone()))
    }

    fn list(&self) -> Result<Vec<Coupon>, StoreError> {
        Ok(self.inner.read().coupons.clone())
    }
}

impl ClaimLedger for MemoryStore {
    fn append(&self, record: &ClaimRecord) -> Result<(), LedgerError> {
        let mut inner = self.inner.write();
        if !inner.claimed_codes.insert(record.coupon_code.clone()) {
            return Err(LedgerError::DuplicateClaim(record.coupon_code.clone()));
        }
        inner.claims.push(record.clone());
        Ok(())
    }

    fn latest_by_session(&self, session: &SessionKey) -> Result<Option<ClaimRecord>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .claims
            .iter()
            .filter(|r| &r.session == session)
            .max_by_key(|r| r.claimed_at)
            .cloned())
    }

    fn latest_by_address(&self, address: &ClientAddress) -> Result<Option<ClaimRecord>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .claims
            .iter()
            .filter(|r| &r.address == address)
            .max_by_key(|r| r.claimed_at)
            .cloned())
    }

    fn by_coupon(&self, code: &str) -> Result<Option<ClaimRecord>, StoreError> {
        let inner = self.inner.read();
        Ok(inner.claims.iter().find(|r| r.coupon_code == code).cloned())
    }

    fn list(&self) -> Result<Vec<ClaimRecord>, StoreError> {
        let mut claims = self.inner.read().claims.clone();
        claims.sort_by_key(|r| r.claimed_at);
        Ok(claims)
    }
}
