//! Allocation orchestrator.
//!
//! A claim attempt moves through these states:
//!
//! ```text
//! Start -> CooldownCheck -> Rejected(TooSoon)
//!                        -> PoolLookup -> NoSupply
//!                                      -> TryReserve -> LostRace -> PoolLookup
//!                                                    -> Reserved -> LedgerAppend -> Success
//! ```
//!
//! The conditional [`CouponPool::mark_claimed`] write is the only point
//! where competing claims are serialized. Losing that race sends the attempt
//! back to the lookup, at most `max_reserve_attempts` times.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::constants::DEFAULT_MAX_RESERVE_ATTEMPTS;
use crate::cooldown::{window_end, CooldownEvaluator, CooldownPolicy, CooldownStatus};
use crate::error::{ClaimError, PoolError, StoreError};
use crate::traits::{ClaimLedger, CouponPool};
use crate::types::{ClaimReceipt, ClaimRecord, ClientAddress, Coupon, SessionKey, Timestamp};

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub policy: CooldownPolicy,
    /// Upper bound on reservation attempts per claim. Values below 1 are
    /// treated as 1.
    pub max_reserve_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: CooldownPolicy::default(),
            max_reserve_attempts: DEFAULT_MAX_RESERVE_ATTEMPTS,
        }
    }
}

/// Result of an eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub eligible: bool,
    pub next_by_session: Option<Timestamp>,
    pub next_by_address: Option<Timestamp>,
}

/// Decides claim eligibility and hands out coupons.
pub struct ClaimEngine {
    pool: Arc<dyn CouponPool>,
    ledger: Arc<dyn ClaimLedger>,
    config: EngineConfig,
}

impl ClaimEngine {
    pub fn new(pool: Arc<dyn CouponPool>, ledger: Arc<dyn ClaimLedger>, config: EngineConfig) -> Self {
        Self { pool, ledger, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &dyn CouponPool {
        self.pool.as_ref()
    }

    pub fn ledger(&self) -> &dyn ClaimLedger {
        self.ledger.as_ref()
    }

    fn evaluator(&self) -> CooldownEvaluator<'_> {
        CooldownEvaluator::new(self.ledger.as_ref(), self.config.policy)
    }

    /// Next-eligible instants for both dimensions.
    pub fn cooldown_status(
        &self,
        session: &SessionKey,
        address: &ClientAddress,
        now: Timestamp,
    ) -> Result<CooldownStatus, StoreError> {
        self.evaluator().evaluate(session, address, now)
    }

    /// Whether `session` at `address` may claim at `now`. Never writes.
    ///
    /// # Errors
    ///
    /// - [`ClaimError::MissingSession`] if `session` is blank
    pub fn check_eligibility(
        &self,
        session: &str,
        address: &ClientAddress,
        now: Timestamp,
    ) -> Result<Eligibility, ClaimError> {
        let session = SessionKey::parse(session).ok_or(ClaimError::MissingSession)?;
        let status = self.cooldown_status(&session, address, now)?;
        Ok(Eligibility {
            eligible: status.is_eligible(now),
            next_by_session: status.next_by_session,
            next_by_address: status.next_by_address,
        })
    }

    /// Claim one coupon for `session` at `address`.
    ///
    /// # Errors
    ///
    /// - [`ClaimError::MissingSession`] if `session` is blank
    /// - [`ClaimError::TooSoon`] if either cooldown window is still open
    /// - [`ClaimError::NoSupply`] if no coupon could be reserved
    /// - [`ClaimError::Store`] on backend failure; the caller must not assume
    ///   anything about the resulting claim state
    pub fn claim(
        &self,
        session: &str,
        address: &ClientAddress,
        now: Timestamp,
    ) -> Result<ClaimReceipt, ClaimError> {
        let session = SessionKey::parse(session).ok_or(ClaimError::MissingSession)?;

        // Rejections report both window ends, including one already cleared.
        let ends = self.evaluator().window_ends(&session, address)?;
        if let (Some(blocking), Some(retry_at)) = (ends.blocking(now), ends.retry_at(now)) {
            debug!(%session, %address, %blocking, %retry_at, "claim rejected: cooldown active");
            return Err(ClaimError::TooSoon {
                blocking,
                retry_at,
                next_by_session: ends.next_by_session,
                next_by_address: ends.next_by_address,
            });
        }

        let coupon = self.reserve(address, now)?;

        let record = ClaimRecord {
            coupon_code: coupon.code.clone(),
            address: address.clone(),
            session: session.clone(),
            claimed_at: now,
        };
        if let Err(e) = self.ledger.append(&record) {
            error!(code = %coupon.code, %session, %address, error = %e, "coupon reserved but ledger append failed");
            return Err(e.into());
        }

        info!(code = %coupon.code, %session, %address, "coupon claimed");

        let policy = self.config.policy;
        Ok(ClaimReceipt {
            coupon_code: coupon.code,
            claimed_at: now,
            next_by_session: window_end(now, policy.session_window),
            next_by_address: window_end(now, policy.address_window),
        })
    }

    /// The most recent claim made by `session`, if any.
    pub fn last_claim(&self, session: &str) -> Result<Option<ClaimRecord>, ClaimError> {
        let session = SessionKey::parse(session).ok_or(ClaimError::MissingSession)?;
        Ok(self.ledger.latest_by_session(&session)?)
    }

    /// Lookup-then-reserve loop. A lost race re-runs the lookup; running out
    /// of attempts is reported as `NoSupply`.
    fn reserve(&self, address: &ClientAddress, now: Timestamp) -> Result<Coupon, ClaimError> {
        let attempts = self.config.max_reserve_attempts.max(1);
        for attempt in 1..=attempts {
            let Some(candidate) = self.pool.find_available()? else {
                debug!(%address, attempt, "no available coupon");
                return Err(ClaimError::NoSupply);
            };

            match self.pool.mark_claimed(&candidate.code, address, now) {
                Ok(coupon) => return Ok(coupon),
                Err(PoolError::Conflict(code)) => {
                    debug!(%code, %address, attempt, "lost reservation race");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(%address, attempts, "reservation attempts exhausted");
        Err(ClaimError::NoSupply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::Blocking;
    use crate::memory::MemoryStore;
    use crate::traits::MockCouponPool;
    use chrono::{Duration, TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 2, 10, 8, 0, 0).unwrap()
    }

    fn at(secs: i64) -> Timestamp {
        t0() + Duration::seconds(secs)
    }

    fn addr(s: &str) -> ClientAddress {
        ClientAddress::parse(s).unwrap()
    }

    fn engine_with(codes: &[&str]) -> (ClaimEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_coupons(codes.iter().copied(), t0()).unwrap());
        let config = EngineConfig {
            policy: CooldownPolicy::from_secs(120, 180),
            max_reserve_attempts: 4,
        };
        (ClaimEngine::new(store.clone(), store.clone(), config), store)
    }

    #[test]
    fn missing_session_rejected() {
        let (engine, store) = engine_with(&["A"]);
        assert_eq!(engine.claim("", &addr("1.1.1.1"), t0()).unwrap_err(), ClaimError::MissingSession);
        assert_eq!(engine.claim("  ", &addr("1.1.1.1"), t0()).unwrap_err(), ClaimError::MissingSession);
        assert_eq!(
            engine.check_eligibility("", &addr("1.1.1.1"), t0()).unwrap_err(),
            ClaimError::MissingSession
        );
        assert!(store.get("A").unwrap().unwrap().is_available());
    }

    #[test]
    fn first_claim_succeeds_with_both_windows() {
        let (engine, store) = engine_with(&["A", "B"]);
        let receipt = engine.claim("s1", &addr("10.0.0.1"), t0()).unwrap();
        assert_eq!(receipt.coupon_code, "A");
        assert_eq!(receipt.claimed_at, t0());
        assert_eq!(receipt.next_by_session, at(120));
        assert_eq!(receipt.next_by_address, at(180));

        let coupon = store.get("A").unwrap().unwrap();
        let ledger = store.by_coupon("A").unwrap().unwrap();
        assert_eq!(coupon.claim.unwrap().at, ledger.claimed_at);
        assert_eq!(ledger.session.as_str(), "s1");
    }

    #[test]
    fn walkthrough_two_coupons() {
        let (engine, _store) = engine_with(&["A", "B"]);
        let ip = addr("10.0.0.1");

        assert_eq!(engine.claim("s1", &ip, t0()).unwrap().coupon_code, "A");

        match engine.claim("s1", &ip, at(90)).unwrap_err() {
            ClaimError::TooSoon { blocking, retry_at, next_by_session, next_by_address } => {
                assert_eq!(blocking, Blocking::Both);
                assert_eq!(next_by_session, Some(at(120)));
                assert_eq!(next_by_address, Some(at(180)));
                assert_eq!(retry_at, at(180));
            }
            other => panic!("expected TooSoon, got {other:?}"),
        }

        match engine.claim("s1", &ip, at(150)).unwrap_err() {
            ClaimError::TooSoon { blocking, retry_at, next_by_session, .. } => {
                assert_eq!(blocking, Blocking::Address);
                assert_eq!(retry_at, at(180));
                // Reported even though it no longer blocks.
                assert_eq!(next_by_session, Some(at(120)));
            }
            other => panic!("expected TooSoon, got {other:?}"),
        }

        assert_eq!(engine.claim("s1", &ip, at(181)).unwrap().coupon_code, "B");
        assert_eq!(
            engine.claim("fresh", &addr("10.9.9.9"), at(200)).unwrap_err(),
            ClaimError::NoSupply
        );
    }

    #[test]
    fn oversized_window_still_returns_receipt() {
        let store = Arc::new(MemoryStore::with_coupons(["A", "B"], t0()).unwrap());
        let config = EngineConfig {
            policy: CooldownPolicy::from_secs(1_000_000_000_000_000, 180),
            max_reserve_attempts: 4,
        };
        let engine = ClaimEngine::new(store.clone(), store.clone(), config);

        let receipt = engine.claim("s1", &addr("10.0.0.1"), t0()).unwrap();
        assert_eq!(receipt.coupon_code, "A");
        assert_eq!(receipt.next_by_session, chrono::DateTime::<Utc>::MAX_UTC);
        assert_eq!(receipt.next_by_address, at(180));

        match engine.claim("s1", &addr("10.0.0.2"), at(1)).unwrap_err() {
            ClaimError::TooSoon { blocking, retry_at, .. } => {
                assert_eq!(blocking, Blocking::Session);
                assert_eq!(retry_at, chrono::DateTime::<Utc>::MAX_UTC);
            }
            other => panic!("expected TooSoon, got {other:?}"),
        }
    }

    #[test]
    fn same_address_new_session_blocked_on_address() {
        let (engine, _) = engine_with(&["A", "B"]);
        engine.claim("s1", &addr("10.0.0.1"), t0()).unwrap();
        match engine.claim("s2", &addr("10.0.0.1"), at(1)).unwrap_err() {
            ClaimError::TooSoon { blocking, .. } => assert_eq!(blocking, Blocking::Address),
            other => panic!("expected TooSoon, got {other:?}"),
        }
    }

    #[test]
    fn same_session_new_address_blocked_on_session() {
        let (engine, _) = engine_with(&["A", "B"]);
        engine.claim("s1", &addr("10.0.0.1"), t0()).unwrap();
        match engine.claim("s1", &addr("10.0.0.2"), at(60)).unwrap_err() {
            ClaimError::TooSoon { blocking, retry_at, .. } => {
                assert_eq!(blocking, Blocking::Session);
                assert_eq!(retry_at, at(120));
            }
            other => panic!("expected TooSoon, got {other:?}"),
        }
        // Outside the session window the new address is clear.
        assert_eq!(engine.claim("s1", &addr("10.0.0.2"), at(121)).unwrap().coupon_code, "B");
    }

    #[test]
    fn mapped_ipv4_shares_address_cooldown() {
        let (engine, _) = engine_with(&["A", "B"]);
        engine.claim("s1", &addr("192.0.2.4"), t0()).unwrap();
        assert!(matches!(
            engine.claim("s2", &addr("::ffff:192.0.2.4"), at(5)),
            Err(ClaimError::TooSoon { blocking: Blocking::Address, .. })
        ));
    }

    #[test]
    fn empty_pool_is_no_supply_not_too_soon() {
        let (engine, _) = engine_with(&[]);
        assert_eq!(engine.claim("s1", &addr("1.1.1.1"), t0()).unwrap_err(), ClaimError::NoSupply);
    }

    #[test]
    fn inactive_coupons_never_allocated() {
        let (engine, store) = engine_with(&["A", "B"]);
        store.toggle_active("A").unwrap();
        assert_eq!(engine.claim("s1", &addr("1.1.1.1"), t0()).unwrap().coupon_code, "B");
        assert_eq!(engine.claim("s2", &addr("2.2.2.2"), t0()).unwrap_err(), ClaimError::NoSupply);
    }

    #[test]
    fn eligibility_check_is_read_only() {
        let (engine, store) = engine_with(&["A"]);
        engine.claim("s1", &addr("1.1.1.1"), t0()).unwrap();

        let first = engine.check_eligibility("s1", &addr("1.1.1.1"), at(30)).unwrap();
        for _ in 0..5 {
            assert_eq!(engine.check_eligibility("s1", &addr("1.1.1.1"), at(30)).unwrap(), first);
        }
        assert!(!first.eligible);
        assert_eq!(first.next_by_session, Some(at(120)));
        assert_eq!(first.next_by_address, Some(at(180)));
        assert_eq!(store.claim_count(), 1);
    }

    #[test]
    fn eligible_after_both_windows() {
        let (engine, _) = engine_with(&["A"]);
        engine.claim("s1", &addr("1.1.1.1"), t0()).unwrap();
        let e = engine.check_eligibility("s1", &addr("1.1.1.1"), at(180)).unwrap();
        assert!(e.eligible);
        let e = engine.check_eligibility("s1", &addr("1.1.1.1"), at(181)).unwrap();
        assert_eq!(e, Eligibility { eligible: true, next_by_session: None, next_by_address: None });
    }

    #[test]
    fn last_claim_follows_session() {
        let (engine, _) = engine_with(&["A", "B"]);
        assert!(engine.last_claim("s1").unwrap().is_none());
        engine.claim("s1", &addr("1.1.1.1"), t0()).unwrap();
        engine.claim("s1", &addr("2.2.2.2"), at(200)).unwrap();
        assert_eq!(engine.last_claim("s1").unwrap().unwrap().coupon_code, "B");
    }

    #[test]
    fn lost_race_retries_with_fresh_lookup() {
        let store = Arc::new(MemoryStore::new());
        let mut pool = MockCouponPool::new();
        let mut lookups = 0;
        pool.expect_find_available().times(2).returning(move || {
            lookups += 1;
            let code = if lookups == 1 { "A" } else { "B" };
            Ok(Some(Coupon::new(code, t0())))
        });
        pool.expect_mark_claimed().times(2).returning(|code, by, at| {
            if code == "A" {
                return Err(PoolError::Conflict(code.to_string()));
            }
            let mut c = Coupon::new(code, at);
            c.claim = Some(crate::types::CouponClaim { by: by.clone(), at });
            Ok(c)
        });

        let engine = ClaimEngine::new(Arc::new(pool), store.clone(), EngineConfig::default());
        let receipt = engine.claim("s1", &addr("1.1.1.1"), t0()).unwrap();
        assert_eq!(receipt.coupon_code, "B");
        assert_eq!(store.claim_count(), 1);
    }

    #[test]
    fn exhausted_retries_surface_as_no_supply() {
        let store = Arc::new(MemoryStore::new());
        let mut pool = MockCouponPool::new();
        pool.expect_find_available()
            .times(3)
            .returning(|| Ok(Some(Coupon::new("A", t0()))));
        pool.expect_mark_claimed()
            .times(3)
            .returning(|code, _, _| Err(PoolError::Conflict(code.to_string())));

        let config = EngineConfig { max_reserve_attempts: 3, ..EngineConfig::default() };
        let engine = ClaimEngine::new(Arc::new(pool), store.clone(), config);
        assert_eq!(engine.claim("s1", &addr("1.1.1.1"), t0()).unwrap_err(), ClaimError::NoSupply);
        assert_eq!(store.claim_count(), 0);
    }

    #[test]
    fn pool_storage_failure_propagates() {
        let store = Arc::new(MemoryStore::new());
        let mut pool = MockCouponPool::new();
        pool.expect_find_available()
            .returning(|| Err(StoreError::Storage("io".into())));
        let engine = ClaimEngine::new(Arc::new(pool), store, EngineConfig::default());
        assert_eq!(
            engine.claim("s1", &addr("1.1.1.1"), t0()).unwrap_err(),
            ClaimError::Store(StoreError::Storage("io".into()))
        );
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let store = Arc::new(MemoryStore::with_coupons(["A"], t0()).unwrap());
        let config = EngineConfig { max_reserve_attempts: 0, ..EngineConfig::default() };
        let engine = ClaimEngine::new(store.clone(), store, config);
        assert_eq!(engine.claim("s1", &addr("1.1.1.1"), t0()).unwrap().coupon_code, "A");
    }
}
