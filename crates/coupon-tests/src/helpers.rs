//! Shared helpers for the integration tests.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use coupon_core::{
    ClaimEngine, ClaimLedger, ClientAddress, CooldownPolicy, CouponPool, EngineConfig,
    MemoryStore, Timestamp,
};
use coupon_store::RocksStore;

/// Fixed epoch for deterministic tests.
pub fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// `t0() + secs`.
pub fn at(secs: i64) -> Timestamp {
    t0() + Duration::seconds(secs)
}

pub fn addr(s: &str) -> ClientAddress {
    ClientAddress::parse(s).unwrap()
}

/// Engine config with the given windows in seconds.
pub fn config(session_secs: i64, address_secs: i64) -> EngineConfig {
    EngineConfig {
        policy: CooldownPolicy::from_secs(session_secs, address_secs),
        ..EngineConfig::default()
    }
}

/// A backend under test: an engine plus direct handles on its store.
pub struct Harness {
    pub engine: Arc<ClaimEngine>,
    pub pool: Arc<dyn CouponPool>,
    pub ledger: Arc<dyn ClaimLedger>,
    /// Keeps the RocksDB directory alive for the harness lifetime.
    _dir: Option<TempDir>,
}

impl Harness {
    fn build<S>(store: Arc<S>, codes: &[&str], config: EngineConfig, dir: Option<TempDir>) -> Self
    where
        S: CouponPool + ClaimLedger + 'static,
    {
        for (i, code) in codes.iter().enumerate() {
            store.insert(code, t0() - Duration::seconds((codes.len() - i) as i64)).unwrap();
        }
        let pool: Arc<dyn CouponPool> = store.clone();
        let ledger: Arc<dyn ClaimLedger> = store;
        let engine = Arc::new(ClaimEngine::new(pool.clone(), ledger.clone(), config));
        Self {
            engine,
            pool,
            ledger,
            _dir: dir,
        }
    }

    /// Engine over a [`MemoryStore`] seeded with `codes` in order.
    pub fn memory(codes: &[&str], config: EngineConfig) -> Self {
        Self::build(Arc::new(MemoryStore::new()), codes, config, None)
    }

    /// Engine over a fresh temporary [`RocksStore`] seeded with `codes` in order.
    pub fn rocks(codes: &[&str], config: EngineConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RocksStore::open(dir.path().join("coupons")).unwrap());
        Self::build(store, codes, config, Some(dir))
    }

    /// Both backends, labelled for assertion messages.
    pub fn all(codes: &[&str], config: EngineConfig) -> Vec<(&'static str, Self)> {
        vec![
            ("memory", Self::memory(codes, config)),
            ("rocks", Self::rocks(codes, config)),
        ]
    }
}

/// `count` distinct coupon codes.
pub fn codes(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("CODE{i:04}")).collect()
}
