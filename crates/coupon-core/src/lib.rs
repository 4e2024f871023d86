//! # coupon-core
//! Claim eligibility and allocation engine for Coupon Drop.
//!
//! - [`engine::ClaimEngine`]: decides whether a (session, address) pair may
//!   claim and atomically hands out one coupon
//! - [`cooldown`]: next-eligible instants over the claim ledger
//! - [`traits`]: the [`CouponPool`](traits::CouponPool) and
//!   [`ClaimLedger`](traits::ClaimLedger) storage contracts
//! - [`memory::MemoryStore`]: in-process store for tests and ephemeral runs

pub mod address;
pub mod constants;
pub mod cooldown;
pub mod engine;
pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use cooldown::{Blocking, CooldownPolicy, CooldownStatus};
pub use engine::{ClaimEngine, Eligibility, EngineConfig};
pub use error::{ClaimError, LedgerError, PoolError, StoreError};
pub use memory::MemoryStore;
pub use traits::{ClaimLedger, CouponPool};
pub use types::{ClaimReceipt, ClaimRecord, ClientAddress, Coupon, CouponClaim, PoolStats, SessionKey, Timestamp};
