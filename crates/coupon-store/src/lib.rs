//! # coupon-store: RocksDB-backed coupon pool and claim ledger.
//!
//! - [`storage::RocksStore`]: implements [`CouponPool`](coupon_core::CouponPool)
//!   and [`ClaimLedger`](coupon_core::ClaimLedger) on a RocksDB
//!   `TransactionDB`, using row locks for the conditional claim write

pub mod storage;

pub use storage::RocksStore;
