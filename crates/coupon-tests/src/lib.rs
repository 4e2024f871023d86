//! Integration test suite for Coupon Drop.
//!
//! Runs the claim engine against both the in-memory and RocksDB stores and
//! checks allocation and cooldown invariants under concurrent and randomized
//! inputs.

pub mod helpers;
