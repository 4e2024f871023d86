//! Engine defaults. Every value here can be overridden through configuration.

/// Default session cooldown window, in seconds.
pub const DEFAULT_SESSION_COOLDOWN_SECS: i64 = 120;

/// Default address cooldown window, in seconds.
pub const DEFAULT_ADDRESS_COOLDOWN_SECS: i64 = 180;

/// How many times a claim re-runs the pool lookup after losing a
/// reservation race before it gives up with `NoSupply`.
pub const DEFAULT_MAX_RESERVE_ATTEMPTS: u32 = 8;

/// Longest coupon code accepted by the admin surface.
pub const MAX_COUPON_CODE_LEN: usize = 64;

/// Longest session key the engine accepts. Anything longer is treated as
/// garbage and rejected like a missing session.
pub const MAX_SESSION_KEY_LEN: usize = 256;

/// Longest cooldown window accepted from configuration (ten years).
pub const MAX_COOLDOWN_SECS: i64 = 10 * 365 * 24 * 60 * 60;
