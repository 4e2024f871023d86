//! Domain types: coupons, claim records, session keys, and client addresses.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address;
use crate::constants::{MAX_COUPON_CODE_LEN, MAX_SESSION_KEY_LEN};

/// Wall-clock instant used for every claim and cooldown computation.
pub type Timestamp = DateTime<Utc>;

/// Opaque per-client session key.
///
/// Compared by equality only. The engine never treats it as proof of
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Parse a presented session key. Returns `None` when the key is empty
    /// (after trimming) or implausibly long.
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim();
        if key.is_empty() || key.len() > MAX_SESSION_KEY_LEN {
            return None;
        }
        Some(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical client network address.
///
/// Two requests from the same client compare equal no matter whether they
/// arrived over IPv4, as an IPv4-mapped IPv6 address, or via loopback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientAddress(String);

impl ClientAddress {
    /// Canonical address for an IP.
    pub fn from_ip(ip: IpAddr) -> Self {
        Self(address::canonical_ip(ip).to_string())
    }

    /// Parse an address string. IP literals are canonicalized; any other
    /// non-empty value is kept verbatim (trimmed, lowercased) so callers with
    /// their own addressing scheme still get stable equality.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        Some(match address::parse_ip(raw) {
            Some(ip) => Self::from_ip(ip),
            None => Self(raw.to_ascii_lowercase()),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<IpAddr> for ClientAddress {
    fn from(ip: IpAddr) -> Self {
        Self::from_ip(ip)
    }
}

impl fmt::Display for ClientAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who claimed a coupon, and when. Present exactly when the coupon is
/// claimed, so a claimed coupon can never lack either field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponClaim {
    pub by: ClientAddress,
    pub at: Timestamp,
}

/// A single-use coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    /// Unique, immutable code.
    pub code: String,
    /// Admin-controlled. Inactive coupons are never allocated.
    pub active: bool,
    /// Set once by the engine; never cleared.
    pub claim: Option<CouponClaim>,
    pub created_at: Timestamp,
}

impl Coupon {
    /// A fresh active, unclaimed coupon.
    pub fn new(code: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            code: code.into(),
            active: true,
            claim: None,
            created_at,
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.claim.is_some()
    }

    /// Active and unclaimed.
    pub fn is_available(&self) -> bool {
        self.active && self.claim.is_none()
    }
}

/// Validate and normalize an admin-supplied coupon code.
///
/// Codes are trimmed; empty codes, codes longer than
/// [`MAX_COUPON_CODE_LEN`], and codes containing whitespace or control
/// characters are rejected.
pub fn normalize_code(raw: &str) -> Option<String> {
    let code = raw.trim();
    if code.is_empty()
        || code.len() > MAX_COUPON_CODE_LEN
        || code.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return None;
    }
    Some(code.to_string())
}

/// One ledger entry. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub coupon_code: String,
    pub address: ClientAddress,
    pub session: SessionKey,
    pub claimed_at: Timestamp,
}

/// Successful claim result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub coupon_code: String,
    pub claimed_at: Timestamp,
    /// `claimed_at` plus the session window.
    pub next_by_session: Timestamp,
    /// `claimed_at` plus the address window.
    pub next_by_address: Timestamp,
}

/// Pool counts for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub claimed: usize,
    pub inactive: usize,
}

impl PoolStats {
    /// Tally a set of coupons.
    pub fn tally<'a>(coupons: impl IntoIterator<Item = &'a Coupon>) -> Self {
        coupons.into_iter().fold(Self::default(), |mut stats, c| {
            stats.total += 1;
            if c.is_claimed() {
                stats.claimed += 1;
            } else if c.active {
                stats.available += 1;
            } else {
                stats.inactive += 1;
            }
            stats
        })
    }
}
