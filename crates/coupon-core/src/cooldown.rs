//! Cooldown evaluation over the claim ledger.
//!
//! Two independent sliding windows gate every claim: one keyed by session,
//! one keyed by client address. Each window slides from the *most recent*
//! matching claim, and a claimant is eligible only when both windows have
//! cleared.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ADDRESS_COOLDOWN_SECS, DEFAULT_SESSION_COOLDOWN_SECS};
use crate::error::StoreError;
use crate::traits::ClaimLedger;
use crate::types::{ClientAddress, SessionKey, Timestamp};

/// Window lengths for the two cooldown dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub session_window: Duration,
    pub address_window: Duration,
}

impl CooldownPolicy {
    pub fn new(session_window: Duration, address_window: Duration) -> Self {
        Self { session_window, address_window }
    }

    /// Windows given in whole seconds. Negative values are clamped to zero,
    /// values beyond [`Duration::MAX`] saturate.
    pub fn from_secs(session_secs: i64, address_secs: i64) -> Self {
        Self::new(window_from_secs(session_secs), window_from_secs(address_secs))
    }
}

fn window_from_secs(secs: i64) -> Duration {
    Duration::try_seconds(secs.max(0)).unwrap_or(Duration::MAX)
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self::from_secs(DEFAULT_SESSION_COOLDOWN_SECS, DEFAULT_ADDRESS_COOLDOWN_SECS)
    }
}

/// Which cooldown dimension(s) block a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Blocking {
    Session,
    Address,
    Both,
}

impl Blocking {
    pub fn includes_session(self) -> bool {
        matches!(self, Blocking::Session | Blocking::Both)
    }

    pub fn includes_address(self) -> bool {
        matches!(self, Blocking::Address | Blocking::Both)
    }
}

impl fmt::Display for Blocking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Blocking::Session => f.write_str("session"),
            Blocking::Address => f.write_str("address"),
            Blocking::Both => f.write_str("session and address"),
        }
    }
}

/// `last_claim + window`, or `None` when there is no claim inside the
/// window ending at `now`.
///
/// A claim exactly `window` ago still counts (the result equals `now`, which
/// is already eligible).
pub fn next_eligible(last_claim: Option<Timestamp>, window: Duration, now: Timestamp) -> Option<Timestamp> {
    let next = window_end(last_claim?, window);
    (next >= now).then_some(next)
}

/// `start + window`, saturating at the latest representable instant.
pub fn window_end(start: Timestamp, window: Duration) -> Timestamp {
    start
        .checked_add_signed(window)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Time left until `next`, never negative.
pub fn remaining(next: Option<Timestamp>, now: Timestamp) -> Duration {
    match next {
        Some(next) if next > now => next - now,
        _ => Duration::zero(),
    }
}

/// Next-eligible instants for both dimensions at some `now`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownStatus {
    pub next_by_session: Option<Timestamp>,
    pub next_by_address: Option<Timestamp>,
}

impl CooldownStatus {
    fn blocks(next: Option<Timestamp>, now: Timestamp) -> bool {
        next.is_some_and(|t| t > now)
    }

    /// Drop window ends already behind `now`.
    pub fn pending_at(self, now: Timestamp) -> Self {
        Self {
            next_by_session: self.next_by_session.filter(|t| *t >= now),
            next_by_address: self.next_by_address.filter(|t| *t >= now),
        }
    }

    /// Which dimensions are still cooling down at `now`.
    pub fn blocking(&self, now: Timestamp) -> Option<Blocking> {
        match (
            Self::blocks(self.next_by_session, now),
            Self::blocks(self.next_by_address, now),
        ) {
            (true, true) => Some(Blocking::Both),
            (true, false) => Some(Blocking::Session),
            (false, true) => Some(Blocking::Address),
            (false, false) => None,
        }
    }

    /// Both windows clear at `now`.
    pub fn is_eligible(&self, now: Timestamp) -> bool {
        self.blocking(now).is_none()
    }

    /// Earliest instant at which every blocking dimension has cleared, or
    /// `None` if nothing blocks at `now`.
    pub fn retry_at(&self, now: Timestamp) -> Option<Timestamp> {
        [self.next_by_session, self.next_by_address]
            .into_iter()
            .flatten()
            .filter(|t| *t > now)
            .max()
    }

    pub fn remaining_session(&self, now: Timestamp) -> Duration {
        remaining(self.next_by_session, now)
    }

    pub fn remaining_address(&self, now: Timestamp) -> Duration {
        remaining(self.next_by_address, now)
    }
}

/// Read-only cooldown queries against a [`ClaimLedger`].
pub struct CooldownEvaluator<'a> {
    ledger: &'a dyn ClaimLedger,
    policy: CooldownPolicy,
}

impl<'a> CooldownEvaluator<'a> {
    pub fn new(ledger: &'a dyn ClaimLedger, policy: CooldownPolicy) -> Self {
        Self { ledger, policy }
    }

    /// Session window end after the session's most recent claim.
    pub fn next_eligible_by_session(
        &self,
        session: &SessionKey,
        now: Timestamp,
    ) -> Result<Option<Timestamp>, StoreError> {
        let last = self.ledger.latest_by_session(session)?.map(|r| r.claimed_at);
        Ok(next_eligible(last, self.policy.session_window, now))
    }

    /// Address window end after the address's most recent claim.
    pub fn next_eligible_by_address(
        &self,
        address: &ClientAddress,
        now: Timestamp,
    ) -> Result<Option<Timestamp>, StoreError> {
        let last = self.ledger.latest_by_address(address)?.map(|r| r.claimed_at);
        Ok(next_eligible(last, self.policy.address_window, now))
    }

    /// Both dimensions at once.
    pub fn evaluate(
        &self,
        session: &SessionKey,
        address: &ClientAddress,
        now: Timestamp,
    ) -> Result<CooldownStatus, StoreError> {
        Ok(self.window_ends(session, address)?.pending_at(now))
    }

    /// Window ends after the most recent claim on each dimension, whether or
    /// not they have passed. `None` only where there is no claim at all.
    pub fn window_ends(
        &self,
        session: &SessionKey,
        address: &ClientAddress,
    ) -> Result<CooldownStatus, StoreError> {
        let last_session = self.ledger.latest_by_session(session)?.map(|r| r.claimed_at);
        let last_address = self.ledger.latest_by_address(address)?.map(|r| r.claimed_at);
        Ok(CooldownStatus {
            next_by_session: last_session.map(|t| window_end(t, self.policy.session_window)),
            next_by_address: last_address.map(|t| window_end(t, self.policy.address_window)),
        })
    }
}
