//! Server configuration loaded from environment variables.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use coupon_core::constants::{
    DEFAULT_ADDRESS_COOLDOWN_SECS, DEFAULT_MAX_RESERVE_ATTEMPTS, DEFAULT_SESSION_COOLDOWN_SECS,
    MAX_COOLDOWN_SECS,
};
use coupon_core::{CooldownPolicy, EngineConfig};

#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server.
    pub bind_addr: String,
    /// Root directory for the RocksDB database.
    pub data_dir: PathBuf,
    /// Keep all state in memory instead of RocksDB.
    pub ephemeral: bool,
    /// Cooldown after a claim, per session, in seconds.
    pub session_cooldown_secs: i64,
    /// Cooldown after a claim, per client address, in seconds.
    pub address_cooldown_secs: i64,
    /// Reservation attempts per claim before reporting no supply.
    pub max_reserve_attempts: u32,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_proxy_headers: bool,
    /// Bearer token for the admin routes. Admin routes are disabled when unset.
    pub admin_token: Option<String>,
    /// Coupon codes inserted at startup if not already present.
    pub seed_codes: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            data_dir: default_data_dir(),
            ephemeral: false,
            session_cooldown_secs: DEFAULT_SESSION_COOLDOWN_SECS,
            address_cooldown_secs: DEFAULT_ADDRESS_COOLDOWN_SECS,
            max_reserve_attempts: DEFAULT_MAX_RESERVE_ATTEMPTS,
            trust_proxy_headers: true,
            admin_token: None,
            seed_codes: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let bind_addr = lookup("COUPON_BIND_ADDR").unwrap_or(defaults.bind_addr);
        let data_dir = lookup("COUPON_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let ephemeral = match lookup("COUPON_EPHEMERAL") {
            Some(v) => parse_bool(&v).context("COUPON_EPHEMERAL must be a boolean")?,
            None => defaults.ephemeral,
        };

        let session_cooldown_secs: i64 = match lookup("COUPON_SESSION_COOLDOWN_SECS") {
            Some(v) => v
                .trim()
                .parse()
                .context("COUPON_SESSION_COOLDOWN_SECS must be a non-negative integer")?,
            None => defaults.session_cooldown_secs,
        };
        if !(0..=MAX_COOLDOWN_SECS).contains(&session_cooldown_secs) {
            bail!("COUPON_SESSION_COOLDOWN_SECS must be between 0 and {MAX_COOLDOWN_SECS}");
        }

        let address_cooldown_secs: i64 = match lookup("COUPON_ADDRESS_COOLDOWN_SECS") {
            Some(v) => v
                .trim()
                .parse()
                .context("COUPON_ADDRESS_COOLDOWN_SECS must be a non-negative integer")?,
            None => defaults.address_cooldown_secs,
        };
        if !(0..=MAX_COOLDOWN_SECS).contains(&address_cooldown_secs) {
            bail!("COUPON_ADDRESS_COOLDOWN_SECS must be between 0 and {MAX_COOLDOWN_SECS}");
        }

        let max_reserve_attempts: u32 = match lookup("COUPON_MAX_RESERVE_ATTEMPTS") {
            Some(v) => v
                .trim()
                .parse()
                .context("COUPON_MAX_RESERVE_ATTEMPTS must be a positive integer")?,
            None => defaults.max_reserve_attempts,
        };
        if max_reserve_attempts == 0 {
            bail!("COUPON_MAX_RESERVE_ATTEMPTS must be a positive integer");
        }

        let trust_proxy_headers = match lookup("COUPON_TRUST_PROXY_HEADERS") {
            Some(v) => parse_bool(&v).context("COUPON_TRUST_PROXY_HEADERS must be a boolean")?,
            None => defaults.trust_proxy_headers,
        };

        let admin_token = lookup("COUPON_ADMIN_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let seed_codes = lookup("COUPON_SEED_CODES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            bind_addr,
            data_dir,
            ephemeral,
            session_cooldown_secs,
            address_cooldown_secs,
            max_reserve_attempts,
            trust_proxy_headers,
            admin_token,
            seed_codes,
        })
    }

    /// Path to the RocksDB coupon database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("coupons")
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            policy: CooldownPolicy::from_secs(self.session_cooldown_secs, self.address_cooldown_secs),
            max_reserve_attempts: self.max_reserve_attempts,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("coupon-drop")
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("not a boolean: {other}"),
    }
}
