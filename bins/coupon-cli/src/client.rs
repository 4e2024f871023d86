//! HTTP client for the coupon-server admin API.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use coupon_core::{ClaimRecord, Coupon};

pub struct AdminClient {
    client: Client,
    server: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServerStatus {
    pub coupons_total: usize,
    pub coupons_available: usize,
    pub coupons_claimed: usize,
    pub coupons_inactive: usize,
    pub session_cooldown_secs: i64,
    pub address_cooldown_secs: i64,
}

#[derive(Deserialize)]
struct CouponList {
    coupons: Vec<Coupon>,
}

#[derive(Deserialize)]
struct CouponEnvelope {
    coupon: Coupon,
}

#[derive(Deserialize)]
struct ClaimList {
    claims: Vec<ClaimRecord>,
}

impl AdminClient {
    pub fn new(server: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            server: server.trim_end_matches('/').to_owned(),
            token,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.server, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let token = self
            .token
            .as_deref()
            .context("Admin token required: pass --token or set COUPON_ADMIN_TOKEN")?;
        Ok(self
            .client
            .request(method, self.url(path))
            .bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = req.send().await.context("Request to coupon-server failed")?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        debug!(%status, "coupon-server response");

        if !status.is_success() {
            let msg = body["error"].as_str().unwrap_or("no error message");
            bail!("coupon-server returned {status}: {msg}");
        }
        serde_json::from_value(body).context("Unexpected response body")
    }

    // ── Admin API ─────────────────────────────────────────────────────────────

    pub async fn list_coupons(&self) -> Result<Vec<Coupon>> {
        let req = self.request(Method::GET, "/api/admin/coupons")?;
        let list: CouponList = self.send(req).await?;
        Ok(list.coupons)
    }

    pub async fn add_coupon(&self, code: &str) -> Result<Coupon> {
        let req = self
            .request(Method::POST, "/api/admin/coupons")?
            .json(&json!({ "code": code }));
        let env: CouponEnvelope = self.send(req).await?;
        Ok(env.coupon)
    }

    pub async fn toggle_coupon(&self, code: &str) -> Result<Coupon> {
        let path = format!("/api/admin/coupons/{code}/toggle");
        let req = self.request(Method::PUT, &path)?;
        let env: CouponEnvelope = self.send(req).await?;
        Ok(env.coupon)
    }

    pub async fn list_claims(&self) -> Result<Vec<ClaimRecord>> {
        let req = self.request(Method::GET, "/api/admin/claims")?;
        let list: ClaimList = self.send(req).await?;
        Ok(list.claims)
    }

    /// Public status; no token needed.
    pub async fn status(&self) -> Result<ServerStatus> {
        let req = self.client.get(self.url("/api/status"));
        self.send(req).await
    }
}
