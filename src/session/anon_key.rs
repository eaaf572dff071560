//! Discovery of the identity provider's public anon key.
//!
//! The key is embedded in the arena's frontend bundle as an HS256 JWT whose
//! payload carries `role: "anon"`. Scraping is best-effort; a missing key only
//! disables structured refresh.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;

/// Base64 of `{"alg":"HS256","typ":"JWT"}`
pub const JWT_HEADER: &str = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9";
pub const ANON_ROLE: &str = "anon";
pub const EXPECTED_ISSUER: &str = "supabase";

const PAGE_TIMEOUT: Duration = Duration::from_secs(15);

const JWT_SEGMENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Source of the anon key required by the token-refresh endpoint.
#[async_trait]
pub trait AnonKeyDiscovery: Send + Sync {
    async fn discover(&self) -> Option<String>;
}

/// Finds the key by fetching the arena landing page and scanning it for JWTs.
pub struct PageScrapeDiscovery {
    client: Client,
    page_url: String,
    issuer: String,
}

impl PageScrapeDiscovery {
    pub fn new(client: Client, page_url: impl Into<String>) -> Self {
        Self {
            client,
            page_url: page_url.into(),
            issuer: EXPECTED_ISSUER.to_string(),
        }
    }
}

#[async_trait]
impl AnonKeyDiscovery for PageScrapeDiscovery {
    async fn discover(&self) -> Option<String> {
        tracing::debug!(url = %self.page_url, "Looking for identity anon key");
        let response = match self
            .client
            .get(&self.page_url)
            .timeout(PAGE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(error = %error, "Failed to fetch page for anon key discovery");
                return None;
            }
        };
        let html = match response.text().await {
            Ok(text) => text,
            Err(error) => {
                tracing::debug!(error = %error, "Failed to read page for anon key discovery");
                return None;
            }
        };

        let key = find_anon_key(&html, &self.issuer);
        if key.is_none() {
            tracing::warn!("Identity anon key not found; only session ping refresh is available");
        }
        key
    }
}

fn jwt_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(&format!(
                r"{}\.[A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]+",
                regex::escape(JWT_HEADER)
            ))
            .ok()
        })
        .as_ref()
}

/// First JWT in `text` whose payload has the anon role and the given issuer.
pub fn find_anon_key(text: &str, issuer: &str) -> Option<String> {
    jwt_pattern()?
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|jwt| {
            jwt_claims(jwt).is_some_and(|claims| {
                claims.get("role").and_then(Value::as_str) == Some(ANON_ROLE)
                    && claims.get("iss").and_then(Value::as_str) == Some(issuer)
            })
        })
        .map(str::to_string)
}

fn jwt_claims(jwt: &str) -> Option<Value> {
    let payload = jwt.split('.').nth(1)?;
    let bytes = JWT_SEGMENT.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}
