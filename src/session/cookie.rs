//! Cookie header parsing and the chunked auth-token cookie format.
//!
//! The identity provider stores its session as `base64-<payload>` where the
//! payload is base64 of the token JSON. Payloads longer than
//! [`MAX_COOKIE_CHUNK`] characters are split across `<name>.0` and `<name>.1`.

use base64::alphabet;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use serde_json::Value;
use thiserror::Error;

pub const AUTH_TOKEN_PREFIX: &str = "base64-";
pub const MAX_COOKIE_CHUNK: usize = 3000;

/// Attribute names that may appear as `name=value` pairs but are not cookies.
pub const COOKIE_ATTRIBUTES: [&str; 9] = [
    "path", "domain", "expires", "max-age", "samesite", "httponly", "secure", "priority",
    "version",
];

const ANALYTICS_PREFIX: &str = "_ga";

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("auth token cookie not present")]
    MissingAuthToken,
    #[error("auth token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("auth token is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("auth token has no refresh_token")]
    MissingRefreshToken,
}

/// Ordered `name=value` pairs of a `Cookie` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    entries: Vec<(String, String)>,
}

impl CookieJar {
    pub fn parse(header: &str) -> Self {
        let mut jar = Self::default();
        for part in header.split(';') {
            if let Some((name, value)) = split_pair(part) {
                jar.set(name, value);
            }
        }
        jar
    }

    /// Collect the cookie pair from each `Set-Cookie` header line.
    pub fn from_set_cookies<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut jar = Self::default();
        for line in lines {
            let first = line.as_ref().split(';').next().unwrap_or_default();
            if let Some((name, value)) = split_pair(first) {
                jar.set(name, value);
            }
        }
        jar
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Insert or replace, keeping the original position of an existing name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Overlay `other` onto this jar; returns whether anything changed.
    pub fn merge(&mut self, other: &CookieJar) -> bool {
        let mut changed = false;
        for (name, value) in other.iter() {
            if self.get(name) != Some(value) {
                self.set(name, value);
                changed = true;
            }
        }
        changed
    }

    /// Analytics cookies that must survive a rebuild of the auth cookie.
    pub fn analytics(&self) -> CookieJar {
        CookieJar {
            entries: self
                .entries
                .iter()
                .filter(|(name, _)| name.starts_with(ANALYTICS_PREFIX))
                .cloned()
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn to_header(&self) -> String {
        self.entries
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn split_pair(part: &str) -> Option<(&str, &str)> {
    let (name, value) = part.trim().split_once('=')?;
    let name = name.trim();
    if name.is_empty() || is_attribute(name) {
        return None;
    }
    Some((name, value.trim()))
}

fn is_attribute(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    COOKIE_ATTRIBUTES.contains(&lower.as_str())
}

/// Naming of the identity provider's auth cookie for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCookie {
    base_name: String,
}

impl AuthCookie {
    pub fn for_project(project: &str) -> Self {
        Self {
            base_name: format!("sb-{project}-auth-token"),
        }
    }

    pub fn chunk_name(&self, index: usize) -> String {
        format!("{}.{}", self.base_name, index)
    }

    /// Concatenated chunk values, or `None` when the first chunk is absent.
    pub fn payload(&self, jar: &CookieJar) -> Option<String> {
        let first = jar.get(&self.chunk_name(0)).filter(|v| !v.is_empty())?;
        let second = jar.get(&self.chunk_name(1)).unwrap_or_default();
        Some(format!("{first}{second}"))
    }

    pub fn decode_token(&self, jar: &CookieJar) -> Result<Value, CookieError> {
        let payload = self.payload(jar).ok_or(CookieError::MissingAuthToken)?;
        decode_payload(&payload)
    }

    pub fn refresh_token(&self, jar: &CookieJar) -> Result<String, CookieError> {
        self.decode_token(jar)?
            .get("refresh_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or(CookieError::MissingRefreshToken)
    }

    /// Cookie header carrying `token`, chunked if needed, after the preserved analytics fields.
    pub fn rebuild(&self, analytics: &CookieJar, token: &Value) -> String {
        let encoded = encode_payload(token);
        let (first, second) = split_chunks(&encoded);

        let mut jar = analytics.clone();
        jar.set(self.chunk_name(0), first);
        if let Some(second) = second {
            jar.set(self.chunk_name(1), second);
        }
        jar.to_header()
    }
}

/// `(4 - n % 4) % 4`: never adds a full block of padding.
pub fn padding_needed(len: usize) -> usize {
    (4 - len % 4) % 4
}

pub fn decode_payload(payload: &str) -> Result<Value, CookieError> {
    let raw = payload.strip_prefix(AUTH_TOKEN_PREFIX).unwrap_or(payload);
    let normalized: String = raw
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    let padded = format!("{}{}", normalized, "=".repeat(padding_needed(normalized.len())));
    let text = match STANDARD.decode(padded.as_bytes()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
            tracing::debug!(error = %err, len = raw.len(), "Strict decode failed, retrying leniently");
            decode_lenient(&normalized)?
        }
    };
    Ok(serde_json::from_str(&text)?)
}

/// Drop characters outside the alphabet and decode whatever remains.
fn decode_lenient(raw: &str) -> Result<String, CookieError> {
    let mut cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '+' || *c == '/')
        .collect();
    if cleaned.len() % 4 == 1 {
        cleaned.pop();
    }
    let bytes = LENIENT.decode(cleaned.as_bytes())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// `base64-` followed by unpadded base64 of the compact JSON.
pub fn encode_payload(token: &Value) -> String {
    format!(
        "{}{}",
        AUTH_TOKEN_PREFIX,
        STANDARD_NO_PAD.encode(token.to_string().as_bytes())
    )
}

pub fn split_chunks(encoded: &str) -> (&str, Option<&str>) {
    if encoded.len() <= MAX_COOKIE_CHUNK {
        (encoded, None)
    } else {
        let (first, second) = encoded.split_at(MAX_COOKIE_CHUNK);
        (first, Some(second))
    }
}
