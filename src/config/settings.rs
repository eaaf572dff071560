use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://moltarena.crosstoken.io";
pub const DEFAULT_SUPABASE_PROJECT: &str = "hkxnuxudaopdpmlcfqjf";
pub const API_KEY_PREFIX: &str = "pk_live_";

pub const AGENT_ID_KEY: &str = "MOLT_AGENT_ID";
pub const API_KEY_KEY: &str = "MOLT_API_KEY";
pub const DELAY_KEY: &str = "MOLT_DELAY_SECONDS";
pub const MAX_BATTLES_KEY: &str = "MOLT_MAX_BATTLES";
pub const ROUNDS_KEY: &str = "MOLT_ROUNDS";
pub const AUTO_VOTE_KEY: &str = "MOLT_AUTO_VOTE";
pub const SESSION_COOKIE_KEY: &str = "MOLT_SESSION_COOKIE";
pub const BASE_URL_KEY: &str = "MOLT_BASE_URL";
pub const SUPABASE_PROJECT_KEY: &str = "MOLT_SUPABASE_PROJECT";

const DEFAULT_DELAY_SECS: u64 = 600;
const DEFAULT_ROUNDS: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
    #[error("{key} must be a non-negative integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Bot configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Agent that creates battles and receives votes
    pub agent_id: String,
    /// Bearer key for battle creation
    pub api_key: String,
    /// Pause between battles
    pub cooldown: Duration,
    /// Battle ceiling (0 = run until stopped)
    pub max_battles: u32,
    /// Rounds per battle
    pub rounds: u32,
    pub auto_vote: bool,
    /// Browser session cookie used for voting
    pub session_cookie: Option<String>,
    /// Arena site root, without trailing slash
    pub base_url: String,
    /// Identity provider project reference
    pub supabase_project: String,
    /// `.env` file refreshed cookies are written back to
    pub env_path: PathBuf,
}

impl Config {
    /// Load `.env` (if present) into the process environment, then read settings from it.
    pub fn load(env_path: &Path) -> Result<Self, ConfigError> {
        if let Err(source) = dotenvy::from_path(env_path) {
            if !source.not_found() {
                return Err(ConfigError::EnvFile {
                    path: env_path.to_path_buf(),
                    source,
                });
            }
            tracing::debug!(path = %env_path.display(), "No .env file, using process environment");
        }
        Self::from_lookup(|key| std::env::var(key).ok(), env_path)
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F, env_path: &Path) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let session_cookie = text(SESSION_COOKIE_KEY)
            .map(|value| value.trim_matches('"').to_string())
            .filter(|value| !value.is_empty());

        Ok(Self {
            agent_id: text(AGENT_ID_KEY).unwrap_or_default(),
            api_key: text(API_KEY_KEY).unwrap_or_default(),
            cooldown: Duration::from_secs(parse_number(DELAY_KEY, text(DELAY_KEY), DEFAULT_DELAY_SECS)?),
            max_battles: parse_number(MAX_BATTLES_KEY, text(MAX_BATTLES_KEY), 0)?,
            rounds: parse_number(ROUNDS_KEY, text(ROUNDS_KEY), DEFAULT_ROUNDS)?,
            auto_vote: text(AUTO_VOTE_KEY)
                .map(|value| parse_flag(&value))
                .unwrap_or(true),
            session_cookie,
            base_url: text(BASE_URL_KEY)
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            supabase_project: text(SUPABASE_PROJECT_KEY)
                .unwrap_or_else(|| DEFAULT_SUPABASE_PROJECT.to_string()),
            env_path: env_path.to_path_buf(),
        })
    }

    /// Check required settings, reporting every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.agent_id.is_empty() {
            problems.push(format!("{AGENT_ID_KEY} is not set"));
        }
        if self.api_key.is_empty() {
            problems.push(format!(
                "{API_KEY_KEY} is not set (generate one at {}/settings/api)",
                self.base_url
            ));
        } else if !self.api_key.starts_with(API_KEY_PREFIX) {
            problems.push(format!("{API_KEY_KEY} must start with '{API_KEY_PREFIX}'"));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Whether votes can be cast at all
    pub fn voting_enabled(&self) -> bool {
        self.auto_vote && self.session_cookie.is_some()
    }

    pub fn identity_url(&self) -> String {
        format!("https://{}.supabase.co", self.supabase_project)
    }

    /// API key with the middle elided, for the startup banner
    pub fn masked_api_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 18 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..14].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

fn parse_number<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(value.to_lowercase().as_str(), "0" | "false" | "no")
}
