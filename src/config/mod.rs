mod env_file;
mod settings;

pub use env_file::{CredentialStore, EnvFileStore, StoreError};
pub use settings::{
    Config, ConfigError, AGENT_ID_KEY, API_KEY_KEY, API_KEY_PREFIX, AUTO_VOTE_KEY,
    BASE_URL_KEY, DEFAULT_BASE_URL, DEFAULT_SUPABASE_PROJECT, DELAY_KEY, MAX_BATTLES_KEY,
    ROUNDS_KEY, SESSION_COOKIE_KEY, SUPABASE_PROJECT_KEY,
};
