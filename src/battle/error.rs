use thiserror::Error;

/// Conditions that end a battle cycle without an outcome.
#[derive(Debug, Error)]
pub enum BattleError {
    /// The arena refused our API key; nothing further can succeed.
    #[error("API key rejected (HTTP {status})")]
    CredentialRejected { status: u16 },

    /// Shutdown was requested while the cycle was waiting.
    #[error("battle cycle cancelled")]
    Cancelled,
}

impl BattleError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, BattleError::CredentialRejected { .. })
    }
}
