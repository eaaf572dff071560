//! Voting credential: the session cookie and the keeper that refreshes it.

pub mod anon_key;
pub mod cookie;
pub mod keeper;
pub mod mock;
pub mod transport;

use async_trait::async_trait;

pub use anon_key::{find_anon_key, AnonKeyDiscovery, PageScrapeDiscovery};
pub use cookie::{AuthCookie, CookieError, CookieJar};
pub use keeper::{CredentialKeeper, KeeperSettings, SessionInfo, REFRESH_INTERVAL};
pub use transport::{HttpSessionTransport, SessionTransport};

/// Supplier of the cookie used for voting.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Current credential, or `None` when voting is not possible
    fn credential(&self) -> Option<String>;

    /// React to an authentication rejection; returns whether a retry is worthwhile.
    async fn handle_unauthorized(&self) -> bool;
}

/// Stand-in when voting is disabled or no cookie was configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredential;

#[async_trait]
impl CredentialSource for NoCredential {
    fn credential(&self) -> Option<String> {
        None
    }

    async fn handle_unauthorized(&self) -> bool {
        false
    }
}
