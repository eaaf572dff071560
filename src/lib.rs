pub mod app;
pub mod battle;
pub mod config;
pub mod http;
pub mod session;
pub mod util;

pub use battle::{BattleLoop, BattleOrchestrator, LoopExit, Outcome, SessionStats};
pub use config::Config;
pub use session::{CredentialKeeper, CredentialSource, NoCredential};
