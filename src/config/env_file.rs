//! Write-back of refreshed credentials into the `.env` file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::{NoExpand, Regex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid key {0:?}")]
    InvalidKey(String),
}

/// Durable destination for a refreshed cookie.
pub trait CredentialStore: Send + Sync {
    fn persist(&self, cookie: &str) -> Result<(), StoreError>;
}

/// Keeps one `KEY="value"` line of a dotenv file current.
#[derive(Debug, Clone)]
pub struct EnvFileStore {
    path: PathBuf,
    key: String,
}

impl EnvFileStore {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn line_pattern(&self) -> Result<Regex, StoreError> {
        Regex::new(&format!(r"(?m)^{}=.*$", regex::escape(&self.key)))
            .map_err(|_| StoreError::InvalidKey(self.key.clone()))
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CredentialStore for EnvFileStore {
    fn persist(&self, cookie: &str) -> Result<(), StoreError> {
        let line = format!("{}=\"{}\"", self.key, escape_double_quoted(cookie));
        let text = match fs::read_to_string(&self.path) {
            Ok(existing) => {
                let pattern = self.line_pattern()?;
                if pattern.is_match(&existing) {
                    pattern.replace_all(&existing, NoExpand(&line)).into_owned()
                } else {
                    let mut text = existing;
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text.push_str(&line);
                    text.push('\n');
                    text
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => format!("{line}\n"),
            Err(err) => return Err(self.io_error(err)),
        };

        fs::write(&self.path, text).map_err(|err| self.io_error(err))?;
        tracing::debug!(path = %self.path.display(), key = %self.key, "Persisted refreshed cookie");
        Ok(())
    }
}

/// Backslash-escape `"`, `$` and backslashes so dotenv parsers read the value back literally.
fn escape_double_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
