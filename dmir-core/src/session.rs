//! Authorization capability handed to network-backed stores.
//!
//! Obtaining and refreshing credentials happens elsewhere; a session only
//! yields a bearer token on demand or fails with [`MirrorError::Auth`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::MirrorError;

pub trait Session: Send + Sync {
    fn access_token(&self) -> Result<String, MirrorError>;
}

/// A fixed bearer token, e.g. from `DMIR_ACCESS_TOKEN`.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticToken(token.into())
    }
}

impl Session for StaticToken {
    fn access_token(&self) -> Result<String, MirrorError> {
        let t = self.0.trim();
        if t.is_empty() {
            return Err(MirrorError::Auth("empty access token".into()));
        }
        Ok(t.to_string())
    }
}

#[derive(Deserialize)]
struct TokenFileContents {
    access_token: String,
    #[serde(default)]
    expiry: Option<DateTime<Utc>>,
}

/// JSON token file written by an external login helper, re-read on every call
/// so a refresh done by that helper is picked up mid-run.
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TokenFile { path: path.into() }
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Session for TokenFile {
    fn access_token(&self) -> Result<String, MirrorError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            MirrorError::Auth(format!("cannot read token file {:?}: {}", self.path, e))
        })?;
        let parsed: TokenFileContents = serde_json::from_str(&raw).map_err(|e| {
            MirrorError::Auth(format!("malformed token file {:?}: {}", self.path, e))
        })?;
        if let Some(exp) = parsed.expiry {
            if exp <= Utc::now() {
                return Err(MirrorError::Auth(format!("token in {:?} expired at {}", self.path, exp)));
            }
        }
        StaticToken(parsed.access_token).access_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_file_reads_and_checks_expiry() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("token.json");

        assert!(matches!(TokenFile::new(&p).access_token(), Err(MirrorError::Auth(_))));

        std::fs::write(&p, r#"{"access_token":"ya29.abc","expiry":"2999-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(TokenFile::new(&p).access_token().unwrap(), "ya29.abc");

        std::fs::write(&p, r#"{"access_token":"ya29.abc","expiry":"2001-01-01T00:00:00Z"}"#).unwrap();
        let err = TokenFile::new(&p).access_token().unwrap_err();
        assert!(err.to_string().contains("expired"));

        std::fs::write(&p, "not json").unwrap();
        assert!(matches!(TokenFile::new(&p).access_token(), Err(MirrorError::Auth(_))));
    }

    #[test]
    fn blank_static_token_is_an_auth_error() {
        assert!(StaticToken::new("  ").access_token().unwrap_err().is_fatal());
        assert_eq!(StaticToken::new("t0k\n").access_token().unwrap(), "t0k");
    }
}
