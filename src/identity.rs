//! Stable per-client identity of a backup source.
//!
//! Snapshots created by the same host, user and path list share an
//! [`Identity`], which is how runs of one logical backup are grouped over
//! time.

use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded SHA-256 of `hostname + username + paths.join(",")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    /// Derive the identity of a backup source.
    ///
    /// `paths` must be passed in the order restic reports them; the order is
    /// part of the identity.
    pub fn derive(hostname: &str, username: &str, paths: &[String]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(hostname.as_bytes());
        hasher.update(username.as_bytes());
        hasher.update(paths.join(",").as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
