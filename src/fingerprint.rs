//! # Change Detection
//!
//! A [`Fingerprint`] is the SHA-256 digest of the serialized canonical document followed
//! by the raw custom entities bytes. The [`SyncSession`] remembers the fingerprint of the
//! last configuration that reached the gateway in full, so an unchanged render can skip
//! the gateway entirely.
//!
//! ## Rust Concepts Used
//! - The session is passed as `&mut SyncSession` into every sync. Holding the exclusive
//!   borrow for the whole call is what keeps syncs on one session single-flight.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::core::error::ReconcileResult;
use crate::document::Document;

/// Content digest of a rendered configuration
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Digest `document` as serialized JSON, followed by `custom_entities` when present
    pub fn compute(document: &Document, custom_entities: Option<&[u8]>) -> ReconcileResult<Self> {
        let serialized = serde_json::to_vec(document)?;

        let mut hasher = Sha256::new();
        hasher.update(&serialized);
        if let Some(custom) = custom_entities {
            hasher.update(custom);
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Ok(Self(digest))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// State carried from one sync to the next
#[derive(Debug, Default)]
pub struct SyncSession {
    last_applied: Option<Fingerprint>,
}

impl SyncSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint of the last configuration applied in full
    pub fn last_applied(&self) -> Option<&Fingerprint> {
        self.last_applied.as_ref()
    }

    /// True when `fingerprint` matches the last applied configuration
    pub fn should_skip(&self, fingerprint: &Fingerprint) -> bool {
        self.last_applied.as_ref() == Some(fingerprint)
    }

    /// Record a successful sync. `None` forgets the previous fingerprint, so the next
    /// sync goes to the gateway whatever it renders.
    pub fn record_success(&mut self, fingerprint: Option<Fingerprint>) {
        self.last_applied = fingerprint;
    }
}
