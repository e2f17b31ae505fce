//! Proof that a caller controls an already registered identity.
//!
//! A key that is already claimed may only move to a new hostname if the
//! caller proves it holds the key registered under the old hostname.
//! Which proofs are accepted is a deployment decision.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::types::PeerRecord;

pub trait RenameVerifier: Send + Sync {
    /// Returns true if `proof` shows the caller owns `previous`.
    fn verify(&self, previous: &PeerRecord, proof: &str) -> bool;
}

/// Which [`RenameVerifier`] the registry is built with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenameVerification {
    #[default]
    Disabled,
    Ed25519Challenge,
}

impl RenameVerification {
    pub fn verifier(self) -> Box<dyn RenameVerifier> {
        match self {
            RenameVerification::Disabled => Box::new(RejectRenames),
            RenameVerification::Ed25519Challenge => Box::new(Ed25519Challenge),
        }
    }
}

/// Accepts no proof at all.
pub struct RejectRenames;

impl RenameVerifier for RejectRenames {
    fn verify(&self, previous: &PeerRecord, _proof: &str) -> bool {
        debug!("rename away from {} refused: renames disabled", previous.hostname);
        false
    }
}

/// Reads the registered key as an Ed25519 verifying key and expects the
/// proof to be a hex signature over the record's challenge text.
pub struct Ed25519Challenge;

impl RenameVerifier for Ed25519Challenge {
    fn verify(&self, previous: &PeerRecord, proof: &str) -> bool {
        let Some(challenge) = previous.challenge.as_deref() else {
            warn!("{} has no challenge, cannot verify rename", previous.hostname);
            return false;
        };

        let key_bytes: [u8; 32] = match hex::decode(&previous.key)
            .ok()
            .and_then(|b| b.try_into().ok())
        {
            Some(bytes) => bytes,
            None => return false,
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            warn!("key of {} is not a valid ed25519 point", previous.hostname);
            return false;
        };

        let sig_bytes: [u8; 64] = match hex::decode(proof.trim())
            .ok()
            .and_then(|b| b.try_into().ok())
        {
            Some(bytes) => bytes,
            None => return false,
        };
        let signature = Signature::from_bytes(&sig_bytes);

        key.verify(challenge.as_bytes(), &signature).is_ok()
    }
}
