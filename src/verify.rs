//! Event id and signature checks.
//!
//! The graph calls a [`Verifier`] only when the caller has not already
//! vouched for an event (`was_verified`).

use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{GraphError, Result};
use crate::event::Event;

/// Opaque `verify(event) -> bool` capability.
pub trait Verifier: Send + Sync {
    fn verify(&self, event: &Event) -> bool;
}

/// Recompute the Nostr event hash from its fields.
pub fn event_hash(ev: &Event) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, ev.pubkey, ev.created_at, ev.kind, ev.tags, ev.content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}

/// BIP-340 Schnorr verification over the recomputed id.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchnorrVerifier;

impl SchnorrVerifier {
    /// Verify an event's ID and Schnorr signature.
    pub fn check(&self, ev: &Event) -> Result<()> {
        let hash = event_hash(ev)?;
        let calc_id = hex::encode(hash);
        if calc_id != ev.id {
            return Err(GraphError::Verification("id mismatch".into()));
        }
        let sig_bytes =
            hex::decode(&ev.sig).map_err(|e| GraphError::Verification(e.to_string()))?;
        let pk_bytes =
            hex::decode(&ev.pubkey).map_err(|e| GraphError::Verification(e.to_string()))?;
        let sig = Signature::from_slice(&sig_bytes)
            .map_err(|e| GraphError::Verification(e.to_string()))?;
        let pk = XOnlyPublicKey::from_slice(&pk_bytes)
            .map_err(|e| GraphError::Verification(e.to_string()))?;
        let secp = Secp256k1::verification_only();
        let msg = Message::from_digest_slice(&hash)
            .map_err(|e| GraphError::Verification(e.to_string()))?;
        secp.verify_schnorr(&sig, &msg, &pk)
            .map_err(|e| GraphError::Verification(e.to_string()))
    }
}

impl Verifier for SchnorrVerifier {
    fn verify(&self, event: &Event) -> bool {
        self.check(event).is_ok()
    }
}

/// Trusts every event. Used when signatures were checked upstream.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Verifier for AcceptAll {
    fn verify(&self, _event: &Event) -> bool {
        true
    }
}
