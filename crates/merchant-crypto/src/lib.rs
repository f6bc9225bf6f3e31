// Cryptographic helpers for the merchant backend.
//
// The payment network's wire format is Ed25519 signatures over
// purpose-tagged messages, blake2b/sha256 hashing, and base32-encoded
// byte fields. `ed25519-dalek` is wrapped behind a `KeyPair` with
// `Drop`-time zeroization, free functions for sign/verify, plus the
// purpose tags and base32 coding the wire protocol needs.

use blake2::Blake2b512;
use data_encoding::BASE32_NOPAD;
use digest::Digest;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

#[derive(Debug)]
pub enum CryptoError {
    InvalidKey,
    InvalidSignature,
    VerificationFailed,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::InvalidKey => write!(f, "invalid key encoding"),
            CryptoError::InvalidSignature => write!(f, "invalid signature encoding"),
            CryptoError::VerificationFailed => write!(f, "signature verification failed"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Distinguished integer tags on signed messages. Tag stability is
/// required for interop with the exchange (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SignaturePurpose {
    Contract = 1,
    DepositConfirm = 2,
    RefundOk = 3,
    MeltConfirm = 4,
    KeySet = 5,
}

impl SignaturePurpose {
    /// Purpose-tagged message: 4-byte big-endian tag prefix, matching the
    /// "purpose-tagged message" construction GLOSSARY describes.
    pub fn tag(&self, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&(*self as u32).to_be_bytes());
        out.extend_from_slice(body);
        out
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KeyPair {
    public_key: Vec<u8>,
    secret_key: Vec<u8>,
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

impl KeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        KeyPair {
            public_key: signing_key.verifying_key().to_bytes().to_vec(),
            secret_key: signing_key.to_bytes().to_vec(),
        }
    }

    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = secret.try_into().map_err(|_| CryptoError::InvalidKey)?;
        let signing_key = SigningKey::from_bytes(&arr);
        Ok(KeyPair {
            public_key: signing_key.verifying_key().to_bytes().to_vec(),
            secret_key: signing_key.to_bytes().to_vec(),
        })
    }

    pub fn public_bytes(&self) -> &[u8] {
        &self.public_key
    }

    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret_key
    }

    pub fn sign(&self, purpose: SignaturePurpose, body: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let arr: [u8; 32] = self.secret_key.as_slice().try_into().map_err(|_| CryptoError::InvalidKey)?;
        let signing_key = SigningKey::from_bytes(&arr);
        let message = purpose.tag(body);
        Ok(signing_key.sign(&message).to_bytes().to_vec())
    }
}

pub fn verify_signature(
    purpose: SignaturePurpose,
    body: &[u8],
    signature_bytes: &[u8],
    public_key_bytes: &[u8],
) -> bool {
    let Ok(pk_arr) = <[u8; 32]>::try_from(public_key_bytes) else { return false };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pk_arr) else { return false };
    let Ok(sig_arr) = <[u8; 64]>::try_from(signature_bytes) else { return false };
    let signature = ed25519_dalek::Signature::from_bytes(&sig_arr);
    let message = purpose.tag(body);
    verifying_key.verify(&message, &signature).is_ok()
}

/// Stable canonical hash over a JSON-style value: serde_json's map
/// serialization already preserves insertion order, so we re-serialize
/// through `serde_json::to_vec` after recursively sorting object keys to
/// get a byte-stable representation regardless of construction order.
pub fn hash_canonical_json(value: &serde_json::Value) -> String {
    let canonical = canonicalize(value);
    let bytes = serde_json::to_vec(&canonical).expect("canonical JSON always serializes");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for k in keys {
                sorted.insert(k.clone(), canonicalize(&map[k]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// Raw-bytes digest used for the idempotency fingerprint (4.K / §6): the
/// HTTP surface hashes `method || path || body` verbatim, unlike
/// `hash_canonical_json` which is for JSON values that need key-order
/// independence.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn random_salt() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    base32_encode(&bytes)
}

/// `h_wire = hash(payto_uri || salt)`, §3.
pub fn hash_wire(payto_uri: &str, salt: &str) -> String {
    let mut hasher = Blake2b512::new();
    hasher.update(payto_uri.as_bytes());
    hasher.update(salt.as_bytes());
    base32_encode(&hasher.finalize())
}

pub fn base32_encode(bytes: &[u8]) -> String {
    BASE32_NOPAD.encode(bytes)
}

pub fn base32_decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    BASE32_NOPAD
        .decode(s.as_bytes())
        .map_err(|_| CryptoError::InvalidKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let kp = KeyPair::generate();
        let sig = kp.sign(SignaturePurpose::Contract, b"hello").unwrap();
        assert!(verify_signature(SignaturePurpose::Contract, b"hello", &sig, kp.public_bytes()));
        assert!(!verify_signature(SignaturePurpose::DepositConfirm, b"hello", &sig, kp.public_bytes()));
        assert!(!verify_signature(SignaturePurpose::Contract, b"goodbye", &sig, kp.public_bytes()));
    }

    #[test]
    fn canonical_hash_is_order_independent() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(hash_canonical_json(&a), hash_canonical_json(&b));
    }

    #[test]
    fn base32_roundtrip() {
        let bytes = b"some coin public key bytes!!";
        let encoded = base32_encode(bytes);
        assert_eq!(base32_decode(&encoded).unwrap(), bytes);
    }

    #[test]
    fn wire_hash_deterministic() {
        let h1 = hash_wire("payto://x-taler-bank/exchange/acct", "salt1");
        let h2 = hash_wire("payto://x-taler-bank/exchange/acct", "salt1");
        let h3 = hash_wire("payto://x-taler-bank/exchange/acct", "salt2");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    fn purpose(tag: u8) -> SignaturePurpose {
        match tag % 5 {
            0 => SignaturePurpose::Contract,
            1 => SignaturePurpose::DepositConfirm,
            2 => SignaturePurpose::RefundOk,
            3 => SignaturePurpose::MeltConfirm,
            _ => SignaturePurpose::KeySet,
        }
    }

    proptest::proptest! {
        /// A signature over a fully populated (arbitrary-length, arbitrary-byte)
        /// message under one purpose never verifies under a different purpose or
        /// a different message — the property 4.F's contract-signing and 4.H's
        /// tip/refund confirmations both rely on to keep signatures from being
        /// replayed across unrelated operations.
        #[test]
        fn sign_verify_holds_across_arbitrary_bodies(body in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..512), tag in proptest::prelude::any::<u8>(), other_tag in proptest::prelude::any::<u8>()) {
            let kp = KeyPair::generate();
            let p = purpose(tag);
            let sig = kp.sign(p, &body).unwrap();
            proptest::prop_assert!(verify_signature(p, &body, &sig, kp.public_bytes()));

            let other = purpose(other_tag);
            if other as u32 != p as u32 {
                proptest::prop_assert!(!verify_signature(other, &body, &sig, kp.public_bytes()));
            }
        }
    }
}
