//! BLS12-381 signature primitives.
//!
//! Thin wrappers over `blst` (min_pk: 48-byte G1 public keys, 96-byte G2
//! signatures) providing key generation, sign/verify, and aggregation.
//! The aggregated forms are what the consensus engine relies on: a quorum's
//! commit signatures collapse into a single signature verifiable against the
//! sum of the signers' public keys.

use blst::min_pk::{AggregatePublicKey, AggregateSignature, PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroize;

/// Domain separation tag, eth2-compatible.
const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Errors from the BLS layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("invalid signature bytes")]
    InvalidSignature,
    #[error("invalid secret key bytes")]
    InvalidSecretKey,
    #[error("aggregation failed")]
    AggregationFailed,
    #[error("empty input")]
    EmptyInput,
}

/// BLS secret key share (32 bytes). Zeroized on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct BlsSecretKey([u8; 32]);

impl BlsSecretKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        // Round-trip through blst so malformed scalars are rejected up front.
        let sk = SecretKey::from_bytes(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(BlsSecretKey(sk.to_bytes()))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Derive the corresponding public key.
    pub fn public_key(&self) -> BlsPublicKey {
        let sk = SecretKey::from_bytes(&self.0).expect("validated on construction");
        BlsPublicKey(sk.sk_to_pk())
    }

    /// Sign a message under the eth2 domain separation tag.
    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        let sk = SecretKey::from_bytes(&self.0).expect("validated on construction");
        BlsSignature(sk.sign(message, DST, &[]))
    }
}

impl fmt::Debug for BlsSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsSecretKey(..)")
    }
}

/// BLS public key (48 bytes compressed).
#[derive(Clone, Debug)]
pub struct BlsPublicKey(PublicKey);

impl PartialEq for BlsPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BlsPublicKey {}

impl BlsPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        PublicKey::from_bytes(bytes)
            .map(BlsPublicKey)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    pub fn to_bytes(&self) -> [u8; 48] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Verify a signature against this key.
    pub fn verify(&self, message: &[u8], signature: &BlsSignature) -> bool {
        signature.0.verify(true, message, DST, &[], &self.0, true) == BLST_ERROR::BLST_SUCCESS
    }

    /// Aggregate public keys. Order-independent.
    pub fn aggregate(keys: &[BlsPublicKey]) -> Result<Self, CryptoError> {
        if keys.is_empty() {
            return Err(CryptoError::EmptyInput);
        }
        let refs: Vec<&PublicKey> = keys.iter().map(|k| &k.0).collect();
        AggregatePublicKey::aggregate(&refs, true)
            .map(|apk| BlsPublicKey(apk.to_public_key()))
            .map_err(|_| CryptoError::AggregationFailed)
    }
}

/// BLS signature (96 bytes compressed G2 point).
#[derive(Clone, Debug)]
pub struct BlsSignature(Signature);

impl PartialEq for BlsSignature {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BlsSignature {}

impl BlsSignature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        Signature::from_bytes(bytes)
            .map(BlsSignature)
            .map_err(|_| CryptoError::InvalidSignature)
    }

    pub fn to_bytes(&self) -> [u8; 96] {
        self.0.to_bytes()
    }

    /// Aggregate signatures over the same message. Order-independent.
    pub fn aggregate(sigs: &[BlsSignature]) -> Result<Self, CryptoError> {
        if sigs.is_empty() {
            return Err(CryptoError::EmptyInput);
        }
        let refs: Vec<&Signature> = sigs.iter().map(|s| &s.0).collect();
        AggregateSignature::aggregate(&refs, true)
            .map(|asig| BlsSignature(asig.to_signature()))
            .map_err(|_| CryptoError::AggregationFailed)
    }

    /// Add one more signature to this one, returning the combined signature.
    pub fn add(&self, other: &BlsSignature) -> Result<Self, CryptoError> {
        let mut agg = AggregateSignature::from_signature(&self.0);
        agg.add_signature(&other.0, true)
            .map_err(|_| CryptoError::AggregationFailed)?;
        Ok(BlsSignature(agg.to_signature()))
    }
}

impl Serialize for BlsSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for BlsSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        BlsSignature::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl Serialize for BlsPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for BlsPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        BlsPublicKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Key pair used by tests and local signing helpers.
pub struct BlsKeyPair {
    secret: BlsSecretKey,
    public: BlsPublicKey,
}

impl BlsKeyPair {
    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        let mut ikm = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut ikm);
        let sk = SecretKey::key_gen(&ikm, &[]).expect("valid IKM");
        let secret = BlsSecretKey(sk.to_bytes());
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn from_secret(secret: BlsSecretKey) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn secret_key(&self) -> &BlsSecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> BlsPublicKey {
        self.public.clone()
    }

    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        self.secret.sign(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let kp = BlsKeyPair::generate();
        let msg = b"attestation data";
        let sig = kp.sign(msg);
        assert!(kp.public_key().verify(msg, &sig));
        assert!(!kp.public_key().verify(b"other data", &sig));
    }

    #[test]
    fn aggregate_verifies_against_aggregated_key() {
        let kps: Vec<BlsKeyPair> = (0..3).map(|_| BlsKeyPair::generate()).collect();
        let msg = b"same message";

        let sigs: Vec<BlsSignature> = kps.iter().map(|k| k.sign(msg)).collect();
        let pks: Vec<BlsPublicKey> = kps.iter().map(|k| k.public_key()).collect();

        let agg_sig = BlsSignature::aggregate(&sigs).unwrap();
        let agg_pk = BlsPublicKey::aggregate(&pks).unwrap();
        assert!(agg_pk.verify(msg, &agg_sig));
    }

    #[test]
    fn incremental_add_matches_batch_aggregate() {
        let kps: Vec<BlsKeyPair> = (0..3).map(|_| BlsKeyPair::generate()).collect();
        let msg = b"same message";
        let sigs: Vec<BlsSignature> = kps.iter().map(|k| k.sign(msg)).collect();

        let batch = BlsSignature::aggregate(&sigs).unwrap();
        let incremental = sigs[0].add(&sigs[1]).unwrap().add(&sigs[2]).unwrap();
        assert_eq!(batch, incremental);
    }

    #[test]
    fn empty_aggregation_rejected() {
        assert_eq!(
            BlsSignature::aggregate(&[]).unwrap_err(),
            CryptoError::EmptyInput
        );
        assert_eq!(
            BlsPublicKey::aggregate(&[]).unwrap_err(),
            CryptoError::EmptyInput
        );
    }

    #[test]
    fn secret_key_bytes_roundtrip() {
        let kp = BlsKeyPair::generate();
        let restored = BlsSecretKey::from_bytes(&kp.secret_key().to_bytes()).unwrap();
        assert_eq!(restored.public_key(), kp.public_key());
    }
}
