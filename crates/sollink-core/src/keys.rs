//! Ed25519 signing key material.
//!
//! A [`Keypair`] holds the 32-byte secret seed; the public key is always
//! derived from it, never stored independently. The exported form is the
//! conventional 64-byte `seed || public_key`, as written by keygen tools.

use ed25519_dalek::{Signer, SigningKey};
use zeroize::Zeroizing;

use crate::error::CoreError;
use crate::types::{PublicKey, Signature};

pub struct Keypair {
    // `SigningKey` zeroizes its secret on drop.
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh keypair from operating-system entropy.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Import the 64-byte `seed || public_key` form. The embedded public key
    /// must match the one derived from the seed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() != 64 {
            return Err(CoreError::InvalidKey(format!(
                "expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut seed = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&bytes[..32]);
        let keypair = Self::from_seed(&seed);

        if keypair.public_key().as_bytes()[..] != bytes[32..] {
            return Err(CoreError::InvalidKey(
                "embedded public key does not match the secret seed".into(),
            ));
        }
        Ok(keypair)
    }

    pub fn from_base58(text: &str) -> Result<Self, CoreError> {
        let bytes = Zeroizing::new(
            bs58::decode(text.trim())
                .into_vec()
                .map_err(|e| CoreError::InvalidKey(format!("base58 decode failed: {e}")))?,
        );
        Self::from_bytes(&bytes)
    }

    /// Parse the JSON byte-array text written by keygen tools, e.g. `[12, 250, ...]`.
    pub fn from_keygen_json(text: &str) -> Result<Self, CoreError> {
        let bytes: Zeroizing<Vec<u8>> = Zeroizing::new(
            serde_json::from_str(text)
                .map_err(|e| CoreError::InvalidKey(format!("decode keygen JSON: {e}")))?,
        );
        Self::from_bytes(&bytes)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::new(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, payload: &[u8]) -> Signature {
        Signature::new(self.signing_key.sign(payload).to_bytes())
    }

    /// Export as the 64-byte `seed || public_key` form.
    pub fn to_bytes(&self) -> Zeroizing<[u8; 64]> {
        Zeroizing::new(self.signing_key.to_keypair_bytes())
    }

    pub fn to_base58(&self) -> Zeroizing<String> {
        Zeroizing::new(bs58::encode(self.to_bytes().as_ref()).into_string())
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}
