//! Shared domain types: fixed-size identifiers with base58 text forms and the
//! commitment levels used by both the RPC and streaming layers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

// ==============================================================================
// Base58 Helpers
// ==============================================================================

fn decode_base58_array<const N: usize>(text: &str, what: &str) -> Result<[u8; N], CoreError> {
    let bytes = bs58::decode(text)
        .into_vec()
        .map_err(|e| CoreError::InvalidEncoding(format!("{what}: base58 decode failed: {e}")))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        CoreError::InvalidEncoding(format!("{what}: expected {N} bytes, got {}", v.len()))
    })
}

fn slice_to_array<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N], CoreError> {
    bytes.try_into().map_err(|_| {
        CoreError::InvalidEncoding(format!("{what}: expected {N} bytes, got {}", bytes.len()))
    })
}

/// Implements base58 `Display`, `Debug`, `FromStr` and string-shaped serde for
/// a fixed-size byte newtype.
macro_rules! base58_newtype {
    ($name:ident, $len:expr, $what:expr) => {
        impl $name {
            pub const LEN: usize = $len;

            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Strict conversion: the slice must be exactly `LEN` bytes.
            pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
                slice_to_array(bytes, $what).map(Self)
            }

            pub fn to_bytes(self) -> [u8; $len] {
                self.0
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&bs58::encode(&self.0).into_string())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({self})", stringify!($name))
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_base58_array(s, $what).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                text.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

// ==============================================================================
// Public Key
// ==============================================================================

/// A 32-byte account or program identifier. The all-zero key is the system
/// program.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; 32]);

base58_newtype!(PublicKey, 32, "public key");

impl PublicKey {
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

// ==============================================================================
// Hash
// ==============================================================================

/// A 32-byte block hash. Used as the freshness token of a transaction.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Hash([u8; 32]);

base58_newtype!(Hash, 32, "hash");

// ==============================================================================
// Signature
// ==============================================================================

/// A 64-byte ed25519 signature. Its base58 form doubles as the transaction id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 64]);

base58_newtype!(Signature, 64, "signature");

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; 64])
    }
}

impl Signature {
    /// Verify this signature over `message` against `signer`. Keys that are not
    /// valid curve points simply fail verification.
    pub fn verify(&self, signer: &PublicKey, message: &[u8]) -> bool {
        let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(signer.as_bytes()) else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(&self.0);
        key.verify_strict(message, &signature).is_ok()
    }

    /// An unfilled signature slot.
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 64]
    }
}

// ==============================================================================
// Commitment
// ==============================================================================

/// Degree of finality requested when reading state or waiting for inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    #[default]
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Commitment {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Self::Processed),
            "confirmed" => Ok(Self::Confirmed),
            "finalized" => Ok(Self::Finalized),
            other => Err(CoreError::InvalidEncoding(format!(
                "unknown commitment `{other}`; expected processed, confirmed or finalized"
            ))),
        }
    }
}
