//! Program-derived addresses.
//!
//! A program-derived address is `SHA-256(seeds || bump || program_id ||
//! "ProgramDerivedAddress")`, searched over bump seeds from 255 downwards until
//! the digest is *not* a valid compressed ed25519 point. Because no private key
//! can exist for an off-curve address, only the owning program can sign for it.

use sha2::{Digest, Sha256};

use crate::error::DerivationError;
use crate::types::PublicKey;

/// Longest allowed single seed, in bytes.
pub const MAX_SEED_LEN: usize = 32;

/// Maximum number of seeds, bump included.
pub const MAX_SEEDS: usize = 16;

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Find the canonical program-derived address for `seeds` under `program_id`,
/// returning it together with the bump seed that produced it.
///
/// Seed lengths are validated before any hashing. Exhausting every bump is a
/// hard failure; callers must not retry with the same inputs.
pub fn find_program_address(
    seeds: &[&[u8]],
    program_id: &PublicKey,
) -> Result<(PublicKey, u8), DerivationError> {
    validate_seeds(seeds, 1)?;

    for bump in (0..=u8::MAX).rev() {
        let candidate = hash_seeds(seeds, Some(bump), program_id);
        if !is_on_curve(&candidate) {
            return Ok((PublicKey::new(candidate), bump));
        }
    }

    Err(DerivationError::NoViableAddress)
}

/// Single derivation attempt with a caller-supplied seed list (normally ending
/// with the bump). Fails with `OnCurve` when the digest is a valid point.
pub fn create_program_address(
    seeds: &[&[u8]],
    program_id: &PublicKey,
) -> Result<PublicKey, DerivationError> {
    validate_seeds(seeds, 0)?;

    let candidate = hash_seeds(seeds, None, program_id);
    if is_on_curve(&candidate) {
        return Err(DerivationError::OnCurve);
    }
    Ok(PublicKey::new(candidate))
}

/// Address of an account created with a string seed on behalf of `base`:
/// `SHA-256(base || seed || owner)`. The result may lie on the curve.
pub fn create_with_seed(
    base: &PublicKey,
    seed: &str,
    owner: &PublicKey,
) -> Result<PublicKey, DerivationError> {
    if seed.len() > MAX_SEED_LEN {
        return Err(DerivationError::SeedTooLong {
            index: 0,
            len: seed.len(),
            max: MAX_SEED_LEN,
        });
    }

    let mut hasher = Sha256::new();
    hasher.update(base.as_bytes());
    hasher.update(seed.as_bytes());
    hasher.update(owner.as_bytes());
    Ok(PublicKey::new(hasher.finalize().into()))
}

/// Whether `bytes` decompresses to a point on the ed25519 curve.
pub fn is_on_curve(bytes: &[u8; 32]) -> bool {
    curve25519_dalek::edwards::CompressedEdwardsY(*bytes)
        .decompress()
        .is_some()
}

fn validate_seeds(seeds: &[&[u8]], reserved: usize) -> Result<(), DerivationError> {
    if seeds.len() + reserved > MAX_SEEDS {
        return Err(DerivationError::MaxSeedsExceeded {
            count: seeds.len(),
            max: MAX_SEEDS - reserved,
        });
    }
    for (index, seed) in seeds.iter().enumerate() {
        if seed.len() > MAX_SEED_LEN {
            return Err(DerivationError::SeedTooLong {
                index,
                len: seed.len(),
                max: MAX_SEED_LEN,
            });
        }
    }
    Ok(())
}

fn hash_seeds(seeds: &[&[u8]], bump: Option<u8>, program_id: &PublicKey) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    if let Some(bump) = bump {
        hasher.update([bump]);
    }
    hasher.update(program_id.as_bytes());
    hasher.update(PDA_MARKER);
    hasher.finalize().into()
}
