//! Shared test helpers for `sollink-core` unit tests.
//!
//! Deterministic keys and a small signed transaction so that RPC, stream and
//! confirm tests share one source of dummy data.

use crate::keys::Keypair;
use crate::transaction::{AccountMeta, Instruction, Transaction};
use crate::types::{Hash, PublicKey};

/// A deterministic public key distinguished by one byte.
pub fn pubkey(b: u8) -> PublicKey {
    let mut bytes = [0u8; 32];
    bytes[0] = b;
    PublicKey::new(bytes)
}

/// The fee payer used by [`signed_transfer`].
pub fn payer() -> Keypair {
    Keypair::from_seed(&[0x11; 32])
}

/// A system-program transfer of `lamports` from `from` to `to`.
pub fn transfer_instruction(from: PublicKey, to: PublicKey, lamports: u64) -> Instruction {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&2u32.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    Instruction::new(
        PublicKey::default(),
        vec![AccountMeta::writable(from, true), AccountMeta::writable(to, false)],
        data,
    )
}

/// A fully signed one-instruction transaction.
pub fn signed_transfer() -> Transaction {
    let payer = payer();
    let ix = transfer_instruction(payer.public_key(), pubkey(0x22), 1_000);
    Transaction::new_signed(&[ix], &payer.public_key(), Hash::new([0x33; 32]), &[&payer])
        .expect("fixture transaction must sign")
}
