//! Transaction model and wire format.
//!
//! ```text
//! Transaction:
//!   num_signatures          compact-u16
//!   signatures              64 bytes * num_signatures
//!   message:
//!     num_required_sigs     u8
//!     num_readonly_signed   u8
//!     num_readonly_unsigned u8
//!     num_accounts          compact-u16
//!     account_keys          32 bytes * num_accounts
//!     recent_blockhash      32 bytes
//!     num_instructions      compact-u16
//!     instructions[]        program_id_index u8, compact-u16 + u8 indices,
//!                           compact-u16 + data bytes
//! ```
//!
//! Account keys are deduplicated and ordered writable signers, read-only
//! signers, writable non-signers, read-only non-signers, with the fee payer
//! always first. Signature slot `i` belongs to account key `i`.

use base64::Engine as _;

use crate::error::CoreError;
use crate::keys::Keypair;
use crate::types::{Hash, PublicKey, Signature};

// ==============================================================================
// Instructions
// ==============================================================================

/// An account reference inside an instruction, with its access flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: PublicKey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn writable(pubkey: PublicKey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    pub fn readonly(pubkey: PublicKey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

/// A single program invocation. Instruction data is opaque here; program
/// specific encoders produce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: PublicKey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

impl Instruction {
    pub fn new(program_id: PublicKey, accounts: Vec<AccountMeta>, data: Vec<u8>) -> Self {
        Self {
            program_id,
            accounts,
            data,
        }
    }
}

// ==============================================================================
// Message
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,
}

/// An instruction whose account references were replaced by indices into the
/// message's account keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub account_indices: Vec<u8>,
    pub data: Vec<u8>,
}

/// The signed portion of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub account_keys: Vec<PublicKey>,
    pub recent_blockhash: Hash,
    pub instructions: Vec<CompiledInstruction>,
}

impl Message {
    /// Compile `instructions` for `fee_payer` against `recent_blockhash`.
    pub fn compile(
        instructions: &[Instruction],
        fee_payer: &PublicKey,
        recent_blockhash: Hash,
    ) -> Result<Self, CoreError> {
        struct Entry {
            pubkey: PublicKey,
            is_signer: bool,
            is_writable: bool,
        }

        let mut entries: Vec<Entry> = Vec::new();
        let mut upsert = |pubkey: PublicKey, signer: bool, writable: bool| {
            if let Some(entry) = entries.iter_mut().find(|e| e.pubkey == pubkey) {
                entry.is_signer |= signer;
                entry.is_writable |= writable;
            } else {
                entries.push(Entry {
                    pubkey,
                    is_signer: signer,
                    is_writable: writable,
                });
            }
        };

        upsert(*fee_payer, true, true);
        for ix in instructions {
            for meta in &ix.accounts {
                upsert(meta.pubkey, meta.is_signer, meta.is_writable);
            }
            upsert(ix.program_id, false, false);
        }

        // Stable sort keeps first-seen order within a class, so the fee payer
        // stays at index 0.
        entries.sort_by_key(|e| match (e.is_signer, e.is_writable) {
            (true, true) => 0u8,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        });

        if entries.len() > usize::from(u8::MAX) + 1 {
            return Err(CoreError::Transaction(format!(
                "{} distinct accounts exceed the 256 addressable by a message",
                entries.len()
            )));
        }

        let count = |what: &str, pred: fn(&Entry) -> bool| -> Result<u8, CoreError> {
            let n = entries.iter().filter(|e| pred(e)).count();
            u8::try_from(n).map_err(|_| {
                CoreError::Transaction(format!(
                    "{n} {what} exceed the 255 a message header can count"
                ))
            })
        };
        let header = MessageHeader {
            num_required_signatures: count("signers", |e| e.is_signer)?,
            num_readonly_signed: count("read-only signers", |e| e.is_signer && !e.is_writable)?,
            num_readonly_unsigned: count("read-only accounts", |e| {
                !e.is_signer && !e.is_writable
            })?,
        };

        let account_keys: Vec<PublicKey> = entries.iter().map(|e| e.pubkey).collect();
        let index_of = |key: &PublicKey| -> Result<u8, CoreError> {
            account_keys
                .iter()
                .position(|k| k == key)
                .map(|i| i as u8)
                .ok_or_else(|| CoreError::Transaction(format!("account {key} missing from keys")))
        };

        let mut compiled = Vec::with_capacity(instructions.len());
        for ix in instructions {
            if ix.data.len() > usize::from(u16::MAX) {
                return Err(CoreError::Transaction(format!(
                    "instruction data of {} bytes exceeds the compact-u16 range",
                    ix.data.len()
                )));
            }
            compiled.push(CompiledInstruction {
                program_id_index: index_of(&ix.program_id)?,
                account_indices: ix
                    .accounts
                    .iter()
                    .map(|meta| index_of(&meta.pubkey))
                    .collect::<Result<_, _>>()?,
                data: ix.data.clone(),
            });
        }

        Ok(Self {
            header,
            account_keys,
            recent_blockhash,
            instructions: compiled,
        })
    }

    /// Keys that must sign, in signature-slot order.
    pub fn signer_keys(&self) -> &[PublicKey] {
        &self.account_keys[..usize::from(self.header.num_required_signatures)]
    }

    pub fn is_writable(&self, index: usize) -> bool {
        let signers = usize::from(self.header.num_required_signatures);
        if index < signers {
            index < signers - usize::from(self.header.num_readonly_signed)
        } else {
            index < self.account_keys.len() - usize::from(self.header.num_readonly_unsigned)
        }
    }

    /// The exact bytes covered by every signature.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + 32 * self.account_keys.len());

        buf.push(self.header.num_required_signatures);
        buf.push(self.header.num_readonly_signed);
        buf.push(self.header.num_readonly_unsigned);

        encode_compact_u16(self.account_keys.len() as u16, &mut buf);
        for key in &self.account_keys {
            buf.extend_from_slice(key.as_bytes());
        }

        buf.extend_from_slice(self.recent_blockhash.as_bytes());

        encode_compact_u16(self.instructions.len() as u16, &mut buf);
        for ix in &self.instructions {
            buf.push(ix.program_id_index);
            encode_compact_u16(ix.account_indices.len() as u16, &mut buf);
            buf.extend_from_slice(&ix.account_indices);
            encode_compact_u16(ix.data.len() as u16, &mut buf);
            buf.extend_from_slice(&ix.data);
        }

        buf
    }
}

// ==============================================================================
// Transaction
// ==============================================================================

/// A message plus one signature slot per required signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub signatures: Vec<Signature>,
    pub message: Message,
}

impl Transaction {
    pub fn new_unsigned(message: Message) -> Self {
        let slots = usize::from(message.header.num_required_signatures);
        Self {
            signatures: vec![Signature::default(); slots],
            message,
        }
    }

    /// Compile and fully sign in one step. The payer must be among `signers`.
    pub fn new_signed(
        instructions: &[Instruction],
        payer: &PublicKey,
        recent_blockhash: Hash,
        signers: &[&Keypair],
    ) -> Result<Self, CoreError> {
        let mut tx = Self::new_unsigned(Message::compile(instructions, payer, recent_blockhash)?);
        tx.sign(signers)?;
        if !tx.is_signed() {
            return Err(CoreError::Transaction(format!(
                "missing signatures for: {}",
                join_keys(&tx.missing_signers())
            )));
        }
        Ok(tx)
    }

    /// Fill the slots belonging to `signers`. May be called repeatedly to
    /// collect signatures from different holders; a keypair that is not a
    /// required signer is an error.
    pub fn sign(&mut self, signers: &[&Keypair]) -> Result<(), CoreError> {
        let payload = self.message.serialize();
        for signer in signers {
            let pubkey = signer.public_key();
            let slot = self
                .message
                .signer_keys()
                .iter()
                .position(|k| *k == pubkey)
                .ok_or_else(|| {
                    CoreError::Transaction(format!("{pubkey} is not a required signer"))
                })?;
            self.signatures[slot] = signer.sign(&payload);
        }
        Ok(())
    }

    pub fn is_signed(&self) -> bool {
        self.signatures.len() == usize::from(self.message.header.num_required_signatures)
            && self.signatures.iter().all(|s| !s.is_empty())
    }

    pub fn missing_signers(&self) -> Vec<PublicKey> {
        self.message
            .signer_keys()
            .iter()
            .zip(&self.signatures)
            .filter(|(_, sig)| sig.is_empty())
            .map(|(key, _)| *key)
            .collect()
    }

    /// Check every filled slot against its signer.
    pub fn verify(&self) -> bool {
        let payload = self.message.serialize();
        self.is_signed()
            && self
                .message
                .signer_keys()
                .iter()
                .zip(&self.signatures)
                .all(|(key, sig)| sig.verify(key, &payload))
    }

    /// The fee payer's signature, which is the transaction id once submitted.
    pub fn signature(&self) -> Option<&Signature> {
        self.signatures.first().filter(|s| !s.is_empty())
    }

    /// Wire encoding. Refuses to encode a transaction with unfilled slots.
    pub fn serialize(&self) -> Result<Vec<u8>, CoreError> {
        if !self.is_signed() {
            return Err(CoreError::Transaction(format!(
                "transaction is not fully signed; missing: {}",
                join_keys(&self.missing_signers())
            )));
        }
        Ok(self.serialize_unchecked())
    }

    /// Wire encoding regardless of signature state, as accepted by simulation
    /// with signature verification disabled.
    pub fn serialize_unchecked(&self) -> Vec<u8> {
        let message = self.message.serialize();
        let mut wire = Vec::with_capacity(3 + 64 * self.signatures.len() + message.len());
        encode_compact_u16(self.signatures.len() as u16, &mut wire);
        for sig in &self.signatures {
            wire.extend_from_slice(sig.as_bytes());
        }
        wire.extend_from_slice(&message);
        wire
    }

    pub fn to_base64(&self) -> Result<String, CoreError> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.serialize()?))
    }
}

// ==============================================================================
// Builder
// ==============================================================================

/// Incremental construction: append instructions, set the freshness token,
/// then compile and sign.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    fee_payer: PublicKey,
    instructions: Vec<Instruction>,
    recent_blockhash: Option<Hash>,
}

impl TransactionBuilder {
    pub fn new(fee_payer: PublicKey) -> Self {
        Self {
            fee_payer,
            instructions: Vec::new(),
            recent_blockhash: None,
        }
    }

    pub fn instruction(mut self, ix: Instruction) -> Self {
        self.instructions.push(ix);
        self
    }

    pub fn recent_blockhash(mut self, hash: Hash) -> Self {
        self.recent_blockhash = Some(hash);
        self
    }

    pub fn build_unsigned(self) -> Result<Transaction, CoreError> {
        if self.instructions.is_empty() {
            return Err(CoreError::Transaction("no instructions".into()));
        }
        let blockhash = self
            .recent_blockhash
            .ok_or_else(|| CoreError::Transaction("recent blockhash not set".into()))?;
        let message = Message::compile(&self.instructions, &self.fee_payer, blockhash)?;
        Ok(Transaction::new_unsigned(message))
    }

    pub fn build_signed(self, signers: &[&Keypair]) -> Result<Transaction, CoreError> {
        let mut tx = self.build_unsigned()?;
        tx.sign(signers)?;
        if !tx.is_signed() {
            return Err(CoreError::Transaction(format!(
                "missing signatures for: {}",
                join_keys(&tx.missing_signers())
            )));
        }
        Ok(tx)
    }
}

// ==============================================================================
// Compact-u16
// ==============================================================================

/// Append `value` in compact-u16 form: 7 bits per byte, high bit continues.
pub fn encode_compact_u16(value: u16, out: &mut Vec<u8>) {
    let mut rest = u32::from(value);
    loop {
        let mut byte = (rest & 0x7f) as u8;
        rest >>= 7;
        if rest > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if rest == 0 {
            break;
        }
    }
}

fn join_keys(keys: &[PublicKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
