//! Ed25519 spend authorization.
//!
//! Outputs pay to a locking key, the BLAKE3 hash of an Ed25519 public key.
//! Spending an output means producing a signature over the input's sighash
//! with the key that hashes to the output's locking key.
//!
//! The sighash commits to the transaction version, every input outpoint,
//! every output, the lock time, and the index of the input being signed.
//! Signatures and public keys are excluded so inputs can be signed in any
//! order.

use ed25519_dalek::{Signer, Verifier};
use std::fmt;

use crate::error::CryptoError;
use crate::types::{Hash256, Transaction};

/// Ed25519 keypair.
///
/// Wraps [`ed25519_dalek::SigningKey`]; the secret is zeroized on drop by the
/// underlying library.
pub struct KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl KeyPair {
    /// Generate a random keypair from the OS cryptographic RNG.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut csprng),
        }
    }

    /// Create a keypair from 32-byte secret key material.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(&bytes),
        }
    }

    /// Decode a keypair from caller-supplied private key bytes.
    ///
    /// The only accepted encoding is the raw 32-byte Ed25519 secret; anything
    /// else is [`CryptoError::InvalidPrivateKey`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self::from_secret_bytes(arr))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Get the raw secret key bytes. Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Sign a message, returning the raw 64-byte Ed25519 signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.secret_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key.
#[derive(Clone)]
pub struct PublicKey {
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let vk = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key: vk })
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// The locking key outputs use to pay this key's owner.
    pub fn locking_key(&self) -> Hash256 {
        locking_key(&self.to_bytes())
    }

    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> Result<(), CryptoError> {
        let sig = ed25519_dalek::Signature::from_bytes(signature);
        self.verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}

/// Compute the BLAKE3 locking key from raw public key bytes.
pub fn locking_key(pubkey_bytes: &[u8; 32]) -> Hash256 {
    Hash256(blake3::hash(pubkey_bytes).into())
}

/// Compute the signing hash for one input of a transaction.
pub fn signing_hash(tx: &Transaction, input_index: usize) -> Result<Hash256, CryptoError> {
    if input_index >= tx.inputs.len() {
        return Err(CryptoError::InputIndexOutOfBounds {
            index: input_index,
            len: tx.inputs.len(),
        });
    }

    let mut data = Vec::new();
    data.extend_from_slice(&tx.version.to_le_bytes());

    data.extend_from_slice(&(tx.inputs.len() as u64).to_le_bytes());
    for input in &tx.inputs {
        data.extend_from_slice(input.prev_out.txid.as_bytes());
        data.extend_from_slice(&input.prev_out.vout.to_le_bytes());
    }

    data.extend_from_slice(&(tx.outputs.len() as u64).to_le_bytes());
    for output in &tx.outputs {
        data.extend_from_slice(&output.value.to_le_bytes());
        data.extend_from_slice(output.locking_key.as_bytes());
    }

    data.extend_from_slice(&tx.lock_time.to_le_bytes());
    data.extend_from_slice(&(input_index as u64).to_le_bytes());

    Ok(Hash256(blake3::hash(&data).into()))
}

/// Sign one input in place, filling its signature and public key fields.
pub fn sign_input(
    tx: &mut Transaction,
    input_index: usize,
    keypair: &KeyPair,
) -> Result<(), CryptoError> {
    let sighash = signing_hash(tx, input_index)?;
    let signature = keypair.sign(sighash.as_bytes());
    let pubkey_bytes = keypair.public_key().to_bytes();

    tx.inputs[input_index].signature = signature.to_vec();
    tx.inputs[input_index].public_key = pubkey_bytes.to_vec();
    Ok(())
}

/// Verify one input's signature against the locking key of the output it spends.
///
/// Checks that the carried public key hashes to `expected_locking_key` and
/// that the Ed25519 signature verifies over the input's sighash.
pub fn verify_input(
    tx: &Transaction,
    input_index: usize,
    expected_locking_key: &Hash256,
) -> Result<(), CryptoError> {
    if input_index >= tx.inputs.len() {
        return Err(CryptoError::InputIndexOutOfBounds {
            index: input_index,
            len: tx.inputs.len(),
        });
    }

    let input = &tx.inputs[input_index];

    let pk_bytes: [u8; 32] = input
        .public_key
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let pk = PublicKey::from_bytes(&pk_bytes)?;

    if pk.locking_key() != *expected_locking_key {
        return Err(CryptoError::LockingKeyMismatch);
    }

    let sig_bytes: [u8; 64] = input
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature)?;

    let sighash = signing_hash(tx, input_index)?;
    pk.verify(sighash.as_bytes(), &sig_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OutPoint, TxInput, TxOutput};

    fn unsigned_spend(keypair: &KeyPair) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev_out: OutPoint { txid: Hash256([7; 32]), vout: 0 },
                signature: vec![],
                public_key: vec![],
            }],
            outputs: vec![TxOutput {
                value: 1000,
                locking_key: keypair.public_key().locking_key(),
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn keypair_round_trips_secret() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_secret_bytes(kp.secret_bytes());
        assert_eq!(kp.public_key(), restored.public_key());
    }

    #[test]
    fn from_slice_accepts_exactly_32_bytes() {
        assert!(KeyPair::from_slice(&[7u8; 32]).is_ok());
        assert_eq!(
            KeyPair::from_slice(&[]).unwrap_err(),
            CryptoError::InvalidPrivateKey
        );
        assert_eq!(
            KeyPair::from_slice(&[7u8; 31]).unwrap_err(),
            CryptoError::InvalidPrivateKey
        );
        assert_eq!(
            KeyPair::from_slice(&[7u8; 33]).unwrap_err(),
            CryptoError::InvalidPrivateKey
        );
    }

    #[test]
    fn from_slice_is_deterministic() {
        let a = KeyPair::from_slice(&[9u8; 32]).unwrap();
        let b = KeyPair::from_slice(&[9u8; 32]).unwrap();
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn locking_key_differs_from_pubkey() {
        let kp = KeyPair::generate();
        let lk = kp.public_key().locking_key();
        assert_ne!(lk.as_bytes(), &kp.public_key().to_bytes());
    }

    #[test]
    fn sign_then_verify() {
        let kp = KeyPair::generate();
        let owner_lock = kp.public_key().locking_key();
        let mut tx = unsigned_spend(&kp);
        sign_input(&mut tx, 0, &kp).unwrap();
        verify_input(&tx, 0, &owner_lock).unwrap();
    }

    #[test]
    fn wrong_key_fails_locking_check() {
        let owner = KeyPair::generate();
        let thief = KeyPair::generate();
        let mut tx = unsigned_spend(&owner);
        sign_input(&mut tx, 0, &thief).unwrap();
        assert_eq!(
            verify_input(&tx, 0, &owner.public_key().locking_key()).unwrap_err(),
            CryptoError::LockingKeyMismatch
        );
    }

    #[test]
    fn tampered_output_fails_verification() {
        let kp = KeyPair::generate();
        let lock = kp.public_key().locking_key();
        let mut tx = unsigned_spend(&kp);
        sign_input(&mut tx, 0, &kp).unwrap();
        tx.outputs[0].value += 1;
        assert_eq!(
            verify_input(&tx, 0, &lock).unwrap_err(),
            CryptoError::VerificationFailed
        );
    }

    #[test]
    fn sighash_commits_to_input_index() {
        let kp = KeyPair::generate();
        let mut tx = unsigned_spend(&kp);
        tx.inputs.push(tx.inputs[0].clone());
        let h0 = signing_hash(&tx, 0).unwrap();
        let h1 = signing_hash(&tx, 1).unwrap();
        assert_ne!(h0, h1);
    }

    #[test]
    fn sighash_ignores_signature_fields() {
        let kp = KeyPair::generate();
        let mut tx = unsigned_spend(&kp);
        let before = signing_hash(&tx, 0).unwrap();
        sign_input(&mut tx, 0, &kp).unwrap();
        assert_eq!(signing_hash(&tx, 0).unwrap(), before);
    }

    #[test]
    fn out_of_bounds_index_rejected() {
        let kp = KeyPair::generate();
        let tx = unsigned_spend(&kp);
        assert!(matches!(
            signing_hash(&tx, 5),
            Err(CryptoError::InputIndexOutOfBounds { index: 5, len: 1 })
        ));
    }
}
