//! Error taxonomy for the Keel engine.
//!
//! `NoMatchingUtxo` is the one variant callers are expected to handle as
//! ordinary control flow; everything else names a defect, a bad argument, or
//! evicted data.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("encode: {0}")] Encode(String),
    #[error("decode: {0}")] Decode(String),
}

/// Internal contradiction while applying or reversing a block.
///
/// Fatal to that block's acceptance; the UTXO set is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("missing utxo: {0}")] MissingUtxo(String),
    #[error("double spend within block: {0}")] DoubleSpend(String),
    #[error("output already exists: {0}")] DuplicateOutput(String),
    #[error("block has no transactions")] EmptyBlock,
    #[error("block does not extend the best tip: expected parent {expected}, got {got}")] NotExtendingTip { expected: String, got: String },
    #[error("first transaction is not coinbase")] FirstTxNotCoinbase,
    #[error("multiple coinbase transactions")] MultipleCoinbase,
    #[error("value overflow")] ValueOverflow,
    #[error(transparent)] Codec(#[from] CodecError),
}

/// Header rejected by the block index.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("unknown parent: {0}")] UnknownParent(String),
    #[error("duplicate header: {0}")] DuplicateHeader(String),
    #[error("timestamp {got} not after median time past {median}")] TimestampNotAfterMedian { got: u64, median: u64 },
    #[error("timestamp {got} exceeds drift limit {limit}")] TimestampTooFar { got: u64, limit: u64 },
    #[error("invalid compact difficulty bits: {0:#010x}")] InvalidBits(u32),
    #[error("chainwork accumulator overflow")] ChainworkOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid private key encoding")] InvalidPrivateKey,
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
    #[error("public key does not hash to the expected locking key")] LockingKeyMismatch,
    #[error("input index out of bounds: {index} >= {len}")] InputIndexOutOfBounds { index: usize, len: usize },
}

/// Chain verification failures that are not "the chain is bad".
///
/// A bad chain is reported as `Ok(false)` by the verifier; these errors mean
/// the task itself could not be carried out as requested.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("{0}")] InvalidArgument(String),
    #[error("block data for height {height} has been pruned")] PrunedDataUnavailable { height: u64 },
    #[error(transparent)] Consensus(#[from] ConsensusError),
    #[error(transparent)] Archive(#[from] ArchiveError),
    #[error(transparent)] Codec(#[from] CodecError),
}

/// Query-surface failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid private key encoding")] InvalidKeyEncoding,
    #[error("unable to find a matching utxo")] NoMatchingUtxo,
    #[error("unknown block: {0}")] UnknownBlock(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PruneError {
    #[error("pruning is disabled")] Disabled,
    #[error("manual prune requested but retention mode is automatic")] NotManual,
    #[error("cannot prune to {requested}: retention floor is {floor}")] RetentionViolation { requested: u64, floor: u64 },
    #[error(transparent)] Archive(#[from] ArchiveError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("storage: {0}")] Storage(String),
    #[error(transparent)] Codec(#[from] CodecError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeelError {
    #[error(transparent)] Consensus(#[from] ConsensusError),
    #[error(transparent)] Index(#[from] IndexError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Verify(#[from] VerifyError),
    #[error(transparent)] Query(#[from] QueryError),
    #[error(transparent)] Prune(#[from] PruneError),
    #[error(transparent)] Archive(#[from] ArchiveError),
    #[error(transparent)] Codec(#[from] CodecError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_render_nonempty() {
        let errors: Vec<KeelError> = vec![
            ConsensusError::EmptyBlock.into(),
            IndexError::UnknownParent("ab".into()).into(),
            VerifyError::PrunedDataUnavailable { height: 7 }.into(),
            QueryError::NoMatchingUtxo.into(),
            PruneError::Disabled.into(),
            ArchiveError::Storage("io".into()).into(),
        ];
        for e in &errors {
            assert!(!format!("{e}").is_empty());
        }
    }

    #[test]
    fn key_encoding_message_is_stable() {
        // The query surface promises this exact wording to callers.
        assert_eq!(
            format!("{}", QueryError::InvalidKeyEncoding),
            "invalid private key encoding"
        );
    }

    #[test]
    fn invalid_bits_renders_hex() {
        let msg = format!("{}", IndexError::InvalidBits(0x0080_0000));
        assert!(msg.contains("0x00800000"));
    }

    #[test]
    fn verify_invalid_argument_is_verbatim() {
        let e = VerifyError::InvalidArgument("checklevel must be >= 0 and <= 4".into());
        assert_eq!(format!("{e}"), "checklevel must be >= 0 and <= 4");
    }
}
