// Per-layer error enums (spec.md S7). Recoverable errors stay inside the
// owning component and surface as a `Result`/counter; `FatalError` is the
// only kind that reaches the supervisor's shutdown path.

use synod_common::crypto::Address;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("block parent hash does not match the tip (B1)")]
    WrongParent,
    #[error("block timestamp does not strictly increase over the parent (B3)")]
    NonMonotonicTimestamp,
    #[error("leading system transactions do not match the expected shape for this height (B2)")]
    BadSystemTransactions,
    #[error("transaction would drive {address} below zero")]
    DoubleSpend { address: Address },
    #[error("committed block references an address with no prior balance and a negative effect")]
    UnknownSender,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolRejection {
    #[error("signature does not verify")]
    BadSignature,
    #[error("sender has no known balance")]
    UnknownSender,
    #[error("sender balance is less than amount + declared fee")]
    InsufficientBalance,
    #[error("a transaction with this sender/nonce pair is already pooled")]
    DuplicateNonce,
    #[error("pool is at capacity")]
    PoolFull,
    #[error("voluntary burn submitted while the burn percentage has not yet reached zero")]
    BurnScheduleActive,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("proposal did not come from the expected proposer for this height")]
    WrongProposer,
    #[error("proposal height does not match the round in progress")]
    WrongHeight,
    #[error("proposal parent hash does not match the local tip")]
    WrongParent,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum P2pError {
    #[error("connection lost")]
    ConnectionLost,
    #[error("malformed frame")]
    BadFrame,
    #[error("message signature does not verify")]
    SignatureMismatch,
    #[error("peer network id {theirs} does not match local network id {ours}")]
    IncompatibleNetwork { ours: String, theirs: String },
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("bootstrap has already completed; no further commits are accepted")]
    AlreadyDone,
    #[error("pioneer set disagrees on the system-address set or initial pool amount")]
    CommitDisagreement,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("durable write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("persisted record is corrupt: {0}")]
    Corrupt(String),
}

impl Clone for StorageError {
    fn clone(&self) -> Self {
        match self {
            StorageError::Io(e) => StorageError::Corrupt(e.to_string()),
            StorageError::Corrupt(s) => StorageError::Corrupt(s.clone()),
        }
    }
}

impl PartialEq for StorageError {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
impl Eq for StorageError {}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("could not parse configuration file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors that halt the node (spec.md S7). The supervisor logs at `error!`,
/// flushes what it can, and exits with a distinct non-zero code.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("durable write did not complete: {0}")]
    CrashSafetyFailure(#[from] StorageError),
    #[error("post-commit invariant check failed: {0}")]
    InvariantViolation(#[from] LedgerError),
    #[error("committed block contradicts the local ledger tip; resynchronise from the coordinator-approved history")]
    LocalForkDetected,
}

impl FatalError {
    /// Exit code reported by `main()` (SPEC_FULL.md S6): 1 bad config, 2 bad
    /// persisted state, 3 fatal invariant violation / local fork.
    pub fn exit_code(&self) -> i32 {
        match self {
            FatalError::CrashSafetyFailure(_) => 2,
            FatalError::InvariantViolation(_) | FatalError::LocalForkDetected => 3,
        }
    }
}
