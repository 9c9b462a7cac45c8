use thiserror::Error;

use crate::domain::Coins;
use crate::storage::{StoreError, TransactError};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Profile already exists: {0}")]
    ProfileAlreadyExists(String),

    #[error("Insufficient funds in wallet of {key}: balance {balance}, required {required}")]
    InsufficientWalletFunds {
        key: String,
        balance: Coins,
        required: Coins,
    },

    #[error("Insufficient funds in bank of {key}: balance {balance}, required {required}")]
    InsufficientBankFunds {
        key: String,
        balance: Coins,
        required: Coins,
    },

    #[error("Cannot transfer credits to yourself")]
    SelfTransferNotAllowed,

    #[error("Invalid amount: {0}")]
    InvalidAmount(Coins),

    /// Crediting `amount` would take a balance past `Coins::MAX`.
    #[error("Balance of {key} would overflow: balance {balance}, credit {amount}")]
    BalanceOverflow {
        key: String,
        balance: Coins,
        amount: Coins,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl LedgerError {
    /// Validation failures the caller is expected to handle. These never
    /// change stored state.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::ProfileNotFound(_)
                | LedgerError::ProfileAlreadyExists(_)
                | LedgerError::InsufficientWalletFunds { .. }
                | LedgerError::InsufficientBankFunds { .. }
                | LedgerError::SelfTransferNotAllowed
                | LedgerError::InvalidAmount(_)
                | LedgerError::BalanceOverflow { .. }
        )
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => LedgerError::StoreUnavailable(reason),
            codec @ StoreError::Codec { .. } => LedgerError::CorruptRecord(codec.to_string()),
        }
    }
}

impl From<TransactError<LedgerError>> for LedgerError {
    fn from(err: TransactError<LedgerError>) -> Self {
        match err {
            TransactError::Rejected(reason) => reason,
            TransactError::Store(err) => err.into(),
        }
    }
}
