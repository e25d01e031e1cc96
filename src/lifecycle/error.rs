use crate::ledger::LedgerError;
use std::fmt;
use thiserror::Error;

/// Which address field of a request failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressField {
    CoinOwner,
    Contract,
    Player,
}

impl fmt::Display for AddressField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressField::CoinOwner => write!(f, "Coin owner address is not valid"),
            AddressField::Contract => write!(f, "Invalid contract address"),
            AddressField::Player => write!(f, "Invalid address"),
        }
    }
}

/// Rejections and failures of lifecycle operations.
///
/// Everything except `Ledger` and `Storage` is a business-rule rejection with
/// no side effects.
#[derive(Debug, Error)]
pub enum DealError {
    #[error("{0}")]
    InvalidAddress(AddressField),
    #[error("{0} must be greater than zero")]
    NonPositiveTerm(&'static str),
    #[error("Dates can't be before today")]
    InvalidDate,
    #[error("End date should be at least a day after start date")]
    InvalidEndDate,
    #[error("Minimum days to hold is out of range")]
    HoldingPeriodOutOfRange,
    #[error("Reward pool is too large")]
    RewardPoolTooLarge,
    #[error("Transaction hash is malformed")]
    MalformedTransactionHash,
    #[error("Deal does not exist")]
    DealNotFound,
    #[error("Deal commission has not been paid")]
    DealNotCommissionPaid,
    #[error("Deal commission has already been paid")]
    CommissionAlreadyPaid,
    #[error("Deal is already activated")]
    DealAlreadyActivated,
    #[error("Deal is not activated")]
    DealNotActivated,
    #[error("Transaction hash has been used before")]
    TransactionUsedBefore,
    #[error("Invalid transaction hash")]
    InvalidTransactionHash,
    #[error("Player has already joined this deal")]
    AlreadyJoined,
    #[error("Deal has not started yet")]
    DealNotYetStarted,
    #[error("Deal has ended")]
    DealEnded,
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl DealError {
    /// Collaborator failure rather than a rejection of the request.
    pub fn is_internal(&self) -> bool {
        matches!(self, DealError::Ledger(_) | DealError::Storage(_))
    }
}
