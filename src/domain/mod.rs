//! Domain types for deals and their participants.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: DealId, Address, TxHash, Chain
//! - Deal terms, lifecycle record and status
//! - Participation rows and streak timing rules
//! - Token metadata

pub mod deal;
pub mod decimal;
pub mod participation;
pub mod primitives;
pub mod token;

pub use deal::{start_of_day, Deal, DealStatus, DealTerms, NewDeal, TransferPurpose, TxRecord};
pub use decimal::Decimal;
pub use participation::Participation;
pub use primitives::{Address, AddressParseError, Chain, DealId, TxHash, TxHashParseError};
pub use token::{CachedTokenDetails, TokenDetails, TokenMetadata};
