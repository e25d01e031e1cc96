//! Domain primitives: DealId, Address, TxHash, Chain.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Storage-assigned deal identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DealId(pub i64);

impl DealId {
    pub fn new(id: i64) -> Self {
        DealId(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for DealId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid address: {0}")]
pub struct AddressParseError(pub String);

/// EVM account or contract address.
///
/// Always stored as lowercase hex with a `0x` prefix, so equality is
/// case-insensitive with respect to the input.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalize an address. Accepts 40 hex digits with or without `0x`.
    pub fn parse(raw: &str) -> Result<Self, AddressParseError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressParseError(raw.to_string()));
        }
        Ok(Address(format!("0x{}", digits.to_ascii_lowercase())))
    }

    pub fn is_valid(raw: &str) -> bool {
        Self::parse(raw).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transaction hash: {0}")]
pub struct TxHashParseError(pub String);

/// 32-byte transaction hash, lowercase hex with `0x` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash(String);

impl TxHash {
    pub fn parse(raw: &str) -> Result<Self, TxHashParseError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| TxHashParseError(raw.to_string()))?;
        if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TxHashParseError(raw.to_string()));
        }
        Ok(TxHash(format!("0x{}", digits.to_ascii_lowercase())))
    }

    /// Build a hash from raw digest bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        TxHash(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TxHash {
    type Err = TxHashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TxHash::parse(s)
    }
}

impl TryFrom<String> for TxHash {
    type Error = TxHashParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TxHash::parse(&value)
    }
}

impl From<TxHash> for String {
    fn from(value: TxHash) -> Self {
        value.0
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chain identifier a deal lives on (e.g. "arbitrum").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chain(pub String);

impl Chain {
    pub fn new(chain: impl Into<String>) -> Self {
        Chain(chain.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalizes_case_and_prefix() {
        let a = Address::parse("0xABCDEFabcdef0123456789012345678901234567").unwrap();
        let b = Address::parse("abcdefABCDEF0123456789012345678901234567").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "0xabcdefabcdef0123456789012345678901234567");
    }

    #[test]
    fn test_address_rejects_malformed() {
        assert!(Address::parse("invalid").is_err());
        assert!(Address::parse("0x123").is_err());
        assert!(Address::parse("0xzz00000000000000000000000000000000000000").is_err());
        assert!(!Address::is_valid(""));
    }

    #[test]
    fn test_address_serde_validates() {
        let ok: Result<Address, _> =
            serde_json::from_str("\"0x1111111111111111111111111111111111111111\"");
        assert!(ok.is_ok());
        let bad: Result<Address, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_tx_hash_requires_prefix_and_length() {
        let hash = format!("0x{}", "AB".repeat(32));
        let parsed = TxHash::parse(&hash).unwrap();
        assert_eq!(parsed.as_str(), format!("0x{}", "ab".repeat(32)));

        assert!(TxHash::parse(&"ab".repeat(32)).is_err());
        assert!(TxHash::parse("0xdeadbeef").is_err());
    }

    #[test]
    fn test_tx_hash_from_bytes() {
        let hash = TxHash::from_bytes(&[0u8; 32]);
        assert_eq!(hash.as_str().len(), 66);
        assert!(TxHash::parse(hash.as_str()).is_ok());
    }

    #[test]
    fn test_deal_id_display() {
        assert_eq!(DealId::new(42).to_string(), "42");
    }
}
