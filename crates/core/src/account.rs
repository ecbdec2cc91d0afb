//! Account identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum accepted identifier length
pub const MAX_ACCOUNT_ID_LEN: usize = 64;

/// Errors that can occur when parsing account identifiers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountIdError {
    #[error("Empty account id")]
    Empty,

    #[error("Account id too long (max {MAX_ACCOUNT_ID_LEN} chars): {0}")]
    TooLong(String),

    #[error("Invalid account id format: {0}")]
    InvalidFormat(String),
}

/// Opaque account identifier (one per user)
///
/// Accepts ASCII letters, digits, `-`, `_` and `.`; surrounding whitespace is trimmed.
///
/// # Examples
/// ```
/// use coinledger_core::AccountId;
///
/// let alice: AccountId = " alice ".parse().unwrap();
/// assert_eq!(alice.as_str(), "alice");
/// assert!("".parse::<AccountId>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Validate and wrap an identifier
    pub fn new(id: impl AsRef<str>) -> Result<Self, AccountIdError> {
        let id = id.as_ref().trim();
        if id.is_empty() {
            return Err(AccountIdError::Empty);
        }
        if id.len() > MAX_ACCOUNT_ID_LEN {
            return Err(AccountIdError::TooLong(id.to_string()));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(AccountIdError::InvalidFormat(id.to_string()));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AccountId {
    type Error = AccountIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        assert!(AccountId::new("user-123").is_ok());
        assert!(AccountId::new("a.b_c").is_ok());
        assert!(AccountId::new("4f1c0a9e-8d1b-4c8e-9f3a-2b7d6e5c4a31").is_ok());
    }

    #[test]
    fn test_invalid_ids() {
        assert_eq!(AccountId::new("   "), Err(AccountIdError::Empty));
        assert!(matches!(
            AccountId::new("has space"),
            Err(AccountIdError::InvalidFormat(_))
        ));
        assert!(matches!(
            AccountId::new("x".repeat(65)),
            Err(AccountIdError::TooLong(_))
        ));
    }

    #[test]
    fn test_serde_validates() {
        let id: AccountId = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(id.as_str(), "bob");
        assert!(serde_json::from_str::<AccountId>("\"\"").is_err());
    }
}
