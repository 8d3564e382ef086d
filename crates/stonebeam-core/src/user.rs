//! Account identifiers.
//!
//! A signed-in account is either a customer or a dealer. Both are addressed
//! on the wire by the same opaque `userId` string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque identifier of the signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create an identifier, rejecting empty or padded values.
    pub fn new(id: impl Into<String>) -> Result<Self, UserIdParseError> {
        let id = id.into();
        if id.is_empty() {
            return Err(UserIdParseError::Empty);
        }
        if id.trim() != id {
            return Err(UserIdParseError::Whitespace(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = UserIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = UserIdParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Which kind of account a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Dealer,
}

/// Error parsing a user identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserIdParseError {
    #[error("user id cannot be empty")]
    Empty,
    #[error("user id has leading or trailing whitespace: {0:?}")]
    Whitespace(String),
}
