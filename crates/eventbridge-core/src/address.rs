//! Event-bus addresses.
//!
//! An address is an opaque, non-empty routing key such as `randomnumber` or
//! `chat.room.1`. The bridge decides which handlers see a frame by comparing
//! addresses for equality; no wildcard matching happens on the client.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A validated event-bus address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Create an address, rejecting empty or whitespace-only keys.
    pub fn new(address: impl Into<String>) -> Result<Self, AddressParseError> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(AddressParseError::Empty);
        }
        if address.chars().any(char::is_control) {
            return Err(AddressParseError::ControlCharacter(address));
        }
        Ok(Self(address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<&str> for Address {
    type Error = AddressParseError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Error parsing an address string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("address cannot be empty")]
    Empty,
    #[error("address contains a control character: {0:?}")]
    ControlCharacter(String),
}
