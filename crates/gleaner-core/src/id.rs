use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GleanerError, Result};

/// 16-byte identifier, rendered as a canonical lowercase uuid string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(Uuid);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse the canonical form only: lowercase, hyphenated, no braces or
    /// `urn:` prefix. Queue file names depend on there being one spelling.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || GleanerError::InvalidId(s.to_string());
        let id = Uuid::parse_str(s).map(Self).map_err(|_| invalid())?;
        if id.to_string() != s {
            return Err(invalid());
        }
        Ok(id)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for Id {
    type Err = GleanerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
