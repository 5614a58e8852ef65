// Copyright (c) 2020 White Leaf
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT

use crate::error::ErrorKind;
use std::fmt::{self, Display};
use std::str::FromStr;

const ID_LEN: usize = 24;

/// Document identifier, 24 lowercase hexadecimal characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(String);

impl Id {
    pub fn parse(raw: &str) -> Result<Self, ErrorKind> {
        let raw = raw.trim();
        if raw.len() != ID_LEN || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ErrorKind::InvalidId(raw.into()));
        }

        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// Build an id from a counter, used by stores that generate their own ids
    pub fn from_counter(counter: u64) -> Self {
        Self(format!("{:024x}", counter))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Id {
    type Err = ErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
