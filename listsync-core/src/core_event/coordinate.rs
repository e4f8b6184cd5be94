//! Coordinates of parameterized replaceable events

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{Kind, PublicKey};

/// `(kind, author, identifier)`: the identity of a replaceable record
///
/// Only the newest event carrying a coordinate is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub kind: Kind,
    pub author: PublicKey,
    pub identifier: String,
}

impl Coordinate {
    pub fn new(kind: Kind, author: PublicKey, identifier: impl Into<String>) -> Self {
        Coordinate {
            kind,
            author,
            identifier: identifier.into(),
        }
    }
}

/// `<kind>:<author hex>:<identifier>`, the form used in `a` tags
impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.author, self.identifier)
    }
}
