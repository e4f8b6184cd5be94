//! Event tags
//!
//! A tag is an ordered list of strings; the first element names it. Lists use
//! `["d", <identifier>]` for their name and `["p", <pubkey>, <relay hint>?]`
//! for each member.

use serde::{Deserialize, Serialize};

use super::ids::{PublicKey, RelayUrl};

/// One tag of an event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(Vec<String>);

impl Tag {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tag(parts.into_iter().map(Into::into).collect())
    }

    /// `["d", identifier]`
    pub fn identifier(identifier: impl Into<String>) -> Self {
        Tag(vec!["d".to_string(), identifier.into()])
    }

    /// `["p", pubkey]` or `["p", pubkey, relay]`
    pub fn member(pubkey: &PublicKey, relay: Option<&RelayUrl>) -> Self {
        let mut parts = vec!["p".to_string(), pubkey.to_hex()];
        if let Some(relay) = relay {
            parts.push(relay.to_string());
        }
        Tag(parts)
    }

    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// First value after the name
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Interpret as a member tag
    ///
    /// Returns `None` unless this is a `p` tag with a valid public key. An
    /// empty or unparseable relay hint becomes `None` rather than rejecting
    /// the member.
    pub fn as_member(&self) -> Option<(PublicKey, Option<RelayUrl>)> {
        if self.name() != Some("p") {
            return None;
        }
        let pubkey = PublicKey::parse(self.value()?).ok()?;
        let relay = self
            .get(2)
            .filter(|hint| !hint.is_empty())
            .and_then(|hint| RelayUrl::parse(hint).ok());
        Some((pubkey, relay))
    }

    /// Whether this `p` tag refers to `pubkey`, regardless of hint validity
    pub fn is_member_tag_for(&self, pubkey: &PublicKey) -> bool {
        self.name() == Some("p")
            && self
                .value()
                .and_then(|v| PublicKey::parse(v).ok())
                .as_ref()
                == Some(pubkey)
    }
}
