//! Subscription filters

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::event::Event;
use super::ids::{Kind, PublicKey};

/// `{kinds, authors}` query sent to every relay of a request
///
/// An empty set means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub kinds: BTreeSet<Kind>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub authors: BTreeSet<PublicKey>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: Kind) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn author(mut self, author: PublicKey) -> Self {
        self.authors.insert(author);
        self
    }

    /// Lists of kind 30000 authored by `owner`
    pub fn people_lists(owner: PublicKey) -> Self {
        Filter::new().kind(Kind::PEOPLE_LIST).author(owner)
    }

    pub fn matches(&self, event: &Event) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&event.kind))
            && (self.authors.is_empty() || self.authors.contains(&event.pubkey))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_event::{EventId, Timestamp};

    fn event(kind: u16, author: u8) -> Event {
        Event {
            id: EventId::from_bytes([9; 32]),
            pubkey: PublicKey::from_bytes([author; 32]),
            kind: Kind(kind),
            created_at: Timestamp(1),
            tags: vec![],
            content: String::new(),
            sig: None,
        }
    }

    #[test]
    fn test_people_list_filter() {
        let owner = PublicKey::from_bytes([1; 32]);
        let filter = Filter::people_lists(owner);

        assert!(filter.matches(&event(30000, 1)));
        assert!(!filter.matches(&event(30000, 2)));
        assert!(!filter.matches(&event(1, 1)));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::new().matches(&event(7, 42)));
    }

    #[test]
    fn test_filter_wire_shape() {
        let filter = Filter::people_lists(PublicKey::from_bytes([1; 32]));
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["kinds"], serde_json::json!([30000]));
        assert_eq!(json["authors"][0], "01".repeat(32));
    }
}
