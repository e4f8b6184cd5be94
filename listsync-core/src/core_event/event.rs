//! Events as received from relays

use serde::{Deserialize, Serialize};

use super::coordinate::Coordinate;
use super::error::EventResult;
use super::ids::{EventId, Kind, PublicKey, RelayUrl, Timestamp};
use super::tag::Tag;

/// A signed event, kept verbatim
///
/// Signature verification belongs to the transport layer; by the time an
/// event reaches the core it is trusted as delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: PublicKey,
    pub kind: Kind,
    pub created_at: Timestamp,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl Event {
    pub fn from_json(json: &str) -> EventResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> EventResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Value of the first `d` tag
    pub fn identifier(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.name() == Some("d"))
            .and_then(Tag::value)
    }

    /// Human-readable list name; lists are named by their `d` tag
    pub fn list_name(&self) -> Option<&str> {
        self.identifier()
    }

    /// `None` when the event is not addressable (wrong kind range or no `d` tag)
    pub fn coordinate(&self) -> Option<Coordinate> {
        if !self.kind.is_parameterized_replaceable() {
            return None;
        }
        let identifier = self.identifier()?;
        Some(Coordinate::new(self.kind, self.pubkey, identifier))
    }

    /// Every well-formed `p` tag, in tag order
    pub fn member_tags(&self) -> impl Iterator<Item = (PublicKey, Option<RelayUrl>)> + '_ {
        self.tags.iter().filter_map(Tag::as_member)
    }
}

/// An unsigned event template, ready to be signed and published elsewhere
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    pub kind: Kind,
    pub created_at: Timestamp,
    pub tags: Vec<Tag>,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_JSON: &str = r#"{
        "id": "0000000000000000000000000000000000000000000000000000000000000001",
        "pubkey": "1111111111111111111111111111111111111111111111111111111111111111",
        "kind": 30000,
        "created_at": 1690000000,
        "tags": [
            ["d", "friends"],
            ["p", "2222222222222222222222222222222222222222222222222222222222222222", "wss://relay.example"],
            ["p", "3333333333333333333333333333333333333333333333333333333333333333"],
            ["t", "misc"]
        ],
        "content": "",
        "sig": "deadbeef"
    }"#;

    #[test]
    fn test_parse_list_event() {
        let event = Event::from_json(LIST_JSON).unwrap();
        assert_eq!(event.kind, Kind::PEOPLE_LIST);
        assert_eq!(event.created_at, Timestamp(1_690_000_000));
        assert_eq!(event.list_name(), Some("friends"));

        let members: Vec<_> = event.member_tags().collect();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].1.as_ref().map(RelayUrl::as_str), Some("wss://relay.example"));
        assert_eq!(members[1].1, None);
    }

    #[test]
    fn test_coordinate_requires_identifier() {
        let mut event = Event::from_json(LIST_JSON).unwrap();
        let coord = event.coordinate().unwrap();
        assert_eq!(coord.identifier, "friends");

        event.tags.retain(|t| t.name() != Some("d"));
        assert_eq!(event.coordinate(), None);
        assert_eq!(event.list_name(), None);
    }

    #[test]
    fn test_json_round_trip_keeps_signature() {
        let event = Event::from_json(LIST_JSON).unwrap();
        let back = Event::from_json(&event.to_json().unwrap()).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.sig.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(Event::from_json("{}").is_err());
        assert!(Event::from_json(&LIST_JSON.replace("1111", "zzzz")).is_err());
    }
}
