//! Test fixtures for events, keys and relays
//!
//! Provides a builder for people-list events and small factory functions.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core_event::{Event, EventId, Kind, PublicKey, RelayUrl, Tag, Timestamp};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Deterministic public key whose bytes are all `n`
pub fn pubkey(n: u8) -> PublicKey {
    PublicKey::from_bytes([n; 32])
}

/// `wss://<name>.example`
pub fn relay(name: &str) -> RelayUrl {
    RelayUrl::parse(&format!("wss://{}.example", name))
        .unwrap_or_else(|e| panic!("bad test relay name {:?}: {}", name, e))
}

/// Fresh event id, unique within the test binary
pub fn unique_event_id() -> EventId {
    let n = NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed);
    let mut bytes = [0xee; 32];
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    EventId::from_bytes(bytes)
}

/// Builder for people-list events (kind 30000 unless overridden)
pub struct ListEventBuilder {
    id: Option<EventId>,
    author: PublicKey,
    kind: Kind,
    identifier: Option<String>,
    created_at: u64,
    members: Vec<Tag>,
    extra_tags: Vec<Tag>,
    content: String,
}

impl ListEventBuilder {
    pub fn new(author: PublicKey, identifier: &str) -> Self {
        Self {
            id: None,
            author,
            kind: Kind::PEOPLE_LIST,
            identifier: Some(identifier.to_string()),
            created_at: 1,
            members: Vec::new(),
            extra_tags: Vec::new(),
            content: String::new(),
        }
    }

    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    /// Drop the d tag entirely
    pub fn without_identifier(mut self) -> Self {
        self.identifier = None;
        self
    }

    pub fn created_at(mut self, secs: u64) -> Self {
        self.created_at = secs;
        self
    }

    pub fn with_member(mut self, member: &PublicKey) -> Self {
        self.members.push(Tag::member(member, None));
        self
    }

    pub fn with_member_at(mut self, member: &PublicKey, hint: &RelayUrl) -> Self {
        self.members.push(Tag::member(member, Some(hint)));
        self
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.extra_tags.push(tag);
        self
    }

    pub fn with_content(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }

    pub fn build(self) -> Event {
        let mut tags = Vec::new();
        if let Some(identifier) = self.identifier {
            tags.push(Tag::identifier(identifier));
        }
        tags.extend(self.members);
        tags.extend(self.extra_tags);

        Event {
            id: self.id.unwrap_or_else(unique_event_id),
            pubkey: self.author,
            kind: self.kind,
            created_at: Timestamp(self.created_at),
            tags,
            content: self.content,
            sig: None,
        }
    }
}
