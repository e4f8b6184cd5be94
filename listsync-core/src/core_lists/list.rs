//! A single people list and its convergent state
//!
//! The list keeps the newest event seen for its coordinate. Members are a
//! projection of that event's `p` tags and are republished through a
//! [`StateCell`] whenever a newer revision wins.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::address::ListAddress;
use super::errors::{ListError, ListResult};
use crate::core_event::{Coordinate, Event, EventDraft, Kind, PublicKey, RelayUrl, Tag, Timestamp};
use crate::core_relay::{RelayRanking, SeenOnRelays};
use crate::core_state::StateCell;

/// One member of a list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListMember {
    pub pubkey: PublicKey,
    /// Relay hint carried by the `p` tag
    pub relay: Option<RelayUrl>,
}

/// Result of offering an event to a list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Strictly newer; the event replaced the current one
    Applied,
    /// Not newer (ties included); nothing changed
    Stale,
    /// Different coordinate; nothing changed
    Foreign,
}

pub struct PeopleList {
    coordinate: Coordinate,
    current: RwLock<Event>,
    members: StateCell<Vec<ListMember>>,
}

impl PeopleList {
    /// Build a list from its first observed event
    pub fn new(event: Event) -> ListResult<Self> {
        if event.kind != Kind::PEOPLE_LIST {
            return Err(ListError::WrongKind(event.kind));
        }
        let coordinate = event.coordinate().ok_or(ListError::MissingIdentifier)?;
        let members = StateCell::new(project_members(&event));

        Ok(PeopleList {
            coordinate,
            current: RwLock::new(event),
            members,
        })
    }

    /// Last-write-wins by `created_at`
    pub fn apply_event(&self, event: Event) -> ApplyOutcome {
        if event.coordinate().as_ref() != Some(&self.coordinate) {
            return ApplyOutcome::Foreign;
        }

        let members = {
            let mut current = self.current.write();
            if event.created_at <= current.created_at {
                return ApplyOutcome::Stale;
            }
            *current = event;
            project_members(&current)
        };

        self.members.set(members);
        ApplyOutcome::Applied
    }

    pub fn coordinate(&self) -> &Coordinate {
        &self.coordinate
    }

    /// The list's name, taken from its `d` tag
    pub fn name(&self) -> &str {
        &self.coordinate.identifier
    }

    pub fn author(&self) -> PublicKey {
        self.coordinate.author
    }

    pub fn kind(&self) -> Kind {
        self.coordinate.kind
    }

    /// Current winning event
    pub fn event(&self) -> Event {
        self.current.read().clone()
    }

    pub fn created_at(&self) -> Timestamp {
        self.current.read().created_at
    }

    pub fn members(&self) -> StateCell<Vec<ListMember>> {
        self.members.clone()
    }

    pub fn contains(&self, pubkey: &PublicKey) -> bool {
        self.current
            .read()
            .member_tags()
            .any(|(member, _)| member == *pubkey)
    }

    /// Address pointing at the best-ranked relay that delivered the current event
    pub fn address(&self, ranking: &dyn RelayRanking, seen: &SeenOnRelays) -> ListAddress {
        let candidates = seen.relays_for(&self.current.read().id);
        ListAddress::new(&self.coordinate, ranking.best(&candidates))
    }

    /// Unsigned revision with `pubkey` appended as a member
    pub fn draft_add_member(
        &self,
        pubkey: &PublicKey,
        relay: Option<&RelayUrl>,
    ) -> ListResult<EventDraft> {
        let current = self.current.read();
        if current.member_tags().any(|(member, _)| member == *pubkey) {
            return Err(ListError::AlreadyMember(*pubkey));
        }

        let mut tags = current.tags.clone();
        tags.push(Tag::member(pubkey, relay));
        Ok(revision(&current, tags))
    }

    /// Unsigned revision with every `p` tag for `pubkey` removed
    pub fn draft_remove_member(&self, pubkey: &PublicKey) -> ListResult<EventDraft> {
        let current = self.current.read();
        let tags: Vec<Tag> = current
            .tags
            .iter()
            .filter(|tag| !tag.is_member_tag_for(pubkey))
            .cloned()
            .collect();
        if tags.len() == current.tags.len() {
            return Err(ListError::NotMember(*pubkey));
        }
        Ok(revision(&current, tags))
    }
}

impl fmt::Debug for PeopleList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.read();
        f.debug_struct("PeopleList")
            .field("coordinate", &self.coordinate)
            .field("event", &current.id)
            .field("created_at", &current.created_at)
            .finish()
    }
}

/// Members in tag order; the first tag for a pubkey wins
fn project_members(event: &Event) -> Vec<ListMember> {
    let mut seen = HashSet::new();
    event
        .member_tags()
        .filter(|(pubkey, _)| seen.insert(*pubkey))
        .map(|(pubkey, relay)| ListMember { pubkey, relay })
        .collect()
}

// A draft must beat the revision it was derived from, even if the local
// clock is behind.
fn revision(current: &Event, tags: Vec<Tag>) -> EventDraft {
    let created_at = Timestamp::now().max(Timestamp(current.created_at.as_secs() + 1));
    EventDraft {
        kind: current.kind,
        created_at,
        tags,
        content: current.content.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_relay::{RelayFeedback, RelayScoreboard};
    use crate::test_utils::{pubkey, relay, unique_event_id, ListEventBuilder};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn member_keys(list: &PeopleList) -> Vec<PublicKey> {
        list.members().get().into_iter().map(|m| m.pubkey).collect()
    }

    #[test]
    fn test_new_requires_identifier() {
        let event = ListEventBuilder::new(pubkey(1), "x").without_identifier().build();
        assert_eq!(PeopleList::new(event).unwrap_err(), ListError::MissingIdentifier);
    }

    #[test]
    fn test_new_rejects_other_kinds() {
        let event = ListEventBuilder::new(pubkey(1), "x").with_kind(Kind(30001)).build();
        assert_eq!(PeopleList::new(event).unwrap_err(), ListError::WrongKind(Kind(30001)));
    }

    #[test]
    fn test_newer_event_replaces_members() {
        let (alice, bob) = (pubkey(0xa), pubkey(0xb));
        let list = PeopleList::new(
            ListEventBuilder::new(pubkey(1), "friends")
                .created_at(100)
                .with_member(&alice)
                .build(),
        )
        .unwrap();

        let newer = ListEventBuilder::new(pubkey(1), "friends")
            .created_at(200)
            .with_member(&alice)
            .with_member(&bob)
            .build();
        assert_eq!(list.apply_event(newer), ApplyOutcome::Applied);
        assert_eq!(list.created_at(), Timestamp(200));
        assert_eq!(member_keys(&list), vec![alice, bob]);
    }

    #[test]
    fn test_older_and_equal_events_are_stale() {
        let list = PeopleList::new(
            ListEventBuilder::new(pubkey(1), "friends")
                .created_at(200)
                .with_member(&pubkey(2))
                .build(),
        )
        .unwrap();
        let before = list.event();

        let older = ListEventBuilder::new(pubkey(1), "friends")
            .created_at(150)
            .with_member(&pubkey(3))
            .build();
        let tie = ListEventBuilder::new(pubkey(1), "friends")
            .created_at(200)
            .with_member(&pubkey(4))
            .build();

        assert_eq!(list.apply_event(older), ApplyOutcome::Stale);
        assert_eq!(list.apply_event(tie), ApplyOutcome::Stale);
        assert_eq!(list.event(), before);
        assert_eq!(member_keys(&list), vec![pubkey(2)]);
    }

    #[test]
    fn test_foreign_coordinate_is_ignored() {
        let list = PeopleList::new(ListEventBuilder::new(pubkey(1), "friends").build()).unwrap();

        let other_name = ListEventBuilder::new(pubkey(1), "mute").created_at(9).build();
        let other_author = ListEventBuilder::new(pubkey(2), "friends").created_at(9).build();
        assert_eq!(list.apply_event(other_name), ApplyOutcome::Foreign);
        assert_eq!(list.apply_event(other_author), ApplyOutcome::Foreign);
        assert_eq!(list.created_at(), Timestamp(1));
    }

    #[test]
    fn test_members_skip_repeats_and_bad_tags() {
        let hint = relay("hint");
        let event = ListEventBuilder::new(pubkey(1), "friends")
            .with_member_at(&pubkey(2), &hint)
            .with_tag(Tag::new(["p", "not-a-key"]))
            .with_member(&pubkey(2))
            .with_member(&pubkey(3))
            .build();
        let list = PeopleList::new(event).unwrap();

        assert_eq!(
            list.members().get(),
            vec![
                ListMember { pubkey: pubkey(2), relay: Some(hint) },
                ListMember { pubkey: pubkey(3), relay: None },
            ]
        );
        assert!(list.contains(&pubkey(3)));
        assert!(!list.contains(&pubkey(4)));
    }

    #[test]
    fn test_member_observers_only_see_applied_revisions() {
        let list = PeopleList::new(ListEventBuilder::new(pubkey(1), "friends").created_at(10).build())
            .unwrap();
        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = list.members().subscribe(move |members| sink.lock().push(members.len()));

        list.apply_event(ListEventBuilder::new(pubkey(1), "friends").created_at(5).build());
        list.apply_event(
            ListEventBuilder::new(pubkey(1), "friends")
                .created_at(20)
                .with_member(&pubkey(2))
                .build(),
        );

        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[test]
    fn test_address_uses_best_ranked_relay() {
        let event = ListEventBuilder::new(pubkey(1), "friends").build();
        let seen = SeenOnRelays::new();
        seen.record(event.id, &relay("slow"));
        seen.record(event.id, &relay("fast"));

        let scoreboard = RelayScoreboard::new();
        scoreboard.record_response(&relay("slow"), Duration::from_millis(900));
        scoreboard.record_response(&relay("fast"), Duration::from_millis(20));

        let list = PeopleList::new(event).unwrap();
        let address = list.address(&scoreboard, &seen);
        assert_eq!(address.relay, Some(relay("fast")));
        assert_eq!(address.identifier, "friends");
        assert_eq!(address.author, pubkey(1));
    }

    #[test]
    fn test_address_without_known_relays() {
        let list = PeopleList::new(ListEventBuilder::new(pubkey(1), "friends").build()).unwrap();
        let address = list.address(&RelayScoreboard::new(), &SeenOnRelays::new());
        assert_eq!(address.relay, None);
    }

    #[test]
    fn test_draft_add_member() {
        let list = PeopleList::new(
            ListEventBuilder::new(pubkey(1), "friends")
                .created_at(100)
                .with_member(&pubkey(2))
                .with_content("kept")
                .build(),
        )
        .unwrap();

        let draft = list.draft_add_member(&pubkey(3), Some(&relay("r"))).unwrap();
        assert_eq!(draft.kind, Kind::PEOPLE_LIST);
        assert_eq!(draft.content, "kept");
        assert!(draft.created_at > Timestamp(100));
        assert_eq!(draft.tags.last(), Some(&Tag::member(&pubkey(3), Some(&relay("r")))));
        assert_eq!(draft.tags[0], Tag::identifier("friends"));

        assert_eq!(
            list.draft_add_member(&pubkey(2), None).unwrap_err(),
            ListError::AlreadyMember(pubkey(2))
        );
    }

    #[test]
    fn test_draft_remove_member() {
        let list = PeopleList::new(
            ListEventBuilder::new(pubkey(1), "friends")
                .with_member(&pubkey(2))
                .with_member(&pubkey(3))
                .with_member_at(&pubkey(2), &relay("dup"))
                .build(),
        )
        .unwrap();

        let draft = list.draft_remove_member(&pubkey(2)).unwrap();
        assert_eq!(
            draft.tags,
            vec![Tag::identifier("friends"), Tag::member(&pubkey(3), None)]
        );
        assert_eq!(
            list.draft_remove_member(&pubkey(9)).unwrap_err(),
            ListError::NotMember(pubkey(9))
        );
    }

    #[test]
    fn test_draft_beats_future_dated_revision() {
        let far_future = Timestamp::now().as_secs() + 10_000;
        let list = PeopleList::new(
            ListEventBuilder::new(pubkey(1), "friends")
                .with_id(unique_event_id())
                .created_at(far_future)
                .build(),
        )
        .unwrap();

        let draft = list.draft_add_member(&pubkey(2), None).unwrap();
        assert_eq!(draft.created_at, Timestamp(far_future + 1));
    }
}
