/*
    address.rs - Shareable pointers to a list

    ListAddress names a list by its coordinate plus, when one is known, the
    best relay to fetch it from. encode() produces an opaque string: a
    type-length-value record encoded with base58.

    TLV records (type, length as one byte, value):
    - 0: identifier, UTF-8
    - 1: relay url, UTF-8 (omitted without a hint)
    - 2: author, 32 bytes
    - 3: kind, 4 bytes big-endian
*/

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::{ListError, ListResult};
use crate::core_event::{Coordinate, Kind, PublicKey, RelayUrl};

const TLV_IDENTIFIER: u8 = 0;
const TLV_RELAY: u8 = 1;
const TLV_AUTHOR: u8 = 2;
const TLV_KIND: u8 = 3;

/// Where to find a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListAddress {
    pub author: PublicKey,
    pub identifier: String,
    pub kind: Kind,
    /// Best-ranked relay known to carry the current revision
    pub relay: Option<RelayUrl>,
}

impl ListAddress {
    pub fn new(coordinate: &Coordinate, relay: Option<RelayUrl>) -> Self {
        ListAddress {
            author: coordinate.author,
            identifier: coordinate.identifier.clone(),
            kind: coordinate.kind,
            relay,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.kind, self.author, self.identifier.clone())
    }

    /// Opaque shareable form
    ///
    /// Fails only when the identifier does not fit a TLV record. A relay url
    /// too long for a record is left out.
    pub fn encode(&self) -> ListResult<String> {
        let identifier = self.identifier.as_bytes();
        if identifier.len() > u8::MAX as usize {
            return Err(ListError::IdentifierTooLong(identifier.len()));
        }

        let mut tlv = Vec::with_capacity(identifier.len() + 48);
        push_record(&mut tlv, TLV_IDENTIFIER, identifier);
        if let Some(relay) = &self.relay {
            let relay = relay.as_str().as_bytes();
            if relay.len() <= u8::MAX as usize {
                push_record(&mut tlv, TLV_RELAY, relay);
            }
        }
        push_record(&mut tlv, TLV_AUTHOR, self.author.as_bytes());
        push_record(&mut tlv, TLV_KIND, &u32::from(self.kind.as_u16()).to_be_bytes());

        Ok(bs58::encode(tlv).into_string())
    }
}

fn push_record(out: &mut Vec<u8>, kind: u8, value: &[u8]) {
    out.push(kind);
    out.push(value.len() as u8);
    out.extend_from_slice(value);
}

impl fmt::Display for ListAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.coordinate())?;
        if let Some(relay) = &self.relay {
            write!(f, " via {}", relay)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{pubkey, relay};

    fn records(encoded: &str) -> Vec<(u8, Vec<u8>)> {
        let bytes = bs58::decode(encoded).into_vec().unwrap();
        let mut out = Vec::new();
        let mut rest = &bytes[..];
        while !rest.is_empty() {
            let (kind, len) = (rest[0], rest[1] as usize);
            out.push((kind, rest[2..2 + len].to_vec()));
            rest = &rest[2 + len..];
        }
        out
    }

    #[test]
    fn test_encode_carries_every_field() {
        let address = ListAddress {
            author: pubkey(7),
            identifier: "friends".to_string(),
            kind: Kind::PEOPLE_LIST,
            relay: Some(relay("best")),
        };

        let records = records(&address.encode().unwrap());
        assert_eq!(
            records,
            vec![
                (TLV_IDENTIFIER, b"friends".to_vec()),
                (TLV_RELAY, b"wss://best.example".to_vec()),
                (TLV_AUTHOR, vec![7; 32]),
                (TLV_KIND, 30000u32.to_be_bytes().to_vec()),
            ]
        );
    }

    #[test]
    fn test_encode_without_relay_hint() {
        let address = ListAddress::new(
            &Coordinate::new(Kind::PEOPLE_LIST, pubkey(1), "mute"),
            None,
        );
        let kinds: Vec<u8> = records(&address.encode().unwrap())
            .into_iter()
            .map(|(kind, _)| kind)
            .collect();
        assert_eq!(kinds, vec![TLV_IDENTIFIER, TLV_AUTHOR, TLV_KIND]);
    }

    #[test]
    fn test_oversized_identifier_is_rejected() {
        let address = ListAddress::new(
            &Coordinate::new(Kind::PEOPLE_LIST, pubkey(1), "x".repeat(300)),
            None,
        );
        assert_eq!(address.encode(), Err(ListError::IdentifierTooLong(300)));
    }

    #[test]
    fn test_display_shows_coordinate_and_relay() {
        let address = ListAddress::new(
            &Coordinate::new(Kind::PEOPLE_LIST, pubkey(1), "mute"),
            Some(relay("a")),
        );
        assert_eq!(
            address.to_string(),
            format!("30000:{}:mute via wss://a.example", "01".repeat(32))
        );
    }
}
