/// InboundDeduplicator — suppresses repeat Confirmable/Non-confirmable
/// deliveries (§4.3)
///
/// A CON that is retransmitted because its ACK was lost must be
/// answered again with the same cached reply, not redelivered to the
/// application. Keyed on (remote, message_id) the same way
/// [`crate::reliability::OutboundReliability`] keys its outbound
/// records, using the teacher's preference for a small struct wrapping
/// a `HashMap` rather than pulling in an external cache crate.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::message::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// First sighting of this (remote, message_id): the caller should
    /// process it normally.
    Fresh,
    /// A duplicate of an exchange still within EXCHANGE_LIFETIME. If a
    /// reply was already cached, it is returned for immediate replay.
    Duplicate(Option<Message>),
}

struct DedupEntry {
    expires_at: Instant,
    cached_reply: Option<Message>,
}

pub struct InboundDeduplicator {
    exchange_lifetime: Duration,
    entries: HashMap<(SocketAddr, u16), DedupEntry>,
}

impl InboundDeduplicator {
    pub fn new(exchange_lifetime: Duration) -> Self {
        InboundDeduplicator {
            exchange_lifetime,
            entries: HashMap::new(),
        }
    }

    /// Atomically check-then-insert: the first call for a given
    /// (remote, message_id) within the exchange's lifetime returns
    /// `Fresh` and opens the entry; every subsequent call returns
    /// `Duplicate` until the entry ages out.
    pub fn check_and_insert(&mut self, remote: SocketAddr, message_id: u16, now: Instant) -> Lookup {
        if let Some(entry) = self.entries.get(&(remote, message_id)) {
            if entry.expires_at > now {
                return Lookup::Duplicate(entry.cached_reply.clone());
            }
        }

        self.entries.insert(
            (remote, message_id),
            DedupEntry {
                expires_at: now + self.exchange_lifetime,
                cached_reply: None,
            },
        );
        Lookup::Fresh
    }

    /// Cache the reply that was sent for a (remote, message_id)
    /// exchange so a later duplicate CON can be answered without
    /// redelivering it to the application.
    pub fn cache_reply(&mut self, remote: SocketAddr, message_id: u16, reply: Message) {
        if let Some(entry) = self.entries.get_mut(&(remote, message_id)) {
            entry.cached_reply = Some(reply);
        }
    }

    /// Drop every entry whose EXCHANGE_LIFETIME has elapsed. Should be
    /// driven periodically by the router alongside the reliability and
    /// identifier-allocator expiry sweeps.
    pub fn sweep_expired(&mut self, now: Instant) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Code, Token, Type};

    fn remote() -> SocketAddr {
        "127.0.0.1:5683".parse().unwrap()
    }

    #[test]
    fn first_sighting_is_fresh_then_duplicate() {
        let mut dedup = InboundDeduplicator::new(Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(dedup.check_and_insert(remote(), 1, now), Lookup::Fresh);
        assert_eq!(
            dedup.check_and_insert(remote(), 1, now + Duration::from_secs(1)),
            Lookup::Duplicate(None)
        );
    }

    #[test]
    fn duplicate_replays_cached_reply() {
        let mut dedup = InboundDeduplicator::new(Duration::from_secs(60));
        let now = Instant::now();
        dedup.check_and_insert(remote(), 1, now);
        let reply = Message::new(Type::Ack, Code::new(2, 5), 1, Token::from_slice(&[1]));
        dedup.cache_reply(remote(), 1, reply.clone());

        let lookup = dedup.check_and_insert(remote(), 1, now + Duration::from_secs(1));
        assert_eq!(lookup, Lookup::Duplicate(Some(reply)));
    }

    #[test]
    fn entry_ages_out_after_exchange_lifetime() {
        let mut dedup = InboundDeduplicator::new(Duration::from_secs(10));
        let now = Instant::now();
        dedup.check_and_insert(remote(), 1, now);
        let fresh_again = dedup.check_and_insert(remote(), 1, now + Duration::from_secs(11));
        assert_eq!(fresh_again, Lookup::Fresh);
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let mut dedup = InboundDeduplicator::new(Duration::from_secs(5));
        let now = Instant::now();
        dedup.check_and_insert(remote(), 1, now);
        dedup.check_and_insert(remote(), 2, now);
        dedup.sweep_expired(now + Duration::from_secs(10));
        assert!(dedup.is_empty());
    }

    #[test]
    fn distinct_message_ids_are_independent() {
        let mut dedup = InboundDeduplicator::new(Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(dedup.check_and_insert(remote(), 1, now), Lookup::Fresh);
        assert_eq!(dedup.check_and_insert(remote(), 2, now), Lookup::Fresh);
    }
}
