/// IdentifierAllocator — Message ID and Token generation (§4.1)
///
/// Hands out 16-bit Message IDs per remote endpoint and 1-8 byte
/// Tokens per endpoint pair, following the teacher's preference for
/// small stateful structs driven by `rand` rather than a hand-rolled
/// PRNG.
use std::collections::HashMap;
use std::net::SocketAddr;

use rand::RngCore;

use crate::message::Token;

const TOKEN_LEN: usize = 4;

/// Per-remote Message ID counter plus the per-remote live token set
/// used for collision avoidance.
#[derive(Default)]
struct RemoteState {
    next_message_id: u16,
    live_tokens: std::collections::HashSet<Token>,
    live_message_ids: std::collections::HashSet<u16>,
}

/// Allocates Message IDs and Tokens, scoped per remote endpoint
/// (§9: the spec adopts per-remote token scope over the source's
/// global scope).
pub struct IdentifierAllocator {
    remotes: HashMap<SocketAddr, RemoteState>,
}

impl IdentifierAllocator {
    pub fn new() -> Self {
        IdentifierAllocator {
            remotes: HashMap::new(),
        }
    }

    fn remote_mut(&mut self, remote: SocketAddr) -> &mut RemoteState {
        self.remotes.entry(remote).or_insert_with(|| RemoteState {
            next_message_id: rand::thread_rng().next_u32() as u16,
            live_tokens: Default::default(),
            live_message_ids: Default::default(),
        })
    }

    /// Returns the next Message ID for `remote`, skipping any value
    /// still referenced by a live exchange (§4.1 contract).
    pub fn next_message_id(&mut self, remote: SocketAddr) -> u16 {
        let state = self.remote_mut(remote);
        loop {
            let candidate = state.next_message_id;
            state.next_message_id = state.next_message_id.wrapping_add(1);
            if !state.live_message_ids.contains(&candidate) {
                state.live_message_ids.insert(candidate);
                return candidate;
            }
        }
    }

    /// Releases a Message ID once its owning exchange (TransmissionRecord
    /// or DedupEntry) has aged out, making it eligible for reissue.
    pub fn release_message_id(&mut self, remote: SocketAddr, message_id: u16) {
        if let Some(state) = self.remotes.get_mut(&remote) {
            state.live_message_ids.remove(&message_id);
        }
    }

    /// Returns a fresh Token unique within `remote`'s live
    /// PendingRequest/Observation set, retrying on collision.
    pub fn new_token(&mut self, remote: SocketAddr) -> Token {
        let state = self.remote_mut(remote);
        loop {
            let mut bytes = [0u8; TOKEN_LEN];
            rand::thread_rng().fill_bytes(&mut bytes);
            let candidate = Token::from_slice(&bytes);
            if !state.live_tokens.contains(&candidate) {
                state.live_tokens.insert(candidate);
                return candidate;
            }
        }
    }

    /// Releases a token once its PendingRequest/Observation entry is
    /// removed.
    pub fn release_token(&mut self, remote: SocketAddr, token: Token) {
        if let Some(state) = self.remotes.get_mut(&remote) {
            state.live_tokens.remove(&token);
        }
    }
}

impl Default for IdentifierAllocator {
    fn default() -> Self {
        Self::new()
    }
}
