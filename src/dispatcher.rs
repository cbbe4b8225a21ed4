/// ResponseDispatcher — correlates inbound responses to outbound
/// requests by Token (§4.4)
///
/// Message ID correlation lives with [`crate::reliability`]; this
/// component sits one layer up and matches by Token scoped to the
/// remote endpoint, the way a request/response future is resolved in
/// the teacher's `AckManager::wait_for_ack` but generalized from "wait
/// for one ACK" to "wait for a response that may arrive piggybacked
/// immediately or separately, later, and be a success or an error".
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::message::{Message, Token, Type};
use crate::timer::{TimerHandle, TimerWheel};

/// Outcome delivered to the application for a single request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Response(Message),
    /// No response (piggybacked or separate) arrived before
    /// EXCHANGE_LIFETIME elapsed.
    NoResponse,
}

struct PendingRequest {
    callback: Box<dyn FnOnce(RequestOutcome) + Send>,
    expiry_timer: TimerHandle,
}

pub type PendingKey = (SocketAddr, Token);

pub struct ResponseDispatcher {
    exchange_lifetime: Duration,
    pending: HashMap<PendingKey, PendingRequest>,
    expiry_timers: TimerWheel<PendingKey>,
}

impl ResponseDispatcher {
    pub fn new(exchange_lifetime: Duration) -> Self {
        ResponseDispatcher {
            exchange_lifetime,
            pending: HashMap::new(),
            expiry_timers: TimerWheel::new(),
        }
    }

    /// Register a request awaiting a response. `callback` fires
    /// exactly once: either with the matched response, or with
    /// `NoResponse` if EXCHANGE_LIFETIME elapses first.
    pub fn register_request(
        &mut self,
        remote: SocketAddr,
        token: Token,
        now: Instant,
        callback: impl FnOnce(RequestOutcome) + Send + 'static,
    ) {
        let key = (remote, token);
        let timer = self
            .expiry_timers
            .schedule(now + self.exchange_lifetime, key);
        self.pending.insert(
            key,
            PendingRequest {
                callback: Box::new(callback),
                expiry_timer: timer,
            },
        );
    }

    /// Resolve a pending request with an inbound response. Returns
    /// `true` if a matching request was found and fired; `false` for
    /// an orphan response (no matching token for that remote), which
    /// the caller must handle per §4.4: RST for a Confirmable orphan,
    /// silent drop for a Non-confirmable one.
    pub fn resolve(&mut self, remote: SocketAddr, msg: Message) -> bool {
        let key = (remote, msg.token);
        let Some(pending) = self.pending.remove(&key) else {
            return false;
        };
        self.expiry_timers.cancel(pending.expiry_timer);
        (pending.callback)(RequestOutcome::Response(msg));
        true
    }

    /// Whether an orphan response (one with no matching pending
    /// request) should be rejected with a RST, per the inbound
    /// message's type.
    pub fn orphan_requires_reset(msg_type: Type) -> bool {
        matches!(msg_type, Type::Con)
    }

    /// Cancel a pending request without a result callback invocation,
    /// e.g. because the application dropped its handle.
    pub fn cancel(&mut self, remote: SocketAddr, token: Token) {
        if let Some(pending) = self.pending.remove(&(remote, token)) {
            self.expiry_timers.cancel(pending.expiry_timer);
        }
    }

    /// Fire `NoResponse` for every request whose EXCHANGE_LIFETIME has
    /// elapsed. Returns the (remote, token) keys that expired, so the
    /// caller can release the token back to the identifier allocator.
    pub fn poll_expired(&mut self, now: Instant) -> Vec<PendingKey> {
        let mut expired = Vec::new();
        for key in self.expiry_timers.poll(now) {
            if let Some(pending) = self.pending.remove(&key) {
                (pending.callback)(RequestOutcome::NoResponse);
                expired.push(key);
            }
        }
        expired
    }

    pub fn is_pending(&self, remote: SocketAddr, token: Token) -> bool {
        self.pending.contains_key(&(remote, token))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
