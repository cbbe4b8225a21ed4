/// MessageRouter — the single arbiter sitting above identifiers,
/// reliability, dedup, dispatch, and observe (§4.6)
///
/// Owns every other component and exposes the two entry points an
/// embedding application drives: [`MessageRouter::send_request`] for
/// outbound traffic and [`MessageRouter::on_inbound`] for datagrams
/// read off the socket. Socket I/O itself stays external (§1); this
/// type only ever hands back the bytes that need writing.
use std::net::SocketAddr;
use std::time::Instant;

use crate::codec;
use crate::config::ConfigData;
use crate::dedup::{InboundDeduplicator, Lookup};
use crate::dispatcher::ResponseDispatcher;
use crate::error::CoapError;
use crate::identifiers::IdentifierAllocator;
use crate::message::{Code, Message, Token, Type};
use crate::observe::{self, ObservationRegistry};
use crate::reliability::{OutboundReliability, ReliabilityObserver};

/// What the caller must do after feeding a datagram to
/// [`MessageRouter::on_inbound`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RouterAction {
    /// Bytes that must be written back to `remote` (an ACK, a RST, or
    /// a cached reply replay).
    pub to_send: Option<Vec<u8>>,
    /// A message to hand to the application: an inbound request, a
    /// resolved response, or a fresh Observe notification.
    pub deliver: Option<Message>,
}

/// Forwards reliability lifecycle events to both the Observe table and
/// the identifier allocator, so a token is released the moment the
/// exchange holding it (a notification or a plain request) is rejected
/// or times out — the same instant [`ObservationRegistry`] would
/// otherwise deregister it on its own.
struct RouterObserver<'a> {
    observe: &'a mut ObservationRegistry,
    identifiers: &'a mut IdentifierAllocator,
}

impl ReliabilityObserver for RouterObserver<'_> {
    fn message_id_assigned(&mut self, remote: SocketAddr, token: Token, message_id: u16) {
        self.observe.message_id_assigned(remote, token, message_id);
    }

    fn empty_ack_received(&mut self, remote: SocketAddr, token: Token, message_id: u16) {
        self.observe.empty_ack_received(remote, token, message_id);
    }

    fn transmission_succeeded(&mut self, remote: SocketAddr, token: Token, message_id: u16) {
        self.observe.transmission_succeeded(remote, token, message_id);
    }

    fn reset_received(&mut self, remote: SocketAddr, token: Token, message_id: u16) {
        self.observe.reset_received(remote, token, message_id);
        self.identifiers.release_token(remote, token);
    }

    fn transmission_timeout(&mut self, remote: SocketAddr, token: Token, message_id: u16) {
        self.observe.transmission_timeout(remote, token, message_id);
        self.identifiers.release_token(remote, token);
    }
}

pub struct MessageRouter {
    config: ConfigData,
    identifiers: IdentifierAllocator,
    reliability: OutboundReliability,
    dedup: InboundDeduplicator,
    dispatcher: ResponseDispatcher,
    observe: ObservationRegistry,
}

impl MessageRouter {
    pub fn new(config: ConfigData) -> Self {
        MessageRouter {
            identifiers: IdentifierAllocator::new(),
            reliability: OutboundReliability::new(config),
            dedup: InboundDeduplicator::new(config.exchange_lifetime),
            dispatcher: ResponseDispatcher::new(config.exchange_lifetime),
            observe: ObservationRegistry::new(config.observe_heartbeat_interval),
            config,
        }
    }

    fn observer(&mut self) -> RouterObserver<'_> {
        RouterObserver {
            observe: &mut self.observe,
            identifiers: &mut self.identifiers,
        }
    }

    /// Send a request. Assigns a fresh Message ID and Token and
    /// registers the response callback. Passing `observe_request` sets
    /// `Observe: 0` on the outbound message to ask the server to admit
    /// an observation, and records the token via
    /// [`ObservationRegistry::track_observer`] so this endpoint
    /// recognizes later pushed notifications for it. Admission itself —
    /// the content-negotiation state a producer needs — is only ever
    /// registered on the serving endpoint, in
    /// [`MessageRouter::send_response`] (§4.5 admission runs on the
    /// server, not the requester). Returns the datagram to write to the
    /// socket.
    pub fn send_request(
        &mut self,
        mut msg: Message,
        remote: SocketAddr,
        confirmable: bool,
        observe_request: bool,
        now: Instant,
        callback: impl FnOnce(crate::dispatcher::RequestOutcome) + Send + 'static,
    ) -> Vec<u8> {
        msg.message_id = self.identifiers.next_message_id(remote);
        msg.token = self.identifiers.new_token(remote);
        msg.mtype = if confirmable { Type::Con } else { Type::Non };
        if observe_request {
            msg.options.insert(crate::message::OptionNumber::OBSERVE, vec![0]);
            // track this token so later pushed notifications (which
            // never pass back through `register_request`'s one-shot
            // callback) are still recognized as ours to deliver.
            self.observe.track_observer(remote, msg.token, now);
        }

        self.dispatcher
            .register_request(remote, msg.token, now, callback);

        if confirmable {
            let mut observer = self.observer();
            let (_, bytes) = self.reliability.send_confirmable(msg, remote, now, &mut observer);
            bytes
        } else {
            self.reliability.send_nonconfirmable(&msg)
        }
    }

    /// Decode and route one inbound datagram.
    pub fn on_inbound(&mut self, bytes: &[u8], remote: SocketAddr, now: Instant) -> RouterAction {
        let msg = match codec::decode(bytes) {
            Ok(msg) => msg,
            Err(err) => {
                let err = CoapError::from(err);
                log::warn!("dropping malformed datagram from {}: {}", remote, err);
                let to_send = match codec::peek_header(bytes) {
                    Some((Type::Con, message_id)) => {
                        Some(codec::encode(&Message::empty(Type::Rst, message_id)))
                    }
                    _ => None,
                };
                return RouterAction {
                    to_send,
                    deliver: None,
                };
            }
        };

        match msg.mtype {
            Type::Ack | Type::Rst => self.handle_ack_or_rst(msg, remote),
            Type::Con | Type::Non => self.handle_con_or_non(msg, remote, now),
        }
    }

    fn handle_ack_or_rst(&mut self, msg: Message, remote: SocketAddr) -> RouterAction {
        let mut observer = self.observer();
        let matched = self
            .reliability
            .observe_inbound_ack_or_rst(&msg, remote, &mut observer);

        let Some(handle) = matched else {
            return RouterAction::default();
        };

        if msg.mtype == Type::Ack && !msg.is_empty_message() {
            let deliver = msg.clone();
            if self.dispatcher.resolve(remote, msg) {
                self.identifiers.release_token(handle.remote, deliver.token);
            }
            return RouterAction {
                to_send: None,
                deliver: Some(deliver),
            };
        }

        if msg.mtype == Type::Rst {
            let err = CoapError::PeerReset {
                remote: handle.remote,
                message_id: msg.message_id,
            };
            log::warn!("{}", err);
            // a RST rejects the exchange outright: drop the pending
            // response callback too, rather than leaving it to expire
            // at EXCHANGE_LIFETIME and risk a later stray message with
            // the same token being mistaken for its response.
            self.dispatcher.cancel(handle.remote, msg.token);
            self.identifiers.release_token(handle.remote, msg.token);
        }

        RouterAction::default()
    }

    fn handle_con_or_non(&mut self, msg: Message, remote: SocketAddr, now: Instant) -> RouterAction {
        match self.dedup.check_and_insert(remote, msg.message_id, now) {
            Lookup::Duplicate(Some(cached)) => {
                let err = CoapError::DuplicateSuppressed {
                    remote,
                    message_id: msg.message_id,
                };
                log::debug!("{} (replaying cached reply)", err);
                return RouterAction {
                    to_send: Some(codec::encode(&cached)),
                    deliver: None,
                };
            }
            Lookup::Duplicate(None) => {
                let err = CoapError::DuplicateSuppressed {
                    remote,
                    message_id: msg.message_id,
                };
                log::debug!("{} (no cached reply yet)", err);
                return RouterAction::default();
            }
            Lookup::Fresh => {}
        }

        if msg.code.is_request() {
            if let Some((number, _)) = msg.options.iter().find(|(n, _)| !crate::catalog::is_meaningful(msg.code, *n)) {
                let err = CoapError::OptionNotMeaningful {
                    code: msg.code,
                    option: *number,
                };
                log::warn!("rejecting request from {}: {}", remote, err);
                let bad_option = Message::new(Type::Ack, Code::new(4, 2), msg.message_id, msg.token);
                self.dedup.cache_reply(remote, msg.message_id, bad_option.clone());
                return RouterAction {
                    to_send: Some(codec::encode(&bad_option)),
                    deliver: None,
                };
            }

            // §4.5 Deregistration trigger (a): an inbound GET carrying
            // `Observe: 1` cancels any observation previously admitted
            // for this (remote, token) pair. Admission itself (value
            // 0) happens after the response is queued, in
            // `send_response`.
            if msg.code == Code::GET && observe::observe_value(&msg) == Some(1) {
                self.observe.deregister(remote, msg.token);
                self.identifiers.release_token(remote, msg.token);
            }

            return RouterAction {
                to_send: None,
                deliver: Some(msg),
            };
        }

        self.handle_inbound_response(msg, remote, now)
    }

    fn handle_inbound_response(&mut self, msg: Message, remote: SocketAddr, now: Instant) -> RouterAction {
        let notification_serial = observe::observe_value(&msg);
        let is_fresh_notification = match notification_serial {
            Some(serial) => self.observe.accept_notification(remote, msg.token, serial, now),
            None => false,
        };
        let is_notification_candidate =
            notification_serial.is_some() && self.observe.is_registered(remote, msg.token);

        if is_notification_candidate && !is_fresh_notification {
            log::debug!("dropping stale notification from {}", remote);
            return RouterAction::default();
        }

        let resolved = self.dispatcher.resolve(remote, msg.clone());
        if resolved {
            self.identifiers.release_token(remote, msg.token);
        }
        let deliverable = resolved || is_notification_candidate;

        let ack_bytes = if msg.mtype == Type::Con {
            let ack = Message::empty(Type::Ack, msg.message_id);
            self.dedup.cache_reply(remote, msg.message_id, ack.clone());
            Some(codec::encode(&ack))
        } else {
            None
        };

        if deliverable {
            RouterAction {
                to_send: ack_bytes,
                deliver: Some(msg),
            }
        } else {
            log::warn!("orphan response from {} (message id {})", remote, msg.message_id);
            let to_send = if msg.mtype == Type::Con {
                Some(codec::encode(&Message::empty(Type::Rst, msg.message_id)))
            } else {
                None
            };
            RouterAction {
                to_send,
                deliver: None,
            }
        }
    }

    /// Produce a response to an inbound request previously delivered
    /// via [`MessageRouter::on_inbound`]. `piggyback` should be
    /// `true` when the caller can answer within
    /// [`MessageRouter::should_piggyback`] of the request's arrival.
    ///
    /// When `request` is a GET carrying `Observe: 0`, this is also
    /// where the Observe admission happens (§4.5): the response's own
    /// Observe option is set to the initial notification serial, and
    /// `request`'s ETag option(s) seed the observer's known
    /// representations, after which `ObservationRegistry::register` is
    /// called — deliberately after the response bytes are built, since
    /// admission is defined to occur only once the initial response has
    /// been queued.
    pub fn send_response(
        &mut self,
        remote: SocketAddr,
        request: &Message,
        mut response: Message,
        piggyback: bool,
        now: Instant,
    ) -> Vec<u8> {
        response.token = request.token;

        let observe_admission = request.code == Code::GET
            && observe::observe_value(request) == Some(0)
            && response.code.is_success();

        if observe_admission {
            response
                .options
                .insert(crate::message::OptionNumber::OBSERVE, observe::encode_uint_option(0));
        }
        let content_format = observe::content_format_of(&response);
        let etags_known = observe::etags_of(request);

        let bytes = if piggyback {
            response.mtype = Type::Ack;
            response.message_id = request.message_id;
            self.dedup
                .cache_reply(remote, request.message_id, response.clone());
            codec::encode(&response)
        } else {
            response.mtype = if request.mtype == Type::Con {
                Type::Con
            } else {
                Type::Non
            };
            response.message_id = self.identifiers.next_message_id(remote);
            if response.mtype == Type::Con {
                let mut observer = self.observer();
                let (_, bytes) = self
                    .reliability
                    .send_confirmable(response, remote, now, &mut observer);
                bytes
            } else {
                self.reliability.send_nonconfirmable(&response)
            }
        };

        if observe_admission {
            self.observe
                .register(remote, request.token, content_format, etags_known, now);
        }

        bytes
    }

    /// Produce and send the next Observe notification for an admitted
    /// observation, via [`ObservationRegistry::produce_notification`].
    /// Returns `None` if `(remote, token)` is not a registered
    /// observation; otherwise the datagram to write to the socket.
    pub fn send_notification(
        &mut self,
        remote: SocketAddr,
        token: Token,
        available: &[observe::ContentSnapshot],
        policy: &dyn observe::NotificationPolicy,
        now: Instant,
    ) -> Option<Vec<u8>> {
        let produced = self.observe.produce_notification(remote, token, available, policy)?;
        let mut message = produced.message;
        message.token = token;
        message.message_id = self.identifiers.next_message_id(remote);
        message.mtype = if produced.confirmable { Type::Con } else { Type::Non };

        let bytes = if produced.confirmable {
            let mut observer = self.observer();
            let (_, bytes) = self
                .reliability
                .send_confirmable(message, remote, now, &mut observer);
            bytes
        } else {
            self.reliability.send_nonconfirmable(&message)
        };

        if produced.deregistered {
            self.identifiers.release_token(remote, token);
        }

        Some(bytes)
    }

    /// Whether a response generated this long after the triggering
    /// request's arrival should still be piggybacked on its ACK,
    /// rather than sent as a separate response (§4.6).
    pub fn should_piggyback(&self, elapsed_since_request: std::time::Duration) -> bool {
        elapsed_since_request < self.config.ack_timeout / 2
    }

    /// Drive every time-based housekeeping sweep: retransmissions,
    /// record/dedup/pending-request expiry, and Observe heartbeats.
    /// Returns datagrams that must be written to sockets as a result
    /// (retransmitted CONs) plus the (remote, token) pairs whose
    /// Observe relationship is due for a heartbeat notification (the
    /// application must generate and send that notification itself).
    pub fn poll(&mut self, now: Instant) -> (Vec<(SocketAddr, Vec<u8>)>, Vec<(SocketAddr, Token)>) {
        let mut observer = self.observer();
        let outbound = self.reliability.poll_retransmits(now, &mut observer);

        for (remote, message_id) in self.reliability.poll_expired_records(now) {
            self.identifiers.release_message_id(remote, message_id);
        }

        self.dedup.sweep_expired(now);
        for (remote, token) in self.dispatcher.poll_expired(now) {
            self.identifiers.release_token(remote, token);
        }
        let heartbeats = self.observe.poll_heartbeats(now);

        (outbound, heartbeats)
    }
}
