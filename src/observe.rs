/// ObservationRegistry — RFC 7641 Observe relationship lifecycle (§4.5)
///
/// An observation is keyed by (remote, token), mirroring
/// [`crate::dispatcher::ResponseDispatcher`]'s scoping, and tracks the
/// 24-bit notification serial with the freshness arithmetic from
/// RFC 7641 §3.4. Table access is `&self`-and-lock the way the
/// teacher's `AckManager` exposes stateless, reentrant operations, but
/// generalized to real mutable shared state via `RwLock` since an
/// observation table is read far more often (every inbound datagram
/// consults it) than written (registration/notification/cancel).
///
/// This same table serves two roles depending on which side of an
/// exchange the owning [`crate::router::MessageRouter`] plays: the
/// server that admitted the observer calls [`ObservationRegistry::register`]
/// and [`ObservationRegistry::produce_notification`] to assign and
/// advance `notification_serial`; a client consuming someone else's
/// notifications instead calls [`ObservationRegistry::accept_notification`]
/// to apply the same serial purely as a freshness check. Nothing here
/// assumes one role exclusively.
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::error::CoapError;
use crate::message::{Code, Message, OptionNumber, Options, Token, Type};
use crate::timer::{TimerHandle, TimerWheel};

/// RFC 7641 §3.4: a 24-bit serial number space with wraparound. `v1`
/// is considered fresher than `v2` if the forward distance between
/// them (mod 2^24) is less than half the space, within a 128-second
/// window since the last observed value (the window is enforced by
/// the caller tracking `last_seen_at`, not by this function).
pub fn is_fresher(v1: u32, v2: u32) -> bool {
    const SPACE: u32 = 1 << 24;
    const HALF: u32 = SPACE / 2;
    let v1 = v1 & (SPACE - 1);
    let v2 = v2 & (SPACE - 1);
    (v1 > v2 && v1 - v2 < HALF) || (v1 < v2 && v2 - v1 > HALF)
}

/// RFC 7641 §3.4's 128-second freshness window.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(128);

/// Masks a serial back into the 24-bit Observe option space after an
/// increment.
const SERIAL_SPACE: u32 = 1 << 24;

/// Encode a CoAP uint option: big-endian, minimal length, zero-length
/// for value 0 (RFC 7252 §3.2).
pub fn encode_uint_option(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first_nonzero..].to_vec()
}

/// Decode a CoAP uint option of up to 4 bytes. Longer inputs are
/// truncated to their low-order bytes by the shift-accumulate, which
/// matches how [`observe_value`] has always treated an oversized
/// Observe option: callers that care about validity check the length
/// themselves first.
pub fn decode_uint_option(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32)
}

/// Extracts the Observe option's serial value from a GET request (must
/// be `0`, registering, or `1`, cancelling) or a notification (the
/// server-assigned counter), per RFC 7641 §3.1/§3.3.
pub fn observe_value(msg: &Message) -> Option<u32> {
    let bytes = msg.options.get_first(OptionNumber::OBSERVE)?;
    if bytes.len() > 3 {
        return None;
    }
    Some(decode_uint_option(bytes))
}

/// The Content-Format option carried on a message, defaulting to `0`
/// (text/plain) when absent, the way RFC 7252 §5.10.3 treats an
/// unstated format.
pub fn content_format_of(msg: &Message) -> u16 {
    msg.options
        .get_first(OptionNumber::CONTENT_FORMAT)
        .map(|bytes| decode_uint_option(bytes) as u16)
        .unwrap_or(0)
}

/// Every ETag option carried on a message, in wire order.
pub fn etags_of(msg: &Message) -> Vec<Vec<u8>> {
    msg.options.get_all(OptionNumber::ETAG).map(|b| b.to_vec()).collect()
}

/// A representation body this endpoint can hand to an observer: a
/// content-format-tagged snapshot the application provides when it
/// wants a notification produced, analogous to the response the
/// application would build for a plain GET of the same resource.
#[derive(Debug, Clone)]
pub struct ContentSnapshot {
    pub content_format: u16,
    pub bytes: Vec<u8>,
    pub etag: Vec<u8>,
    pub max_age: Duration,
}

/// Decides whether a given notification should be sent Confirmable.
/// RFC 7641 §4.5 leaves the exact cadence to the implementation; this
/// crate exposes it as a pluggable policy rather than a fixed constant
/// so the embedding application can tune it per resource.
pub trait NotificationPolicy {
    fn is_confirmable(&self, remote: SocketAddr, token: Token, serial: u32) -> bool;
}

/// Sends every Nth notification Confirmable (and the very first one),
/// trading a little extra traffic for periodic proof that the
/// relationship is still alive without demanding an ACK every time.
pub struct PeriodicConfirmable {
    pub every: u32,
}

impl Default for PeriodicConfirmable {
    fn default() -> Self {
        PeriodicConfirmable { every: 4 }
    }
}

impl NotificationPolicy for PeriodicConfirmable {
    fn is_confirmable(&self, _remote: SocketAddr, _token: Token, serial: u32) -> bool {
        self.every != 0 && serial % self.every == 0
    }
}

/// Result of [`ObservationRegistry::produce_notification`].
pub struct ProducedNotification {
    /// The notification to send (token already set; `mtype` and
    /// `message_id` are assigned by the caller the way
    /// [`crate::router::MessageRouter::send_response`] assigns them for
    /// an ordinary response).
    pub message: Message,
    pub confirmable: bool,
    /// `true` when this was a terminal `4.00` produced because none of
    /// the supplied snapshots matched the observer's content format;
    /// the observation has already been deregistered.
    pub deregistered: bool,
}

struct Observation {
    content_format: u16,
    etags_known: HashSet<Vec<u8>>,
    last_message_id: Option<u16>,
    notification_serial: u32,
    last_seen_at: Instant,
    heartbeat_timer: Option<TimerHandle>,
}

type ObservationKey = (SocketAddr, Token);

pub struct ObservationRegistry {
    heartbeat_interval: Duration,
    table: RwLock<HashMap<ObservationKey, Observation>>,
    heartbeat_timers: TimerWheel<ObservationKey>,
}

impl ObservationRegistry {
    pub fn new(heartbeat_interval: Duration) -> Self {
        ObservationRegistry {
            heartbeat_interval,
            table: RwLock::new(HashMap::new()),
            heartbeat_timers: TimerWheel::new(),
        }
    }

    /// Admit a new observation. Called on the endpoint serving the
    /// resource, after it has queued the initial response to a GET
    /// that carried `Observe: 0` (§4.5 Admission). `content_format` is
    /// the format of that initial response; `etags_known` seeds the
    /// observer's known representation(s) from the request's ETag
    /// option(s), so a later notification bearing one of those etags
    /// can be sent bodyless as `2.03 Valid`.
    pub fn register(
        &mut self,
        remote: SocketAddr,
        token: Token,
        content_format: u16,
        etags_known: Vec<Vec<u8>>,
        now: Instant,
    ) {
        let key = (remote, token);
        let timer = self
            .heartbeat_timers
            .schedule(now + self.heartbeat_interval, key);
        self.table.write().unwrap().insert(
            key,
            Observation {
                content_format,
                etags_known: etags_known.into_iter().collect(),
                last_message_id: None,
                notification_serial: 0,
                last_seen_at: now,
                heartbeat_timer: Some(timer),
            },
        );
    }

    /// Client-side bookkeeping: remembers that `token` corresponds to
    /// an observation this endpoint is consuming, so later pushed
    /// notifications for the same (remote, token) are recognized as
    /// expected rather than rejected as orphans. Distinct from
    /// [`ObservationRegistry::register`], which is the *serving*
    /// endpoint's admission call and carries the content-negotiation
    /// state only a producer has.
    pub fn track_observer(&mut self, remote: SocketAddr, token: Token, now: Instant) {
        let key = (remote, token);
        let timer = self
            .heartbeat_timers
            .schedule(now + self.heartbeat_interval, key);
        self.table.write().unwrap().insert(
            key,
            Observation {
                content_format: 0,
                etags_known: HashSet::new(),
                last_message_id: None,
                notification_serial: 0,
                last_seen_at: now,
                heartbeat_timer: Some(timer),
            },
        );
    }

    /// Produce the next notification for an admitted observation,
    /// implementing RFC 7641 §4.5's lifecycle: pick the snapshot
    /// matching the observer's content format (deregistering with a
    /// terminal `4.00` if none match), assign the next
    /// `notification_serial`, and choose `2.03 Valid` (bodyless) over
    /// `2.05 Content` when the observer already holds that
    /// representation's ETag. Returns `None` if `(remote, token)` is
    /// not a registered observation.
    pub fn produce_notification(
        &mut self,
        remote: SocketAddr,
        token: Token,
        available: &[ContentSnapshot],
        policy: &dyn NotificationPolicy,
    ) -> Option<ProducedNotification> {
        let key = (remote, token);
        let content_format = self.table.read().unwrap().get(&key)?.content_format;

        let Some(snapshot) = available.iter().find(|s| s.content_format == content_format) else {
            let err = CoapError::UnsupportedContentFormat { content_format };
            log::warn!(
                "observation {}/{:?} wants content format {} with no matching snapshot: {}",
                remote,
                token,
                content_format,
                err
            );
            let message = Message::new(Type::Non, Code::new(4, 0), 0, token)
                .with_payload(err.to_string().into_bytes());
            self.deregister(remote, token);
            return Some(ProducedNotification {
                message,
                confirmable: false,
                deregistered: true,
            });
        };

        let mut table = self.table.write().unwrap();
        let obs = table.get_mut(&key)?;
        obs.notification_serial = obs.notification_serial.wrapping_add(1) % SERIAL_SPACE;
        let serial = obs.notification_serial;
        let bodyless = obs.etags_known.contains(&snapshot.etag);
        drop(table);

        let confirmable = policy.is_confirmable(remote, token, serial);

        let mut options = Options::new();
        options.insert(OptionNumber::OBSERVE, encode_uint_option(serial));
        let code = if bodyless {
            Code::new(2, 3)
        } else {
            options.insert(
                OptionNumber::CONTENT_FORMAT,
                encode_uint_option(snapshot.content_format as u32),
            );
            options.insert(
                OptionNumber::MAX_AGE,
                encode_uint_option(snapshot.max_age.as_secs() as u32),
            );
            Code::new(2, 5)
        };
        if !snapshot.etag.is_empty() {
            options.insert(OptionNumber::ETAG, snapshot.etag.clone());
        }
        let payload = if bodyless { Vec::new() } else { snapshot.bytes.clone() };

        let message = Message::new(Type::Non, code, 0, token)
            .with_options(options)
            .with_payload(payload);

        Some(ProducedNotification {
            message,
            confirmable,
            deregistered: false,
        })
    }

    /// Evaluate an inbound notification against the registered
    /// observation's last-seen serial. Returns `true` if the
    /// notification is fresh and should be delivered (and its serial
    /// recorded); `false` if it is stale and must be discarded, or if
    /// no matching observation exists.
    pub fn accept_notification(
        &mut self,
        remote: SocketAddr,
        token: Token,
        serial: u32,
        now: Instant,
    ) -> bool {
        let key = (remote, token);
        let mut table = self.table.write().unwrap();
        let Some(obs) = table.get_mut(&key) else {
            return false;
        };

        let within_window = now.duration_since(obs.last_seen_at) < FRESHNESS_WINDOW;
        let fresh = !within_window || is_fresher(serial, obs.notification_serial);
        if fresh {
            obs.notification_serial = serial;
            obs.last_seen_at = now;
        }
        fresh
    }

    /// Deregister an observation: a re-GET carrying `Observe: 1`, a
    /// RST/timeout on a notification, or explicit cancellation (§4.5
    /// Deregistration). Tolerates an already-removed entry (the
    /// registry is consulted concurrently with cancellation racing a
    /// final in-flight notification, per §5).
    pub fn deregister(&mut self, remote: SocketAddr, token: Token) {
        let key = (remote, token);
        let removed = self.table.write().unwrap().remove(&key);
        if let Some(obs) = removed {
            if let Some(timer) = obs.heartbeat_timer {
                self.heartbeat_timers.cancel(timer);
            }
        }
    }

    pub fn is_registered(&self, remote: SocketAddr, token: Token) -> bool {
        self.table.read().unwrap().contains_key(&(remote, token))
    }

    /// Observations whose heartbeat interval has elapsed and need a
    /// fresh confirmable notification sent to keep the relationship
    /// alive, rescheduling their next heartbeat.
    pub fn poll_heartbeats(&mut self, now: Instant) -> Vec<ObservationKey> {
        let due = self.heartbeat_timers.poll(now);
        let mut table = self.table.write().unwrap();
        let mut fired = Vec::new();
        for key in due {
            if let Some(obs) = table.get_mut(&key) {
                let timer = self
                    .heartbeat_timers
                    .schedule(now + self.heartbeat_interval, key);
                obs.heartbeat_timer = Some(timer);
                fired.push(key);
            }
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().unwrap().is_empty()
    }
}

impl crate::reliability::ReliabilityObserver for ObservationRegistry {
    /// Track the message id a notification was sent under, so a later
    /// empty ACK/RST for it can be correlated back to this observation
    /// (§3's `last_message_id`).
    fn message_id_assigned(&mut self, remote: SocketAddr, token: Token, message_id: u16) {
        if let Some(obs) = self.table.write().unwrap().get_mut(&(remote, token)) {
            obs.last_message_id = Some(message_id);
        }
    }

    /// A Confirmable notification being acknowledged pushes the next
    /// mandatory heartbeat 24h out from this point, per §4.5's "24h
    /// after the last CON notification successfully acknowledged".
    fn transmission_succeeded(&mut self, remote: SocketAddr, token: Token, _message_id: u16) {
        let key = (remote, token);
        let mut table = self.table.write().unwrap();
        let Some(obs) = table.get_mut(&key) else {
            return;
        };
        if let Some(old) = obs.heartbeat_timer.take() {
            self.heartbeat_timers.cancel(old);
        }
        obs.heartbeat_timer = Some(
            self.heartbeat_timers
                .schedule(Instant::now() + self.heartbeat_interval, key),
        );
    }

    /// A RST in reply to a notification ends the observe relationship
    /// (RFC 7641 §3.6).
    fn reset_received(&mut self, remote: SocketAddr, token: Token, _message_id: u16) {
        self.deregister(remote, token);
    }

    /// Exhausting MAX_RETRANSMIT on a notification is treated the same
    /// as an explicit RST: the peer is presumed gone.
    fn transmission_timeout(&mut self, remote: SocketAddr, token: Token, _message_id: u16) {
        self.deregister(remote, token);
    }
}
