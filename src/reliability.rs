/// OutboundReliability — the CON retransmission state machine (§4.2)
///
/// One record per (remote, message_id) tracks a Confirmable
/// transmission from first send through ACK/RST or MAX_RETRANSMIT
/// exhaustion. Retransmission timing follows RFC 7252 §4.8: an
/// initial jittered timeout that doubles on every unanswered retry,
/// grounded in the teacher's `RetransmissionState`/
/// `AckManager::calculate_backoff_ms` shape, generalized from a fixed
/// multiplier to the RFC's `ACK_TIMEOUT x U` jitter (the jitter
/// multiply itself is grounded in the pack's async-coap
/// `delay_to_retransmit`).
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::codec;
use crate::config::ConfigData;
use crate::error::CoapError;
use crate::message::{Message, Token, Type};
use crate::timer::{TimerHandle, TimerWheel};

/// Lifecycle state of a single outbound Confirmable transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionState {
    Waiting,
    Acked,
    Rejected,
    Expired,
}

/// Identifies a single outbound CON transmission for application-level
/// cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferHandle {
    pub remote: SocketAddr,
    pub message_id: u16,
}

struct TransmissionRecord {
    message: Message,
    remote: SocketAddr,
    attempt: u32,
    current_timeout: Duration,
    state: TransmissionState,
    retransmit_timer: Option<TimerHandle>,
    hold_timer: Option<TimerHandle>,
}

/// Lifecycle events emitted by [`OutboundReliability`] to subscribers
/// such as [`crate::observe::ObservationRegistry`].
#[allow(unused_variables)]
pub trait ReliabilityObserver {
    fn message_id_assigned(&mut self, remote: SocketAddr, token: Token, message_id: u16) {}
    fn empty_ack_received(&mut self, remote: SocketAddr, token: Token, message_id: u16) {}
    fn reset_received(&mut self, remote: SocketAddr, token: Token, message_id: u16) {}
    fn transmission_succeeded(&mut self, remote: SocketAddr, token: Token, message_id: u16) {}
    fn transmission_timeout(&mut self, remote: SocketAddr, token: Token, message_id: u16) {}
}

/// An observer that does nothing; useful when the caller does not
/// need lifecycle events (e.g. plain client usage with no observations
/// registered).
pub struct NullObserver;
impl ReliabilityObserver for NullObserver {}

/// Timer-wheel payload: which (remote, message_id) retransmission is
/// due.
type RetransmitKey = (SocketAddr, u16);

pub struct OutboundReliability {
    config: ConfigData,
    records: HashMap<RetransmitKey, TransmissionRecord>,
    retransmit_timers: TimerWheel<RetransmitKey>,
    hold_timers: TimerWheel<RetransmitKey>,
}

impl OutboundReliability {
    pub fn new(config: ConfigData) -> Self {
        OutboundReliability {
            config,
            records: HashMap::new(),
            retransmit_timers: TimerWheel::new(),
            hold_timers: TimerWheel::new(),
        }
    }

    fn initial_timeout(&self) -> Duration {
        let u = rand::thread_rng().gen_range(1.0..self.config.ack_random_factor);
        Duration::from_secs_f64(self.config.ack_timeout.as_secs_f64() * u)
    }

    /// Admit a Confirmable message: insert its record, hand back the
    /// bytes for the caller to write to the socket now, and schedule
    /// the first retry.
    ///
    /// `msg.message_id` must already have been assigned (by
    /// [`crate::identifiers::IdentifierAllocator`], via the router).
    pub fn send_confirmable(
        &mut self,
        msg: Message,
        remote: SocketAddr,
        now: Instant,
        observer: &mut impl ReliabilityObserver,
    ) -> (TransferHandle, Vec<u8>) {
        debug_assert_eq!(msg.mtype, Type::Con);

        let key = (remote, msg.message_id);
        let bytes = codec::encode(&msg);
        let timeout = self.initial_timeout();
        let timer = self.retransmit_timers.schedule(now + timeout, key);

        observer.message_id_assigned(remote, msg.token, msg.message_id);

        self.records.insert(
            key,
            TransmissionRecord {
                message: msg.clone(),
                remote,
                attempt: 0,
                current_timeout: timeout,
                state: TransmissionState::Waiting,
                retransmit_timer: Some(timer),
                hold_timer: None,
            },
        );

        (
            TransferHandle {
                remote,
                message_id: msg.message_id,
            },
            bytes,
        )
    }

    /// One-shot transmission with no reliability record.
    pub fn send_nonconfirmable(&self, msg: &Message) -> Vec<u8> {
        debug_assert_eq!(msg.mtype, Type::Non);
        codec::encode(msg)
    }

    /// Drive due retransmissions. Returns the datagrams that must now
    /// be written to the socket (retransmitted attempts); records that
    /// exhaust MAX_RETRANSMIT emit `TransmissionTimeout` to `observer`
    /// instead of producing bytes.
    pub fn poll_retransmits(
        &mut self,
        now: Instant,
        observer: &mut impl ReliabilityObserver,
    ) -> Vec<(SocketAddr, Vec<u8>)> {
        let due = self.retransmit_timers.poll(now);
        let mut outbound = Vec::new();

        for key in due {
            let Some(record) = self.records.get_mut(&key) else {
                continue;
            };
            if record.state != TransmissionState::Waiting {
                continue;
            }

            if record.attempt >= self.config.max_retransmit {
                record.state = TransmissionState::Expired;
                record.retransmit_timer = None;
                let err = CoapError::TransmissionTimeout {
                    remote: record.remote,
                    message_id: key.1,
                };
                log::warn!("{}", err);
                observer.transmission_timeout(record.remote, record.message.token, key.1);
                self.schedule_hold(key, now);
                continue;
            }

            record.attempt += 1;
            record.current_timeout *= 2;
            let bytes = codec::encode(&record.message);
            let timer = self
                .retransmit_timers
                .schedule(now + record.current_timeout, key);
            record.retransmit_timer = Some(timer);
            outbound.push((record.remote, bytes));
        }

        outbound
    }

    /// Resolve or reject the record matching `msg`'s (remote,
    /// message_id). `msg` must be an empty ACK/RST or a piggybacked
    /// ACK carrying a response. Returns the matched handle, or `None`
    /// if there was no live record (stray/duplicate ACK, or a RST for
    /// an exchange that is not a pending CON).
    pub fn observe_inbound_ack_or_rst(
        &mut self,
        msg: &Message,
        remote: SocketAddr,
        observer: &mut impl ReliabilityObserver,
    ) -> Option<TransferHandle> {
        let key = (remote, msg.message_id);
        let record = self.records.get_mut(&key)?;
        if record.state != TransmissionState::Waiting {
            return None;
        }

        if let Some(timer) = record.retransmit_timer.take() {
            self.retransmit_timers.cancel(timer);
        }

        let token = record.message.token;
        match msg.mtype {
            Type::Rst => {
                record.state = TransmissionState::Rejected;
                observer.reset_received(remote, token, msg.message_id);
            }
            Type::Ack if msg.is_empty_message() => {
                record.state = TransmissionState::Acked;
                observer.empty_ack_received(remote, token, msg.message_id);
            }
            Type::Ack => {
                record.state = TransmissionState::Acked;
                observer.transmission_succeeded(remote, token, msg.message_id);
            }
            Type::Con | Type::Non => return None,
        }

        self.schedule_hold(key, Instant::now());
        Some(TransferHandle {
            remote,
            message_id: msg.message_id,
        })
    }

    /// Application-initiated cancel: no further retries, but already
    /// sent datagrams are not retracted (§5).
    pub fn cancel(&mut self, handle: TransferHandle) {
        let key = (handle.remote, handle.message_id);
        let Some(record) = self.records.get_mut(&key) else {
            return;
        };
        if record.state != TransmissionState::Waiting {
            return;
        }
        if let Some(timer) = record.retransmit_timer.take() {
            self.retransmit_timers.cancel(timer);
        }
        record.state = TransmissionState::Rejected;
        self.schedule_hold(key, Instant::now());
    }

    fn schedule_hold(&mut self, key: RetransmitKey, now: Instant) {
        if let Some(record) = self.records.get_mut(&key) {
            let timer = self
                .hold_timers
                .schedule(now + self.config.exchange_lifetime, key);
            record.hold_timer = Some(timer);
        }
    }

    /// Remove records whose hold period has elapsed, returning the
    /// (remote, message_id) keys so the caller (MessageRouter) can
    /// release the Message ID back to the allocator.
    pub fn poll_expired_records(&mut self, now: Instant) -> Vec<RetransmitKey> {
        let due = self.hold_timers.poll(now);
        for key in &due {
            self.records.remove(key);
        }
        due
    }

    pub fn state_of(&self, handle: TransferHandle) -> Option<TransmissionState> {
        self.records
            .get(&(handle.remote, handle.message_id))
            .map(|r| r.state)
    }

    pub fn live_record_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.state == TransmissionState::Waiting)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::message::{Code, Token};

    fn remote() -> SocketAddr {
        "127.0.0.1:5683".parse().unwrap()
    }

    fn test_config() -> ConfigData {
        Config::new()
            .ack_timeout(Duration::from_millis(100))
            .ack_random_factor(1.0001)
            .max_retransmit(4)
            .exchange_lifetime(Duration::from_secs(1))
            .into()
    }

    #[derive(Default)]
    struct RecordingObserver {
        timeouts: Vec<u16>,
        succeeded: Vec<u16>,
        empty_acks: Vec<u16>,
        resets: Vec<u16>,
    }
    impl ReliabilityObserver for RecordingObserver {
        fn transmission_timeout(&mut self, _r: SocketAddr, _t: Token, mid: u16) {
            self.timeouts.push(mid);
        }
        fn transmission_succeeded(&mut self, _r: SocketAddr, _t: Token, mid: u16) {
            self.succeeded.push(mid);
        }
        fn empty_ack_received(&mut self, _r: SocketAddr, _t: Token, mid: u16) {
            self.empty_acks.push(mid);
        }
        fn reset_received(&mut self, _r: SocketAddr, _t: Token, mid: u16) {
            self.resets.push(mid);
        }
    }

    #[test]
    fn ack_resolves_record_and_stops_retries() {
        let mut rel = OutboundReliability::new(test_config());
        let mut obs = RecordingObserver::default();
        let now = Instant::now();
        let msg = Message::new(Type::Con, Code::GET, 42, Token::from_slice(&[1]));
        let (handle, _bytes) = rel.send_confirmable(msg, remote(), now, &mut obs);

        let ack = Message::new(Type::Ack, Code::new(2, 5), 42, Token::from_slice(&[1]))
            .with_payload(b"ok".to_vec());
        let matched = rel.observe_inbound_ack_or_rst(&ack, remote(), &mut obs);
        assert!(matched.is_some());
        assert_eq!(rel.state_of(handle), Some(TransmissionState::Acked));
        assert_eq!(obs.succeeded, vec![42]);

        // no further retransmissions after being acked
        let later = now + Duration::from_secs(10);
        let outbound = rel.poll_retransmits(later, &mut obs);
        assert!(outbound.is_empty());
    }

    #[test]
    fn empty_ack_is_distinguished_from_piggyback() {
        let mut rel = OutboundReliability::new(test_config());
        let mut obs = RecordingObserver::default();
        let now = Instant::now();
        let msg = Message::new(Type::Con, Code::GET, 7, Token::from_slice(&[2]));
        rel.send_confirmable(msg, remote(), now, &mut obs);

        let empty_ack = Message::empty(Type::Ack, 7);
        rel.observe_inbound_ack_or_rst(&empty_ack, remote(), &mut obs);
        assert_eq!(obs.empty_acks, vec![7]);
        assert!(obs.succeeded.is_empty());
    }

    #[test]
    fn rst_rejects_record() {
        let mut rel = OutboundReliability::new(test_config());
        let mut obs = RecordingObserver::default();
        let now = Instant::now();
        let msg = Message::new(Type::Con, Code::GET, 9, Token::from_slice(&[3]));
        let (handle, _) = rel.send_confirmable(msg, remote(), now, &mut obs);

        let rst = Message::empty(Type::Rst, 9);
        rel.observe_inbound_ack_or_rst(&rst, remote(), &mut obs);
        assert_eq!(obs.resets, vec![9]);
        assert_eq!(rel.state_of(handle), Some(TransmissionState::Rejected));
    }

    #[test]
    fn exhausting_max_retransmit_emits_timeout() {
        let mut rel = OutboundReliability::new(test_config());
        let mut obs = RecordingObserver::default();
        let mut now = Instant::now();
        let msg = Message::new(Type::Con, Code::GET, 5, Token::from_slice(&[4]));
        let (handle, _) = rel.send_confirmable(msg, remote(), now, &mut obs);

        // drive enough polls to exhaust 4 retries plus the terminal poll
        let mut sent_count = 1; // initial send
        for _ in 0..10 {
            now += Duration::from_secs(5);
            let outbound = rel.poll_retransmits(now, &mut obs);
            sent_count += outbound.len();
            if rel.state_of(handle) == Some(TransmissionState::Expired) {
                break;
            }
        }

        assert_eq!(rel.state_of(handle), Some(TransmissionState::Expired));
        assert_eq!(obs.timeouts, vec![5]);
        // RFC 7252: initial send + MAX_RETRANSMIT(4) retries = 5 total
        assert_eq!(sent_count, 5);
    }

    #[test]
    fn cancel_stops_future_retries() {
        let mut rel = OutboundReliability::new(test_config());
        let mut obs = RecordingObserver::default();
        let now = Instant::now();
        let msg = Message::new(Type::Con, Code::GET, 11, Token::from_slice(&[5]));
        let (handle, _) = rel.send_confirmable(msg, remote(), now, &mut obs);

        rel.cancel(handle);
        assert_eq!(rel.state_of(handle), Some(TransmissionState::Rejected));

        let outbound = rel.poll_retransmits(now + Duration::from_secs(10), &mut obs);
        assert!(outbound.is_empty());
    }

    #[test]
    fn retransmission_backoff_doubles_each_attempt() {
        let mut rel = OutboundReliability::new(test_config());
        let mut obs = RecordingObserver::default();
        let mut now = Instant::now();
        let msg = Message::new(Type::Con, Code::GET, 3, Token::from_slice(&[6]));
        rel.send_confirmable(msg, remote(), now, &mut obs);

        // first retry due shortly after ~100ms (jittered close to 1.0)
        now += Duration::from_millis(150);
        let first = rel.poll_retransmits(now, &mut obs);
        assert_eq!(first.len(), 1);

        // second retry should need ~2x as long; polling at +150ms again
        // must NOT fire yet.
        now += Duration::from_millis(150);
        let too_soon = rel.poll_retransmits(now, &mut obs);
        assert!(too_soon.is_empty());

        now += Duration::from_millis(100);
        let second = rel.poll_retransmits(now, &mut obs);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn hold_period_removes_record_after_exchange_lifetime() {
        let mut rel = OutboundReliability::new(test_config());
        let mut obs = RecordingObserver::default();
        let now = Instant::now();
        let msg = Message::new(Type::Con, Code::GET, 1, Token::from_slice(&[7]));
        let (handle, _) = rel.send_confirmable(msg, remote(), now, &mut obs);
        rel.cancel(handle);

        let expired = rel.poll_expired_records(now + Duration::from_secs(2));
        assert_eq!(expired, vec![(remote(), 1)]);
        assert_eq!(rel.state_of(handle), None);
    }
}
