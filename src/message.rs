/// Core message data model for the CoAP protocol
///
/// A [`Message`] is immutable once constructed. Field meanings follow
/// RFC 7252 §3 and RFC 7641 for the Observe option; this module only
/// models the in-memory shape, not the wire encoding (see
/// [`crate::codec`]).
use std::fmt;

/// Maximum size of a CoAP token in bytes (RFC 7252 §3).
pub const MAX_TOKEN_LEN: usize = 8;

/// Message type, carried in the 2-bit T field of the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// Confirmable — retransmitted until ACK/RST or MAX_RETRANSMIT.
    Con,
    /// Non-confirmable — sent once, no reliability.
    Non,
    /// Acknowledgement of a Con message.
    Ack,
    /// Reset — rejects a message the receiver could not process.
    Rst,
}

/// Request/response code, split into a 3-bit class and 5-bit detail
/// (RFC 7252 §3: `c.dd` notation, encoded as `c << 5 | dd`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Code(pub u8);

impl Code {
    /// The empty message code (class 0, detail 0).
    pub const EMPTY: Code = Code(0);

    pub const GET: Code = Code(0x01);
    pub const POST: Code = Code(0x02);
    pub const PUT: Code = Code(0x03);
    pub const DELETE: Code = Code(0x04);

    /// Construct from class/detail, matching the `c.dd` wire notation.
    pub const fn new(class: u8, detail: u8) -> Self {
        Code((class << 5) | (detail & 0x1f))
    }

    pub const fn class(self) -> u8 {
        self.0 >> 5
    }

    pub const fn detail(self) -> u8 {
        self.0 & 0x1f
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_request(self) -> bool {
        self.class() == 0 && !self.is_empty()
    }

    pub const fn is_response(self) -> bool {
        matches!(self.class(), 2 | 4 | 5)
    }

    pub const fn is_success(self) -> bool {
        self.class() == 2
    }

    pub const fn is_client_error(self) -> bool {
        self.class() == 4
    }

    pub const fn is_server_error(self) -> bool {
        self.class() == 5
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

/// Option number. RFC 7252 §5.10 defines the numbers used below;
/// numbers not named here are still valid and carried opaquely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OptionNumber(pub u16);

impl OptionNumber {
    pub const IF_MATCH: OptionNumber = OptionNumber(1);
    pub const URI_HOST: OptionNumber = OptionNumber(3);
    pub const ETAG: OptionNumber = OptionNumber(4);
    pub const IF_NONE_MATCH: OptionNumber = OptionNumber(5);
    pub const OBSERVE: OptionNumber = OptionNumber(6);
    pub const URI_PORT: OptionNumber = OptionNumber(7);
    pub const LOCATION_PATH: OptionNumber = OptionNumber(8);
    pub const URI_PATH: OptionNumber = OptionNumber(11);
    pub const CONTENT_FORMAT: OptionNumber = OptionNumber(12);
    pub const MAX_AGE: OptionNumber = OptionNumber(14);
    pub const URI_QUERY: OptionNumber = OptionNumber(15);
    pub const ACCEPT: OptionNumber = OptionNumber(17);
    pub const LOCATION_QUERY: OptionNumber = OptionNumber(20);
    pub const PROXY_URI: OptionNumber = OptionNumber(35);
    pub const PROXY_SCHEME: OptionNumber = OptionNumber(39);
    pub const SIZE1: OptionNumber = OptionNumber(60);

    /// Critical options MUST be understood by the recipient or the
    /// message rejected; elective options may be silently ignored.
    pub fn is_critical(self) -> bool {
        self.0 & 1 == 1
    }

    /// Unsafe-to-forward options (bit 1) are opaque to proxies.
    pub fn is_unsafe_to_forward(self) -> bool {
        self.0 & 2 == 2
    }

    /// No-Cache-Key bits, only meaningful when unsafe-to-forward.
    pub fn no_cache_key(self) -> bool {
        self.is_unsafe_to_forward() && (self.0 & 0x1e) == 0x1c
    }

    /// Options that may legally be repeated within a single message.
    pub fn is_repeatable(self) -> bool {
        matches!(
            self,
            OptionNumber::IF_MATCH
                | OptionNumber::ETAG
                | OptionNumber::LOCATION_PATH
                | OptionNumber::URI_PATH
                | OptionNumber::URI_QUERY
                | OptionNumber::LOCATION_QUERY
        )
    }
}

/// A single token value, 0-8 bytes, stored inline to avoid a heap
/// allocation per request the way the protocol's hot path avoids one
/// per payload.
#[derive(Clone, Copy, Eq)]
pub struct Token {
    bytes: [u8; MAX_TOKEN_LEN],
    len: u8,
}

impl Token {
    pub const EMPTY: Token = Token {
        bytes: [0; MAX_TOKEN_LEN],
        len: 0,
    };

    /// Build a token from a byte slice. Panics if longer than 8 bytes;
    /// callers within this crate never construct an out-of-range token
    /// (the codec and allocator both cap at `MAX_TOKEN_LEN`).
    pub fn from_slice(slice: &[u8]) -> Self {
        assert!(slice.len() <= MAX_TOKEN_LEN, "token exceeds 8 bytes");
        let mut bytes = [0u8; MAX_TOKEN_LEN];
        bytes[..slice.len()].copy_from_slice(slice);
        Token {
            bytes,
            len: slice.len() as u8,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl std::hash::Hash for Token {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:02x?})", self.as_slice())
    }
}

/// An ordered multimap of option-number to raw value bytes. Options
/// with the same number that are repeatable keep insertion order;
/// non-repeatable duplicates are a codec-level concern, not enforced
/// here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options(Vec<(OptionNumber, Vec<u8>)>);

impl Options {
    pub fn new() -> Self {
        Options(Vec::new())
    }

    /// Insert an option, keeping the backing store sorted by option
    /// number (required for delta encoding on the wire).
    pub fn insert(&mut self, number: OptionNumber, value: Vec<u8>) {
        let pos = self
            .0
            .iter()
            .position(|(n, _)| *n > number)
            .unwrap_or(self.0.len());
        self.0.insert(pos, (number, value));
    }

    pub fn get_first(&self, number: OptionNumber) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|(n, _)| *n == number)
            .map(|(_, v)| v.as_slice())
    }

    pub fn get_all(&self, number: OptionNumber) -> impl Iterator<Item = &[u8]> {
        self.0
            .iter()
            .filter(move |(n, _)| *n == number)
            .map(|(_, v)| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(OptionNumber, Vec<u8>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// An immutable CoAP message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub mtype: Type,
    pub code: Code,
    pub message_id: u16,
    pub token: Token,
    pub options: Options,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(mtype: Type, code: Code, message_id: u16, token: Token) -> Self {
        Message {
            mtype,
            code,
            message_id,
            token,
            options: Options::new(),
            payload: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// An empty ACK or RST, used to acknowledge or reject without a
    /// piggybacked response.
    pub fn empty(mtype: Type, message_id: u16) -> Self {
        Message::new(mtype, Code::EMPTY, message_id, Token::EMPTY)
    }

    pub fn is_empty_message(&self) -> bool {
        self.code.is_empty()
    }
}
