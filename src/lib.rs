//! `coap_core` — a transport-agnostic message-exchange core for a CoAP
//! (RFC 7252) endpoint, including the RFC 7641 Observe extension.
//!
//! This crate models the reliability, deduplication, correlation, and
//! observation state machines that sit between a UDP socket and a
//! CoAP application. It does not own a socket, a thread pool, or an
//! async runtime: [`MessageRouter`] hands back the bytes that need
//! writing and expects the caller to drive [`MessageRouter::poll`] on
//! its own clock.
//!
//! Non-goals: caching/proxying semantics, CoAP-to-HTTP mapping, and
//! resource-directory discovery are all out of scope; this crate is
//! the message layer only.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod identifiers;
pub mod message;
pub mod observe;
pub mod reliability;
pub mod router;
pub mod timer;

pub use config::{Config, ConfigData};
pub use error::{CoapError, Result};
pub use message::{Code, Message, OptionNumber, Options, Token, Type};
pub use router::{MessageRouter, RouterAction};

/// CoAP version carried in the fixed header (RFC 7252 §3).
pub const COAP_VERSION: u8 = 1;

/// Default UDP port for unencrypted CoAP (RFC 7252 §12.8).
pub const COAP_DEFAULT_PORT: u16 = 5683;

/// Default UDP port for CoAP over DTLS (RFC 7252 §12.8).
pub const COAPS_DEFAULT_PORT: u16 = 5684;
