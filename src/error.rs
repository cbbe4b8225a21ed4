/// Error types for the CoAP message-exchange core
///
/// Mirrors the failure taxonomy in the protocol's error handling
/// design: per-exchange errors are surfaced to the originator (via
/// callback or event) and never bring down the reactor.
use std::fmt;

/// Result type alias used throughout this crate.
pub type Result<T> = std::result::Result<T, CoapError>;

/// A CoAP core error.
#[derive(Debug, Clone, PartialEq)]
pub enum CoapError {
    /// A Confirmable message exhausted MAX_RETRANSMIT without an
    /// ACK/RST.
    TransmissionTimeout { remote: std::net::SocketAddr, message_id: u16 },

    /// The peer answered with a Reset message.
    PeerReset { remote: std::net::SocketAddr, message_id: u16 },

    /// A pending client request expired at EXCHANGE_LIFETIME with no
    /// response ever arriving.
    NoResponse,

    /// Diagnostic only: an inbound message was recognized as a
    /// duplicate and suppressed.
    DuplicateSuppressed { remote: std::net::SocketAddr, message_id: u16 },

    /// A notification could not be produced for a content format the
    /// observer requested; the observation is deregistered.
    UnsupportedContentFormat { content_format: u16 },

    /// The codec failed to parse an inbound datagram.
    InvalidMessage(String),

    /// An option is not in the admissibility whitelist for its code.
    OptionNotMeaningful { code: crate::message::Code, option: crate::message::OptionNumber },

    /// The endpoint has been shut down and rejects new registrations.
    Shutdown,
}

impl fmt::Display for CoapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransmissionTimeout { remote, message_id } => write!(
                f,
                "transmission timeout: no ACK/RST for mid {:#06x} from {}",
                message_id, remote
            ),
            Self::PeerReset { remote, message_id } => {
                write!(f, "peer {} reset mid {:#06x}", remote, message_id)
            }
            Self::NoResponse => write!(f, "pending request expired with no response"),
            Self::DuplicateSuppressed { remote, message_id } => write!(
                f,
                "duplicate suppressed: mid {:#06x} from {}",
                message_id, remote
            ),
            Self::UnsupportedContentFormat { content_format } => {
                write!(f, "unsupported content format: {}", content_format)
            }
            Self::InvalidMessage(msg) => write!(f, "invalid message: {}", msg),
            Self::OptionNotMeaningful { code, option } => write!(
                f,
                "option {} is not meaningful for code {}",
                option.0, code
            ),
            Self::Shutdown => write!(f, "endpoint is shut down"),
        }
    }
}

impl std::error::Error for CoapError {}

impl From<crate::codec::CodecError> for CoapError {
    fn from(err: crate::codec::CodecError) -> Self {
        CoapError::InvalidMessage(err.to_string())
    }
}
