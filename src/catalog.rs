/// Code catalog and option-admissibility predicate (RFC 7252 §12).
///
/// Grounded in the pack's `toad` config module's pattern of
/// documenting wire constants with explicit RFC section references.
use crate::message::{Code, OptionNumber};

/// Whether a non-empty payload is allowed for `code` (RFC 7252 §5.x
/// per-method/per-response definitions; GET, DELETE, and 2.03 Valid
/// never carry a body).
pub fn payload_allowed(code: Code) -> bool {
    !matches!(code, Code::GET | Code::DELETE) && code != Code::new(2, 3)
}

/// Human-readable name for known codes, used in logging/diagnostics.
pub fn code_name(code: Code) -> &'static str {
    match code {
        Code::EMPTY => "Empty",
        Code::GET => "GET",
        Code::POST => "POST",
        Code::PUT => "PUT",
        Code::DELETE => "DELETE",
        _ => match (code.class(), code.detail()) {
            (2, 1) => "2.01 Created",
            (2, 2) => "2.02 Deleted",
            (2, 3) => "2.03 Valid",
            (2, 4) => "2.04 Changed",
            (2, 5) => "2.05 Content",
            (4, 0) => "4.00 Bad Request",
            (4, 1) => "4.01 Unauthorized",
            (4, 2) => "4.02 Bad Option",
            (4, 3) => "4.03 Forbidden",
            (4, 4) => "4.04 Not Found",
            (4, 5) => "4.05 Method Not Allowed",
            (4, 12) => "4.12 Precondition Failed",
            (4, 13) => "4.13 Request Entity Too Large",
            (4, 15) => "4.15 Unsupported Media Type",
            (5, 0) => "5.00 Internal Server Error",
            (5, 1) => "5.01 Not Implemented",
            (5, 2) => "5.02 Bad Gateway",
            (5, 3) => "5.03 Service Unavailable",
            (5, 4) => "5.04 Gateway Timeout",
            (5, 5) => "5.05 Proxying Not Supported",
            _ => "Unknown",
        },
    }
}

/// Option whitelist per code (§6): returns true iff `option` is
/// meaningful (admissible) on a message carrying `code`.
///
/// The same table is used by the encoder (to decide what to write)
/// and the decoder (to validate what was received), so the whitelist
/// only needs to live in one place.
pub fn is_meaningful(code: Code, option: OptionNumber) -> bool {
    use OptionNumber as O;

    if code == Code::GET {
        return matches!(
            option,
            O::URI_HOST
                | O::URI_PATH
                | O::URI_PORT
                | O::URI_QUERY
                | O::PROXY_URI
                | O::PROXY_SCHEME
                | O::ACCEPT
                | O::ETAG
                | O::OBSERVE
        );
    }
    if code == Code::POST {
        return matches!(
            option,
            O::URI_HOST
                | O::URI_PATH
                | O::URI_PORT
                | O::URI_QUERY
                | O::PROXY_URI
                | O::PROXY_SCHEME
                | O::CONTENT_FORMAT
        );
    }
    if code == Code::PUT {
        return matches!(
            option,
            O::URI_HOST
                | O::URI_PATH
                | O::URI_PORT
                | O::URI_QUERY
                | O::PROXY_URI
                | O::PROXY_SCHEME
                | O::CONTENT_FORMAT
                | O::IF_MATCH
                | O::IF_NONE_MATCH
                | O::SIZE1
        );
    }
    if code == Code::DELETE {
        return matches!(
            option,
            O::URI_HOST | O::URI_PATH | O::URI_PORT | O::URI_QUERY | O::PROXY_URI | O::PROXY_SCHEME
        );
    }

    if code.is_response() {
        return match (code.class(), code.detail()) {
            (2, 3) => matches!(option, O::ETAG | O::MAX_AGE | O::OBSERVE),
            (2, 1) | (2, 2) | (2, 4) | (2, 5) => matches!(
                option,
                O::CONTENT_FORMAT | O::MAX_AGE | O::ETAG | O::OBSERVE | O::LOCATION_PATH | O::LOCATION_QUERY
            ),
            (4, _) | (5, _) => matches!(option, O::CONTENT_FORMAT | O::MAX_AGE),
            _ => false,
        };
    }

    false
}
