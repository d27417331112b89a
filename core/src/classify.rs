//! Failure classification
//!
//! The single place where raw failure signals become taxonomy kinds.
//! Precedence: structured reason code, then status code, then message
//! patterns. Anything left over is [`ErrorKind::Other`]; nothing is dropped.

use crate::error::ErrorKind;
use crate::traits::FailureSignal;

/// Map a raw failure signal to exactly one taxonomy kind
pub fn classify(signal: &FailureSignal) -> ErrorKind {
    signal
        .reason
        .as_deref()
        .and_then(classify_reason)
        .or_else(|| signal.status.and_then(classify_status))
        .or_else(|| classify_message(&signal.message))
        .unwrap_or(ErrorKind::Other)
}

fn classify_reason(reason: &str) -> Option<ErrorKind> {
    let normalized: String = reason
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == '-' || c == ' ' { '_' } else { c })
        .collect();

    let kind = match normalized.as_str() {
        "timeout" | "timed_out" | "deadline_exceeded" => ErrorKind::Timeout,
        "rate_limited" | "rate_limit" | "rate_limit_exceeded" | "too_many_requests"
        | "throttled" | "quota_exceeded" => ErrorKind::RateLimited,
        "auth" | "auth_failure" | "unauthorized" | "forbidden" | "invalid_api_key" => {
            ErrorKind::AuthFailure
        }
        "malformed_response" | "parse_error" | "invalid_json" => ErrorKind::MalformedResponse,
        "tool_selection" | "tool_selection_error" | "wrong_tool" => ErrorKind::ToolSelectionError,
        "parameter" | "parameter_error" | "invalid_parameters" => ErrorKind::ParameterError,
        "sequence_order" | "sequence_order_error" | "out_of_order" => {
            ErrorKind::SequenceOrderError
        }
        "dependency" | "dependency_error" | "missing_dependency" => ErrorKind::DependencyError,
        "max_turns" | "max_turns_exceeded" => ErrorKind::MaxTurnsExceeded,
        "other" => ErrorKind::Other,
        _ => return None,
    };
    Some(kind)
}

fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        429 => Some(ErrorKind::RateLimited),
        401 | 403 => Some(ErrorKind::AuthFailure),
        408 | 504 => Some(ErrorKind::Timeout),
        _ => None,
    }
}

// Ordered: the first matching pattern wins.
const MESSAGE_PATTERNS: &[(&str, ErrorKind)] = &[
    ("rate limit", ErrorKind::RateLimited),
    ("ratelimit", ErrorKind::RateLimited),
    ("too many requests", ErrorKind::RateLimited),
    ("timed out", ErrorKind::Timeout),
    ("timeout", ErrorKind::Timeout),
    ("deadline exceeded", ErrorKind::Timeout),
    ("unauthorized", ErrorKind::AuthFailure),
    ("invalid api key", ErrorKind::AuthFailure),
    ("authentication", ErrorKind::AuthFailure),
    ("max turns", ErrorKind::MaxTurnsExceeded),
    ("maximum turns", ErrorKind::MaxTurnsExceeded),
    ("tool selection", ErrorKind::ToolSelectionError),
    ("wrong tool", ErrorKind::ToolSelectionError),
    ("parameter", ErrorKind::ParameterError),
    ("out of order", ErrorKind::SequenceOrderError),
    ("sequence", ErrorKind::SequenceOrderError),
    ("dependency", ErrorKind::DependencyError),
    ("malformed", ErrorKind::MalformedResponse),
    ("json", ErrorKind::MalformedResponse),
    ("parse", ErrorKind::MalformedResponse),
];

fn classify_message(message: &str) -> Option<ErrorKind> {
    let lowered = message.to_ascii_lowercase();
    MESSAGE_PATTERNS
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
        .map(|(_, kind)| *kind)
}
