/// Input validation errors
///
/// These are the only errors the diagnostics surface returns to callers.
/// Everything that goes wrong after validation (socket drops, probe process
/// failures, connect timeouts) is folded into a degraded result instead.
use thiserror::Error;

/// Characters that must never reach a probe command line
const FORBIDDEN_TARGET_CHARS: [char; 9] = [';', '&', '|', '`', '$', '>', '<', '\n', '\r'];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("target must not be empty")]
    EmptyTarget,

    #[error("invalid IP or domain: '{0}'")]
    InvalidTarget(String),

    #[error("malformed port range '{0}', expected 'low-high' (e.g. '1-1000')")]
    MalformedRange(String),

    #[error("port range {low}-{high} is outside 1-65535")]
    PortOutOfBounds { low: i64, high: i64 },

    #[error("port range start {low} is greater than end {high}")]
    InvertedRange { low: u16, high: u16 },

    #[error("packet count must be between 1 and {max}, got {got}")]
    InvalidPacketCount { got: u32, max: u32 },
}

/// Validate an IP address or host name before any network action.
///
/// Returns the trimmed target. Rejects empty input, anything carrying
/// shell metacharacters, and anything a probe program would read as an option.
pub fn validate_target(target: &str) -> Result<&str, InputError> {
    let trimmed = target.trim();
    if trimmed.is_empty() {
        return Err(InputError::EmptyTarget);
    }
    if trimmed.starts_with('-')
        || trimmed.contains(FORBIDDEN_TARGET_CHARS)
        || trimmed.contains(char::is_whitespace)
    {
        return Err(InputError::InvalidTarget(target.to_string()));
    }
    Ok(trimmed)
}
