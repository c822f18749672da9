//! Environment-variable override parsing.
//!
//! Every tuning knob read from the environment goes through these helpers so
//! the parsing rules live in one place.

use std::time::Duration;

/// Parses the environment variable as a `u64`, returning `Some` only when
/// the value is a valid positive (> 0) integer.
#[inline]
pub(crate) fn env_var_positive_u64(var_name: &str) -> Option<u64> {
    std::env::var(var_name)
        .ok()
        .and_then(|raw| parse_positive_u64(&raw))
}

/// Reads a millisecond duration override, ignoring unset, malformed and
/// zero values.
#[inline]
pub(crate) fn env_var_millis(var_name: &str) -> Option<Duration> {
    env_var_positive_u64(var_name).map(Duration::from_millis)
}

fn parse_positive_u64(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|value| *value > 0)
}
