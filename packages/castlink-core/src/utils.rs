//! General utilities shared across the engine.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns `true` if `level` is a finite volume inside the accepted range.
#[must_use]
pub fn is_valid_volume(level: f32) -> bool {
    level.is_finite()
        && (crate::protocol_constants::VOLUME_MIN..=crate::protocol_constants::VOLUME_MAX)
            .contains(&level)
}
