//! Skip penalty policy.
//!
//! A manual skip of a focus phase costs the pets some happiness and hunger,
//! but only when the user had both invested a real amount of time and still
//! owed a real amount. Skips in the first or the last minute are free.

use super::phase::Phase;

/// Minimum seconds spent in focus before a skip is penalized.
pub const MIN_ELAPSED_FOR_PENALTY: u64 = 60;

/// Minimum seconds still on the clock for a skip to be penalized.
pub const MIN_TIME_LEFT_FOR_PENALTY: u64 = 60;

/// Whether skipping now should trigger the pet-stat decrease.
pub fn should_penalize(phase: Phase, elapsed: Option<u64>, time_left: u64, is_auto: bool) -> bool {
    if !phase.is_focus() || is_auto {
        return false;
    }
    match elapsed {
        Some(elapsed) => {
            elapsed >= MIN_ELAPSED_FOR_PENALTY && time_left >= MIN_TIME_LEFT_FOR_PENALTY
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deliberate_mid_focus_skip_is_penalized() {
        assert!(should_penalize(Phase::Focus, Some(61), 61, false));
        assert!(should_penalize(Phase::Focus, Some(60), 60, false));
    }

    #[test]
    fn first_minute_is_free() {
        assert!(!should_penalize(Phase::Focus, Some(59), 61, false));
    }

    #[test]
    fn last_minute_is_free() {
        assert!(!should_penalize(Phase::Focus, Some(1441), 59, false));
    }

    #[test]
    fn breaks_are_never_penalized() {
        assert!(!should_penalize(Phase::ShortBreak, Some(120), 120, false));
        assert!(!should_penalize(Phase::LongBreak, Some(120), 120, false));
    }

    #[test]
    fn automatic_skips_are_never_penalized() {
        assert!(!should_penalize(Phase::Focus, Some(120), 120, true));
    }

    #[test]
    fn unknown_elapsed_is_never_penalized() {
        assert!(!should_penalize(Phase::Focus, None, 1500, false));
    }
}
