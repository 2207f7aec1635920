use serde::{Deserialize, Serialize};

/// Number of positions in one focus/break cycle.
pub const CYCLE_LEN: u8 = 4;

/// Timer mode for the current position in the cycle.
///
/// Serialized in the backend's session-type spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Focus,
    ShortBreak,
    LongBreak,
}

impl Phase {
    pub fn is_focus(self) -> bool {
        self == Phase::Focus
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Focus => "Focus",
            Phase::ShortBreak => "Short Break",
            Phase::LongBreak => "Long Break",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Position within the four-step cycle: focus, short break, focus, long break.
///
/// Always in `0..CYCLE_LEN`; arithmetic wraps in both directions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CyclePosition(u8);

impl CyclePosition {
    pub fn new(position: u8) -> Self {
        Self(position % CYCLE_LEN)
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn phase(self) -> Phase {
        match self.0 {
            1 => Phase::ShortBreak,
            3 => Phase::LongBreak,
            _ => Phase::Focus,
        }
    }

    pub fn advance(self) -> Self {
        Self((self.0 + 1) % CYCLE_LEN)
    }

    pub fn retreat(self) -> Self {
        Self((self.0 + CYCLE_LEN - 1) % CYCLE_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cycle_maps_positions_to_phases() {
        let phases: Vec<Phase> = (0..CYCLE_LEN).map(|p| CyclePosition::new(p).phase()).collect();
        assert_eq!(
            phases,
            vec![Phase::Focus, Phase::ShortBreak, Phase::Focus, Phase::LongBreak]
        );
    }

    #[test]
    fn retreat_wraps_from_zero() {
        assert_eq!(CyclePosition::new(0).retreat(), CyclePosition::new(3));
        assert_eq!(CyclePosition::new(3).advance(), CyclePosition::new(0));
    }

    #[test]
    fn session_type_wire_names() {
        assert_eq!(serde_json::to_string(&Phase::ShortBreak).unwrap(), "\"SHORT_BREAK\"");
        assert_eq!(serde_json::to_string(&Phase::LongBreak).unwrap(), "\"LONG_BREAK\"");
        assert_eq!(serde_json::to_string(&Phase::Focus).unwrap(), "\"FOCUS\"");
    }

    proptest! {
        #[test]
        fn four_advances_close_the_cycle(p in 0u8..=255) {
            let pos = CyclePosition::new(p);
            let back = pos.advance().advance().advance().advance();
            prop_assert_eq!(back, pos);
            prop_assert_eq!(back.phase(), pos.phase());
        }

        #[test]
        fn retreat_undoes_advance(p in 0u8..=255) {
            let pos = CyclePosition::new(p);
            prop_assert_eq!(pos.advance().retreat(), pos);
            prop_assert!(pos.retreat().index() < CYCLE_LEN);
        }

        #[test]
        fn one_long_break_per_cycle(p in 0u8..=255) {
            let mut pos = CyclePosition::new(p);
            let mut longs = 0;
            let mut focus = 0;
            for _ in 0..CYCLE_LEN {
                match pos.phase() {
                    Phase::LongBreak => longs += 1,
                    Phase::Focus => focus += 1,
                    Phase::ShortBreak => {}
                }
                pos = pos.advance();
            }
            prop_assert_eq!(longs, 1);
            prop_assert_eq!(focus, 2);
        }
    }
}
