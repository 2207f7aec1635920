mod auto_start;
mod clock;
mod coordinator;
mod penalty;
mod phase;

pub use auto_start::{AutoStartScheduler, AutoStartToken, AUTO_START_DELAY};
pub use clock::{Clock, ZeroCrossing};
pub use coordinator::{
    CoordinatorState, Effect, Generation, Outcome, TimerCoordinator, TimerSnapshot,
};
pub use penalty::{should_penalize, MIN_ELAPSED_FOR_PENALTY, MIN_TIME_LEFT_FOR_PENALTY};
pub use phase::{CyclePosition, Phase, CYCLE_LEN};
