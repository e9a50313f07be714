use std::fmt;

use serde::Serialize;

/// Progress of one table through a run.
///
/// `Pending → Extracting → Delivering → Recorded`, or `Failed` from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Extracting,
    Delivering,
    Recorded,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Recorded | RunState::Failed)
    }

    pub fn can_become(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Pending, Extracting)
                | (Extracting, Delivering)
                | (Delivering, Recorded)
                | (Pending | Extracting | Delivering, Failed)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Pending => "pending",
            RunState::Extracting => "extracting",
            RunState::Delivering => "delivering",
            RunState::Recorded => "recorded",
            RunState::Failed => "failed",
        };
        f.pad(s)
    }
}

/// State tracker of a single table run.
#[derive(Debug)]
pub struct TableRun {
    table: String,
    state: RunState,
}

impl TableRun {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            state: RunState::Pending,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Moves to `next`. Illegal transitions are ignored and logged, leaving
    /// the current state untouched.
    pub fn advance(&mut self, next: RunState) -> bool {
        if !self.state.can_become(next) {
            log::error!(
                "Table '{}': illegal state transition {} -> {}",
                self.table,
                self.state,
                next
            );
            return false;
        }
        log::debug!("Table '{}': {} -> {}", self.table, self.state, next);
        self.state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_happy_path() {
        let mut run = TableRun::new("orders");
        assert_eq!(run.state(), RunState::Pending);
        for next in [RunState::Extracting, RunState::Delivering, RunState::Recorded] {
            assert!(run.advance(next));
        }
        assert!(run.state().is_terminal());
    }

    #[rstest]
    #[case(RunState::Pending)]
    #[case(RunState::Extracting)]
    #[case(RunState::Delivering)]
    fn test_any_intermediate_state_can_fail(#[case] from: RunState) {
        assert!(from.can_become(RunState::Failed));
    }

    #[rstest]
    #[case(RunState::Recorded, RunState::Failed)]
    #[case(RunState::Failed, RunState::Extracting)]
    #[case(RunState::Pending, RunState::Delivering)]
    #[case(RunState::Extracting, RunState::Recorded)]
    #[case(RunState::Delivering, RunState::Extracting)]
    fn test_illegal_transitions(#[case] from: RunState, #[case] to: RunState) {
        assert!(!from.can_become(to));
    }
}
