use std::fmt;

/// The phase a worker agent is in during a training step.
///
/// The regular cycle is `Idle -> Pulling -> Computing -> Pushing -> Idle`, `Stopped`
/// is terminal and reachable from any other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentState {
    Idle,
    Pulling,
    Computing,
    Pushing,
    Stopped,
}

impl AgentState {
    /// Returns `true` if the agent reached its terminal state.
    pub fn is_stopped(self) -> bool {
        self == Self::Stopped
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Pulling => "pulling",
            Self::Computing => "computing",
            Self::Pushing => "pushing",
            Self::Stopped => "stopped",
        };

        f.write_str(name)
    }
}
