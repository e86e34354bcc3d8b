/// Lifecycle of a batch job
///
/// A driver starts `Idle`, is `Running` while it iterates work units, and
/// ends in exactly one terminal state.
use std::fmt;

/// Represents the current state of a batch driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverState {
    // ===== Active States =====
    /// Created, no unit started yet
    Idle,

    /// Iterating work units
    Running,

    // ===== Terminal States =====
    /// Every unit of the resumed range was committed or skipped
    Completed,

    /// A persistence failure stopped the job
    Aborted,

    /// The job was interrupted from outside; committed units stay on disk
    Cancelled,
}

impl DriverState {
    /// Returns true if the driver will not change state again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Cancelled)
    }

    /// Whether moving from this state to `next` is a legal transition
    pub fn can_transition_to(&self, next: DriverState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running)
                | (Self::Idle, Self::Aborted)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Aborted)
                | (Self::Running, Self::Cancelled)
        )
    }

    /// Process exit code for a job that ended in this state
    ///
    /// 130 follows the shell convention for SIGINT.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::Cancelled => 130,
            Self::Idle | Self::Running | Self::Aborted => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns all possible driver states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Idle,
            Self::Running,
            Self::Completed,
            Self::Aborted,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
