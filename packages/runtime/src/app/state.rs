//! Lifecycle state of one service run.
//!
//! State machine: Created -> Bootstrapping -> Running -> ShuttingDown -> Stopped,
//! with Aborted reachable from Bootstrapping and Running. Stopped and Aborted
//! are final; shutdown after an abort does not leave Aborted.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Created,
    Bootstrapping,
    Running,
    ShuttingDown,
    Stopped,
    Aborted,
}

impl AppState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Bootstrapping => "bootstrapping",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
            Self::Aborted => "aborted",
        }
    }

    /// Whether the run can move from `self` to `next`.
    #[must_use]
    pub fn can_transition(self, next: AppState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Bootstrapping)
                | (Self::Bootstrapping | Self::Running, Self::Aborted)
                | (Self::Bootstrapping, Self::Running)
                | (Self::Running, Self::ShuttingDown)
                | (Self::ShuttingDown, Self::Stopped)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Aborted)
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid state transition from {from} to {to}")]
pub struct TransitionError {
    pub from: AppState,
    pub to: AppState,
}

/// Shared, lock-free holder of the current [`AppState`].
#[derive(Debug, Clone)]
pub struct StateCell(Arc<ArcSwap<AppState>>);

impl StateCell {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(ArcSwap::from_pointee(AppState::Created)))
    }

    #[must_use]
    pub fn get(&self) -> AppState {
        **self.0.load()
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransitionError`] and leaves the state untouched when the
    /// move is not allowed.
    pub fn transition(&self, next: AppState) -> Result<(), TransitionError> {
        let mut result = Ok(());
        self.0.rcu(|current| {
            if current.can_transition(next) {
                result = Ok(());
                Arc::new(next)
            } else {
                result = Err(TransitionError { from: **current, to: next });
                Arc::clone(current)
            }
        });
        result
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let state = StateCell::new();
        for next in [
            AppState::Bootstrapping,
            AppState::Running,
            AppState::ShuttingDown,
            AppState::Stopped,
        ] {
            state.transition(next).unwrap();
        }
        assert!(state.get().is_terminal());
    }

    #[test]
    fn abort_is_reachable_from_bootstrap_and_run() {
        assert!(AppState::Bootstrapping.can_transition(AppState::Aborted));
        assert!(AppState::Running.can_transition(AppState::Aborted));
        assert!(!AppState::Created.can_transition(AppState::Aborted));
        assert!(!AppState::Stopped.can_transition(AppState::Aborted));
        assert!(!AppState::Aborted.can_transition(AppState::ShuttingDown));
    }

    #[test]
    fn stopped_is_final() {
        let state = StateCell::new();
        state.transition(AppState::Bootstrapping).unwrap();
        state.transition(AppState::Running).unwrap();
        state.transition(AppState::ShuttingDown).unwrap();
        state.transition(AppState::Stopped).unwrap();

        let err = state.transition(AppState::Bootstrapping).unwrap_err();
        assert_eq!(err.from, AppState::Stopped);
        assert_eq!(state.get(), AppState::Stopped);
    }

    #[test]
    fn illegal_transition_leaves_state() {
        let state = StateCell::new();
        assert!(state.transition(AppState::Running).is_err());
        assert_eq!(state.get(), AppState::Created);
    }
}
