//! Deterministic lifecycle controller.
//!
//! Transitions are linear: `INIT → PLAN → EXECUTE → REVIEW`, then back to
//! `PLAN` for the next step or on to `TERMINATE`. Anything else is a
//! runtime defect, not a recoverable condition.

use oao_log::LifecycleState;
use std::fmt;

/// Attempted transition not on the lifecycle diagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    /// State the machine was in
    pub from: LifecycleState,
    /// State that was requested
    pub to: LifecycleState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid transition from {} to {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// The lifecycle state machine
#[derive(Debug, Clone)]
pub struct Lifecycle {
    current: LifecycleState,
    history: Vec<LifecycleState>,
}

impl Lifecycle {
    /// A fresh machine in `INIT`
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: LifecycleState::Init,
            history: vec![LifecycleState::Init],
        }
    }

    const fn allowed(from: LifecycleState) -> &'static [LifecycleState] {
        match from {
            LifecycleState::Init => &[LifecycleState::Plan],
            LifecycleState::Plan => &[LifecycleState::Execute],
            LifecycleState::Execute => &[LifecycleState::Review],
            LifecycleState::Review => &[LifecycleState::Plan, LifecycleState::Terminate],
            LifecycleState::Terminate => &[],
        }
    }

    /// Move to the next state if the diagram allows it.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`], which the engine treats as a fatal
    /// internal defect.
    pub fn transition(&mut self, to: LifecycleState) -> Result<(), InvalidTransition> {
        if !Self::allowed(self.current).contains(&to) {
            return Err(InvalidTransition {
                from: self.current,
                to,
            });
        }
        self.current = to;
        self.history.push(to);
        Ok(())
    }

    /// Current state
    #[must_use]
    pub const fn current(&self) -> LifecycleState {
        self.current
    }

    /// All states visited, in order
    #[must_use]
    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    /// Whether the machine has reached `TERMINATE`
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.current == LifecycleState::Terminate
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
