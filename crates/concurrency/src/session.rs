//! Lifecycle of one backend session inside a coordinator
//!
//! State transitions:
//! - `Created` → `Open` (first operation)
//! - `Created | Open | Flushed` → `Flushed` (flush)
//! - `Flushed` → `Open` (more work after a flush)
//! - `Flushed` → `Committed` (commit succeeded)
//! - `Created | Open | Flushed` → `RolledBack` (commit failed, or never
//!   committed because an earlier commit failed)
//! - any state → `Closed`
//!
//! Terminal state (no transitions allowed except re-closing):
//! - `Closed`

use std::fmt;
use strata_core::error::{StrataError, StrataResult};

/// State of one backend session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Session obtained from the backend, nothing run yet
    Created,
    /// At least one operation ran
    Open,
    /// Buffered changes pushed to the backend
    Flushed,
    /// Backend commit succeeded
    Committed,
    /// Commit failed or was never attempted
    RolledBack,
    /// Session released
    Closed,
}

impl SessionState {
    /// Whether load/save/delete style operations are allowed
    pub fn accepts_work(&self) -> bool {
        matches!(
            self,
            SessionState::Created | SessionState::Open | SessionState::Flushed
        )
    }

    /// Whether the state allows moving to `next`
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, Closed) => true,
            (Created | Open | Flushed, Open | Flushed | RolledBack) => true,
            (Flushed, Committed) => true,
            _ => false,
        }
    }

    /// Move to `next`
    ///
    /// # Arguments
    ///
    /// * `next` - Target state
    /// * `backend` - Backend name, for the error message
    ///
    /// # Errors
    ///
    /// Returns `StrataError::SessionState` if the transition is not allowed.
    pub fn transition(&mut self, next: SessionState, backend: &str) -> StrataResult<()> {
        if !self.can_transition_to(next) {
            return Err(StrataError::SessionState {
                backend: backend.to_string(),
                state: self.to_string(),
                operation: next.operation().to_string(),
            });
        }
        *self = next;
        Ok(())
    }

    /// Check that work may run, moving `Created`/`Flushed` to `Open`
    ///
    /// # Errors
    ///
    /// Returns `StrataError::SessionState` once the session committed,
    /// rolled back or closed.
    pub fn begin_work(&mut self, backend: &str) -> StrataResult<()> {
        if !self.accepts_work() {
            return Err(StrataError::SessionState {
                backend: backend.to_string(),
                state: self.to_string(),
                operation: SessionState::Open.operation().to_string(),
            });
        }
        *self = SessionState::Open;
        Ok(())
    }

    fn operation(&self) -> &'static str {
        match self {
            SessionState::Created => "create",
            SessionState::Open => "use",
            SessionState::Flushed => "flush",
            SessionState::Committed => "commit",
            SessionState::RolledBack => "roll back",
            SessionState::Closed => "close",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "Created",
            SessionState::Open => "Open",
            SessionState::Flushed => "Flushed",
            SessionState::Committed => "Committed",
            SessionState::RolledBack => "RolledBack",
            SessionState::Closed => "Closed",
        };
        f.write_str(name)
    }
}
