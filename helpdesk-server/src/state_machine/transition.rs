//! Status transition table.
//!
//! The lifecycle of a help request is a small explicit state machine:
//!
//! ```text
//! pending ──assign──▶ in_progress ──resolve──▶ resolved
//!                       │     ▲
//!                escalate     reassign
//!                       ▼     │
//!                      escalated
//! ```
//!
//! Every edge not listed in `TRANSITIONS` is illegal. `resolved` has no
//! outgoing edges.

use std::fmt;

use helpdesk_core::RequestStatus;

/// One legal edge of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RequestStatus,
    pub to: RequestStatus,
    /// Name of the action that drives this edge (for logs).
    pub action: &'static str,
}

pub const TRANSITIONS: &[Transition] = &[
    Transition {
        from: RequestStatus::Pending,
        to: RequestStatus::InProgress,
        action: "assign",
    },
    Transition {
        from: RequestStatus::InProgress,
        to: RequestStatus::Resolved,
        action: "resolve",
    },
    Transition {
        from: RequestStatus::InProgress,
        to: RequestStatus::Escalated,
        action: "escalate",
    },
    Transition {
        from: RequestStatus::Escalated,
        to: RequestStatus::InProgress,
        action: "reassign",
    },
];

/// An edge that is not in the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: RequestStatus,
    pub to: RequestStatus,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot move from {} to {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Look up the edge `from -> to`.
pub fn transition(from: RequestStatus, to: RequestStatus) -> Result<Transition, IllegalTransition> {
    TRANSITIONS
        .iter()
        .find(|t| t.from == from && t.to == to)
        .copied()
        .ok_or(IllegalTransition { from, to })
}

pub fn is_legal(from: RequestStatus, to: RequestStatus) -> bool {
    transition(from, to).is_ok()
}

/// Statuses reachable in one step from `from`.
pub fn next_statuses(from: RequestStatus) -> Vec<RequestStatus> {
    TRANSITIONS
        .iter()
        .filter(|t| t.from == from)
        .map(|t| t.to)
        .collect()
}
