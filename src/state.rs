//! Engine readiness and the reallocation retry policy.

use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    /// Capture cannot work in this process. Never retried.
    Unavailable,
    /// Initialized, nothing allocated.
    Ready,
    Allocated,
    /// The input desktop could not be opened, usually a secure desktop.
    AccessDeniedDesktop,
    /// Duplication was refused, usually protected content on screen.
    AccessDeniedDuplication,
    /// Sessions still exist but acquisition reported them invalid.
    LostAccess,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeniedKind {
    Desktop,
    Duplication,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AllocationEvent {
    Initialized,
    InitFailed,
    Allocated,
    Denied(DeniedKind),
    AccessLost,
    Unsupported,
    /// Reallocation failed after sessions were already released.
    SessionsReleased,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReallocationDue {
    Now,
    NotYet,
    Never,
    /// Due only if the requested screens differ from the allocated ones.
    IfScreensChanged,
}

pub(crate) struct AllocationStateMachine {
    state: EngineState,
    denied_at: Option<Instant>,
    desktop_backoff: Duration,
    duplication_backoff: Duration,
}

impl AllocationStateMachine {
    pub(crate) fn new(desktop_backoff: Duration, duplication_backoff: Duration) -> Self {
        Self {
            state: EngineState::Uninitialized,
            denied_at: None,
            desktop_backoff,
            duplication_backoff,
        }
    }

    pub(crate) fn state(&self) -> EngineState {
        self.state
    }

    pub(crate) fn denied_at(&self) -> Option<Instant> {
        self.denied_at
    }

    /// Applies `event` and returns the resulting state. Events that are not
    /// valid in the current state leave it unchanged.
    pub(crate) fn apply(&mut self, event: AllocationEvent, now: Instant) -> EngineState {
        use EngineState::*;

        let next = match (self.state, event) {
            (_, AllocationEvent::Unsupported | AllocationEvent::InitFailed) => Unavailable,
            (Unavailable, _) => Unavailable,
            (Uninitialized, AllocationEvent::Initialized) => Ready,
            (
                Ready | Allocated | AccessDeniedDesktop | AccessDeniedDuplication | LostAccess,
                AllocationEvent::Allocated,
            ) => Allocated,
            (_, AllocationEvent::Denied(kind)) => {
                self.denied_at = Some(now);
                match kind {
                    DeniedKind::Desktop => AccessDeniedDesktop,
                    DeniedKind::Duplication => AccessDeniedDuplication,
                }
            }
            (Allocated, AllocationEvent::AccessLost) => LostAccess,
            (Allocated, AllocationEvent::SessionsReleased) => Ready,
            (current, _) => current,
        };

        if next != self.state {
            debug!(from = ?self.state, to = ?next, ?event, "engine state changed");
        }
        self.state = next;
        next
    }

    pub(crate) fn reallocation_due(&self, now: Instant) -> ReallocationDue {
        let backoff = match self.state {
            EngineState::Unavailable => return ReallocationDue::Never,
            EngineState::Allocated => return ReallocationDue::IfScreensChanged,
            EngineState::AccessDeniedDesktop => self.desktop_backoff,
            EngineState::AccessDeniedDuplication => self.duplication_backoff,
            EngineState::Uninitialized | EngineState::Ready | EngineState::LostAccess => {
                return ReallocationDue::Now;
            }
        };

        match self.denied_at {
            Some(at) if now.saturating_duration_since(at) < backoff => ReallocationDue::NotYet,
            _ => ReallocationDue::Now,
        }
    }
}
