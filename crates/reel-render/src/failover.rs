//! Backend failover state machine.
//!
//! Pure bookkeeping: the presenter reports what happened and gets back the
//! action to take. The GPU path gets `threshold` consecutive drawable
//! failures before playback drops to software; software getting the same
//! is terminal.

use crate::backend::BackendKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Uninitialized,
    Active(BackendKind),
    /// The GPU path is being torn down in favor of software.
    Degrading,
    Failed,
}

impl BackendState {
    pub fn is_failed(&self) -> bool {
        matches!(self, BackendState::Failed)
    }

    pub fn active_kind(&self) -> Option<BackendKind> {
        match self {
            BackendState::Active(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendState::Uninitialized => write!(f, "uninitialized"),
            BackendState::Active(kind) => write!(f, "active ({})", kind),
            BackendState::Degrading => write!(f, "degrading"),
            BackendState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverAction {
    None,
    SwitchToSoftware,
    Halt,
}

#[derive(Debug, Clone)]
pub struct FailoverController {
    state: BackendState,
    consecutive_failures: u32,
    threshold: u32,
    failovers: u32,
}

impl FailoverController {
    pub fn new(threshold: u32) -> Self {
        Self {
            state: BackendState::Uninitialized,
            consecutive_failures: 0,
            threshold: threshold.max(1),
            failovers: 0,
        }
    }

    pub fn state(&self) -> BackendState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Number of GPU → software switches so far.
    pub fn failovers(&self) -> u32 {
        self.failovers
    }

    /// A backend finished initializing and is now presenting.
    pub fn activated(&mut self, kind: BackendKind) {
        self.state = BackendState::Active(kind);
        self.consecutive_failures = 0;
    }

    /// A frame reached the screen.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// No drawable was available this cycle.
    pub fn record_unavailable(&mut self) -> FailoverAction {
        let BackendState::Active(kind) = self.state else {
            return FailoverAction::None;
        };
        self.consecutive_failures += 1;
        if self.consecutive_failures < self.threshold {
            return FailoverAction::None;
        }
        tracing::warn!(
            backend = %kind,
            failures = self.consecutive_failures,
            "drawable failure threshold reached"
        );
        self.escalate(kind)
    }

    /// A backend failed outright: initialization error, device loss, or a
    /// failed present. Escalates immediately.
    pub fn record_fault(&mut self, kind: BackendKind) -> FailoverAction {
        match self.state {
            BackendState::Failed => FailoverAction::Halt,
            _ => self.escalate(kind),
        }
    }

    fn escalate(&mut self, kind: BackendKind) -> FailoverAction {
        self.consecutive_failures = 0;
        match kind {
            BackendKind::Gpu => {
                self.state = BackendState::Degrading;
                self.failovers += 1;
                FailoverAction::SwitchToSoftware
            }
            BackendKind::Software => {
                self.state = BackendState::Failed;
                FailoverAction::Halt
            }
        }
    }

    pub fn halt(&mut self) {
        self.state = BackendState::Failed;
    }
}
