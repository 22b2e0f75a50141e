//! System state for the store's operation phases.
//!
//! Recovery ends by publishing `{ phase: Rest, version: v + 1 }`, where `v` is
//! the log checkpoint's version: records stamped `v` are the last legitimate
//! survivors, and the newly active epoch is `v + 1`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation phase of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Phase {
    /// No operation in progress.
    #[default]
    Rest = 0,
    /// Recovery in progress.
    Recovering = 1,
    /// Invalid phase.
    Invalid = 255,
}

impl From<u8> for Phase {
    fn from(v: u8) -> Self {
        match v {
            0 => Phase::Rest,
            1 => Phase::Recovering,
            _ => Phase::Invalid,
        }
    }
}

/// Progress of a recovery run, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryPhase {
    /// Recovery not started.
    #[default]
    NotStarted,
    /// Loading checkpoint metadata.
    LoadingMetadata,
    /// Restoring the hash index.
    RestoringIndex,
    /// Replaying the log tail.
    ReplayingLog,
    /// Restoring the in-memory page window.
    RestoringPages,
    /// Rehydrating session resume points.
    RestoringSessions,
    /// Recovery completed successfully.
    Completed,
}

/// Packed (phase, version) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemState {
    /// Current phase.
    pub phase: Phase,
    /// Current checkpoint epoch.
    pub version: u32,
}

impl SystemState {
    /// A store at rest in the given epoch.
    pub const fn rest(version: u32) -> Self {
        Self {
            phase: Phase::Rest,
            version,
        }
    }

    fn to_control(self) -> u64 {
        ((self.phase as u64) << 32) | self.version as u64
    }

    fn from_control(control: u64) -> Self {
        Self {
            phase: Phase::from((control >> 32) as u8),
            version: control as u32,
        }
    }
}

/// Atomic cell holding a [`SystemState`].
#[derive(Debug)]
pub struct AtomicSystemState {
    control: AtomicU64,
}

impl AtomicSystemState {
    /// Create a new atomic system state.
    pub fn new(state: SystemState) -> Self {
        Self {
            control: AtomicU64::new(state.to_control()),
        }
    }

    /// Load the state atomically.
    pub fn load(&self, ordering: Ordering) -> SystemState {
        SystemState::from_control(self.control.load(ordering))
    }

    /// Store the state atomically.
    pub fn store(&self, state: SystemState, ordering: Ordering) {
        self.control.store(state.to_control(), ordering);
    }
}
