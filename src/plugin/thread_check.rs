//! Thread-affinity checks.
//!
//! UI-thread operations and the audio-thread process call must never be
//! mixed up.  The check is advisory: a violation is counted and, when it is
//! safe to do so, logged.  The audio thread never logs.

use std::cell::Cell;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadRole {
    Ui,
    Audio,
    Unknown,
}

impl ThreadRole {
    fn to_u8(self) -> u8 {
        match self {
            Self::Ui => 0,
            Self::Audio => 1,
            Self::Unknown => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ui,
            1 => Self::Audio,
            _ => Self::Unknown,
        }
    }
}

/// Answers "which thread am I on?".  Injected into each session.
pub trait ThreadIdentity: Send + Sync {
    fn role(&self) -> ThreadRole;
}

thread_local! {
    static CURRENT_ROLE: Cell<ThreadRole> = const { Cell::new(ThreadRole::Unknown) };
}

/// Tag the calling thread.  Hosts call this once from their UI thread and
/// once from their audio thread.
pub fn mark_current_thread(role: ThreadRole) {
    CURRENT_ROLE.with(|r| r.set(role));
}

/// Production identity: reads the tag set by [`mark_current_thread`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkedThreads;

impl ThreadIdentity for MarkedThreads {
    fn role(&self) -> ThreadRole {
        CURRENT_ROLE.with(|r| r.get())
    }
}

/// Identity pinned to a role the caller chooses, for tests.
#[derive(Debug)]
pub struct FixedThreadRole {
    role: AtomicU8,
}

impl FixedThreadRole {
    pub fn new(role: ThreadRole) -> Self {
        Self {
            role: AtomicU8::new(role.to_u8()),
        }
    }

    pub fn set(&self, role: ThreadRole) {
        self.role.store(role.to_u8(), Ordering::Relaxed);
    }
}

impl ThreadIdentity for FixedThreadRole {
    fn role(&self) -> ThreadRole {
        ThreadRole::from_u8(self.role.load(Ordering::Relaxed))
    }
}

pub struct ThreadGuard {
    identity: Arc<dyn ThreadIdentity>,
    enabled: bool,
    violations: AtomicU32,
}

impl ThreadGuard {
    pub fn new(identity: Arc<dyn ThreadIdentity>, enabled: bool) -> Self {
        Self {
            identity,
            enabled,
            violations: AtomicU32::new(0),
        }
    }

    /// Returns `false` when `op` was called from the audio thread.
    ///
    /// The violation is only counted here; the session logs the count from
    /// the UI thread later.
    pub fn ensure_ui(&self, _op: &'static str) -> bool {
        if !self.enabled {
            return true;
        }
        if self.identity.role() == ThreadRole::Audio {
            self.violations.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Returns `false` when `op` was called from the UI thread.
    pub fn ensure_audio(&self, op: &'static str) -> bool {
        if !self.enabled {
            return true;
        }
        if self.identity.role() == ThreadRole::Ui {
            self.violations.fetch_add(1, Ordering::Relaxed);
            log::error!("{} called from the UI thread, it must run on the audio thread", op);
            return false;
        }
        true
    }

    /// Read and reset the violation counter.
    pub fn take_violations(&self) -> u32 {
        self.violations.swap(0, Ordering::Relaxed)
    }
}
