//! Lock-free failure counters for the realtime process path.
//!
//! The audio thread must not log, so it records what went wrong into
//! atomics.  The UI thread takes a snapshot (resetting the counters) and
//! logs it.

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RealtimeDiagnostics {
    /// Blocks processed since the last snapshot.
    pub blocks: AtomicU64,
    /// Process calls the plugin reported as failed.
    pub process_failures: AtomicU32,
    /// Result code of the most recent failed process call.
    pub last_failure_code: AtomicI32,
    /// Blocks skipped because the host's buffers did not match the layout.
    pub buffer_mismatches: AtomicU32,
    /// Events that did not fit into the preallocated scratch.
    pub dropped_events: AtomicU32,
    /// Blocks silenced because the session was not processing.
    pub idle_blocks: AtomicU32,
    /// Blocks silenced because a UI-thread call held the processor.
    pub contended_blocks: AtomicU32,
}

impl RealtimeDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_block(&self) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failure(&self, code: i32) {
        self.process_failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure_code.store(code, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_mismatch(&self) {
        self.buffer_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self, count: u32) {
        if count > 0 {
            self.dropped_events.fetch_add(count, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_idle(&self) {
        self.idle_blocks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_contended(&self) {
        self.contended_blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Read and reset the counters (called from the UI thread).
    pub fn take_snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks: self.blocks.swap(0, Ordering::Relaxed),
            process_failures: self.process_failures.swap(0, Ordering::Relaxed),
            last_failure_code: self.last_failure_code.load(Ordering::Relaxed),
            buffer_mismatches: self.buffer_mismatches.swap(0, Ordering::Relaxed),
            dropped_events: self.dropped_events.swap(0, Ordering::Relaxed),
            idle_blocks: self.idle_blocks.swap(0, Ordering::Relaxed),
            contended_blocks: self.contended_blocks.swap(0, Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub blocks: u64,
    pub process_failures: u32,
    pub last_failure_code: i32,
    pub buffer_mismatches: u32,
    pub dropped_events: u32,
    pub idle_blocks: u32,
    pub contended_blocks: u32,
}

impl DiagnosticsSnapshot {
    pub fn has_problems(&self) -> bool {
        self.process_failures > 0
            || self.buffer_mismatches > 0
            || self.dropped_events > 0
            || self.contended_blocks > 0
    }

    /// Log anything worth a warning.
    pub fn log(&self, session: u64) {
        if self.process_failures > 0 {
            log::warn!(
                "Session {}: {} of {} process calls failed (last code {:#x})",
                session,
                self.process_failures,
                self.blocks,
                self.last_failure_code
            );
        }
        if self.buffer_mismatches > 0 {
            log::warn!(
                "Session {}: {} blocks skipped, buffers did not match the bus layout",
                session,
                self.buffer_mismatches
            );
        }
        if self.dropped_events > 0 {
            log::warn!(
                "Session {}: {} events dropped, per-block capacity exceeded",
                session,
                self.dropped_events
            );
        }
        if self.contended_blocks > 0 {
            log::debug!(
                "Session {}: {} blocks silenced while the UI thread held the plugin",
                session,
                self.contended_blocks
            );
        }
    }
}
