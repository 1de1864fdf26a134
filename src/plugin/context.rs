//! Process-wide host context shared by every session.
//!
//! Plugins are initialized against a host object.  One such object exists
//! per process while at least one session is alive: the first
//! [`HostContext::acquire`] creates it, later calls share it, and it is
//! released when the last `Arc` goes away.  The context is immutable after
//! creation, so sessions on different threads can share it freely.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::config::HostInfo;
use crate::vst3::com_host::{self, HostApplication};

static SHARED: Mutex<Weak<HostContext>> = parking_lot::const_mutex(Weak::new());

/// Owning handle to the host-application COM object.
struct ApplicationHandle(*mut HostApplication);

// The object is reference counted with atomics and never mutated after
// construction.
unsafe impl Send for ApplicationHandle {}
unsafe impl Sync for ApplicationHandle {}

impl Drop for ApplicationHandle {
    fn drop(&mut self) {
        unsafe { com_host::release_host_application(self.0) };
    }
}

pub struct HostContext {
    application: ApplicationHandle,
}

impl HostContext {
    /// Return the live context, or create one from `info` if none exists.
    /// `info` is ignored while a context is already alive.
    pub fn acquire(info: &HostInfo) -> Arc<HostContext> {
        let mut shared = SHARED.lock();
        if let Some(existing) = shared.upgrade() {
            return existing;
        }
        let cx = Arc::new(HostContext {
            application: ApplicationHandle(com_host::new_host_application(info)),
        });
        *shared = Arc::downgrade(&cx);
        log::debug!("Host context created for \"{}\"", info.name);
        cx
    }

    /// Is a context currently alive anywhere in the process?
    pub fn is_live() -> bool {
        SHARED.lock().strong_count() > 0
    }

    /// The host object handed to plugin `initialize` calls.
    pub(crate) fn application(&self) -> *mut HostApplication {
        self.application.0
    }
}

impl Drop for HostContext {
    fn drop(&mut self) {
        log::debug!("Host context released");
    }
}
