//! Editor view wrapper over a raw `IPlugView`.
//!
//! The host owns the window; we only attach the plugin's view into the
//! handle it gives us and install an [`HostPlugFrame`] so resize requests
//! reach the host as notifications.  The view learns its new size only when
//! the host calls [`PlugView::set_size`] after resizing its window.

use std::sync::Arc;

use vst3::Steinberg::*;

use super::com_host::{HostPlugFrame, new_host_plug_frame, release_host_plug_frame};
use super::host::check;
use super::module::Vst3Module;
use crate::plugin::edit::EditTracker;
use crate::plugin::model::{CallResult, PlugView};
use crate::plugin::types::{ViewSize, WindowHandle, WindowKind};

/// Not every SDK revision exports this one.
const PLATFORM_TYPE_WAYLAND: FIDString = c"WaylandSurfaceID".as_ptr();

fn platform_type(kind: WindowKind) -> Option<FIDString> {
    match kind {
        WindowKind::Hwnd => Some(kPlatformTypeHWND),
        WindowKind::X11 => Some(kPlatformTypeX11EmbedWindowID),
        WindowKind::Wayland => Some(PLATFORM_TYPE_WAYLAND),
        WindowKind::NsView => Some(kPlatformTypeNSView),
        WindowKind::Other => None,
    }
}

pub struct Vst3View {
    view: *mut IPlugView,
    frame: *mut HostPlugFrame,
    attached: bool,
    _module: Arc<Vst3Module>,
}

unsafe impl Send for Vst3View {}

impl Vst3View {
    /// Takes ownership of the reference returned by `createView`.
    pub(crate) fn new(view: *mut IPlugView, tracker: Arc<EditTracker>, module: Arc<Vst3Module>) -> Self {
        Self {
            view,
            frame: new_host_plug_frame(tracker),
            attached: false,
            _module: module,
        }
    }
}

impl PlugView for Vst3View {
    fn is_platform_supported(&self, kind: WindowKind) -> bool {
        let Some(platform) = platform_type(kind) else {
            return false;
        };
        unsafe { ((*(*self.view).vtbl).isPlatformTypeSupported)(self.view, platform) == kResultOk }
    }

    fn attach(&mut self, parent: WindowHandle, kind: WindowKind) -> CallResult {
        let platform = platform_type(kind).ok_or(crate::plugin::model::PluginCallError {
            code: kNotImplemented,
        })?;
        unsafe {
            ((*(*self.view).vtbl).setFrame)(self.view, self.frame as *mut IPlugFrame);
            let result = ((*(*self.view).vtbl).attached)(self.view, parent.0, platform);
            if result != kResultOk {
                log::error!("VST3: IPlugView::attached failed ({:#x})", result);
                ((*(*self.view).vtbl).setFrame)(self.view, std::ptr::null_mut());
                return check(result);
            }
        }
        self.attached = true;
        Ok(())
    }

    fn size(&self) -> Option<ViewSize> {
        unsafe {
            let mut rect: ViewRect = std::mem::zeroed();
            if ((*(*self.view).vtbl).getSize)(self.view, &mut rect) != kResultOk {
                return None;
            }
            Some(ViewSize {
                width: (rect.right - rect.left).max(0) as u32,
                height: (rect.bottom - rect.top).max(0) as u32,
            })
        }
    }

    fn set_size(&mut self, size: ViewSize) -> CallResult {
        let mut rect = ViewRect {
            left: 0,
            top: 0,
            right: i32::try_from(size.width).unwrap_or(i32::MAX),
            bottom: i32::try_from(size.height).unwrap_or(i32::MAX),
        };
        unsafe {
            if ((*(*self.view).vtbl).canResize)(self.view) == kResultOk {
                ((*(*self.view).vtbl).checkSizeConstraint)(self.view, &mut rect);
            }
            check(((*(*self.view).vtbl).onSize)(self.view, &mut rect))
        }
    }

    fn removed(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        unsafe {
            ((*(*self.view).vtbl).removed)(self.view);
            ((*(*self.view).vtbl).setFrame)(self.view, std::ptr::null_mut());
        }
    }
}

impl Drop for Vst3View {
    fn drop(&mut self) {
        self.removed();
        unsafe {
            ((*(*self.view).vtbl).base.release)(self.view as *mut FUnknown);
            release_host_plug_frame(self.frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_types() {
        assert!(platform_type(WindowKind::Other).is_none());
        let x11 = platform_type(WindowKind::X11).unwrap();
        let name = unsafe { std::ffi::CStr::from_ptr(x11) };
        assert_eq!(name.to_str().unwrap(), "X11EmbedWindowID");
        let wayland = platform_type(WindowKind::Wayland).unwrap();
        let name = unsafe { std::ffi::CStr::from_ptr(wayland) };
        assert_eq!(name.to_str().unwrap(), "WaylandSurfaceID");
    }
}
