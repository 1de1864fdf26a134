//! VST3 COM host objects: IHostApplication, IComponentHandler(2),
//! IPlugFrame, IBStream and IAttributeList.
//!
//! All of these are hand-rolled COM objects.  Each struct is `#[repr(C)]`
//! with the vtable pointer as its first field, so a `*mut HostXxx` can be
//! cast to the matching interface pointer or to `*mut FUnknown`.  Reference
//! counts start at 1; the `release_*` helpers drop the host's reference.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::mem::offset_of;
use std::os::raw::c_void;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use vst3::Steinberg::IBStream_::IStreamSeekMode_::*;
use vst3::Steinberg::Vst::*;
use vst3::Steinberg::*;

use crate::config::HostInfo;
use crate::plugin::edit::EditTracker;
use crate::plugin::state::StateBuffer;

/// Shared `queryInterface` body: hand out `this` for any of `accepted`.
unsafe fn query_self(
    this: *mut FUnknown,
    iid: *const TUID,
    obj: *mut *mut c_void,
    accepted: &[&TUID],
) -> tresult {
    unsafe {
        if iid.is_null() || obj.is_null() {
            return kInvalidArgument;
        }
        let iid_ref = &*iid;
        if *iid_ref == FUnknown_iid || accepted.iter().any(|a| *a == iid_ref) {
            ((*(*this).vtbl).addRef)(this);
            *obj = this as *mut c_void;
            return kResultOk;
        }
        *obj = std::ptr::null_mut();
        kNoInterface
    }
}

/// Write `text` into a String128, truncating and null-terminating.
fn write_string128(text: &[u16], out: &mut String128) {
    let n = text.len().min(out.len() - 1);
    out[..n].copy_from_slice(&text[..n]);
    out[n] = 0;
}

// =========================================================================
// IHostApplication
// =========================================================================

#[repr(C)]
pub struct HostApplication {
    vtbl: *const IHostApplicationVtbl,
    ref_count: AtomicU32,
    /// Host name as UTF-16, without terminator.
    name: Vec<u16>,
}

unsafe impl Send for HostApplication {}
unsafe impl Sync for HostApplication {}

static HOST_APP_VTBL: IHostApplicationVtbl = IHostApplicationVtbl {
    base: FUnknownVtbl {
        queryInterface: host_app_query_interface,
        addRef: host_app_add_ref,
        release: host_app_release,
    },
    getName: host_app_get_name,
    createInstance: host_app_create_instance,
};

unsafe extern "system" fn host_app_query_interface(
    this: *mut FUnknown,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> tresult {
    unsafe { query_self(this, iid, obj, &[&IHostApplication_iid]) }
}

unsafe extern "system" fn host_app_add_ref(this: *mut FUnknown) -> uint32 {
    unsafe {
        let app = this as *mut HostApplication;
        (*app).ref_count.fetch_add(1, Ordering::Relaxed) + 1
    }
}

unsafe extern "system" fn host_app_release(this: *mut FUnknown) -> uint32 {
    unsafe {
        let app = this as *mut HostApplication;
        let old = (*app).ref_count.fetch_sub(1, Ordering::AcqRel);
        if old == 1 {
            drop(Box::from_raw(app));
            return 0;
        }
        old - 1
    }
}

unsafe extern "system" fn host_app_get_name(
    this: *mut IHostApplication,
    name: *mut String128,
) -> tresult {
    unsafe {
        if name.is_null() {
            return kInvalidArgument;
        }
        let app = this as *mut HostApplication;
        write_string128(&(*app).name, &mut *name);
        kResultOk
    }
}

unsafe extern "system" fn host_app_create_instance(
    _this: *mut IHostApplication,
    _cid: *mut TUID,
    _iid: *mut TUID,
    obj: *mut *mut c_void,
) -> tresult {
    unsafe {
        if !obj.is_null() {
            *obj = std::ptr::null_mut();
        }
    }
    kNotImplemented
}

/// Allocate a HostApplication answering `getName` with `info.name`.
pub fn new_host_application(info: &HostInfo) -> *mut HostApplication {
    Box::into_raw(Box::new(HostApplication {
        vtbl: &HOST_APP_VTBL,
        ref_count: AtomicU32::new(1),
        name: info.name.encode_utf16().collect(),
    }))
}

/// # Safety
/// `app` must come from [`new_host_application`] and still hold the host's
/// reference.
pub unsafe fn release_host_application(app: *mut HostApplication) {
    if !app.is_null() {
        unsafe {
            host_app_release(app as *mut FUnknown);
        }
    }
}

// =========================================================================
// IComponentHandler + IComponentHandler2
// =========================================================================

/// Receives parameter edits and restart requests from the controller and
/// forwards them to the session's [`EditTracker`].
///
/// Carries two vtables: `vtbl` answers IComponentHandler, `vtbl2` answers
/// IComponentHandler2.  A pointer to `vtbl2` is handed out for the second
/// interface; its thunks subtract the field offset to find the object.
#[repr(C)]
pub struct HostComponentHandler {
    vtbl: *const IComponentHandlerVtbl,
    vtbl2: *const IComponentHandler2Vtbl,
    ref_count: AtomicU32,
    tracker: Arc<EditTracker>,
}

unsafe impl Send for HostComponentHandler {}
unsafe impl Sync for HostComponentHandler {}

static HOST_COMPONENT_HANDLER_VTBL: IComponentHandlerVtbl = IComponentHandlerVtbl {
    base: FUnknownVtbl {
        queryInterface: host_ch_query_interface,
        addRef: host_ch_add_ref,
        release: host_ch_release,
    },
    beginEdit: host_ch_begin_edit,
    performEdit: host_ch_perform_edit,
    endEdit: host_ch_end_edit,
    restartComponent: host_ch_restart_component,
};

static HOST_COMPONENT_HANDLER2_VTBL: IComponentHandler2Vtbl = IComponentHandler2Vtbl {
    base: FUnknownVtbl {
        queryInterface: host_ch2_query_interface,
        addRef: host_ch2_add_ref,
        release: host_ch2_release,
    },
    setDirty: host_ch2_set_dirty,
    requestOpenEditor: host_ch2_request_open_editor,
    startGroupEdit: host_ch2_start_group_edit,
    finishGroupEdit: host_ch2_finish_group_edit,
};

unsafe fn handler_from_second(this: *mut c_void) -> *mut HostComponentHandler {
    unsafe {
        (this as *mut u8).sub(offset_of!(HostComponentHandler, vtbl2)) as *mut HostComponentHandler
    }
}

unsafe extern "system" fn host_ch_query_interface(
    this: *mut FUnknown,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> tresult {
    unsafe {
        if iid.is_null() || obj.is_null() {
            return kInvalidArgument;
        }
        let ch = this as *mut HostComponentHandler;
        let iid_ref = &*iid;
        if *iid_ref == FUnknown_iid || *iid_ref == IComponentHandler_iid {
            host_ch_add_ref(this);
            *obj = this as *mut c_void;
            return kResultOk;
        }
        if *iid_ref == IComponentHandler2_iid {
            host_ch_add_ref(this);
            *obj = &raw mut (*ch).vtbl2 as *mut c_void;
            return kResultOk;
        }
        *obj = std::ptr::null_mut();
        kNoInterface
    }
}

unsafe extern "system" fn host_ch_add_ref(this: *mut FUnknown) -> uint32 {
    unsafe {
        let ch = this as *mut HostComponentHandler;
        (*ch).ref_count.fetch_add(1, Ordering::Relaxed) + 1
    }
}

unsafe extern "system" fn host_ch_release(this: *mut FUnknown) -> uint32 {
    unsafe {
        let ch = this as *mut HostComponentHandler;
        let old = (*ch).ref_count.fetch_sub(1, Ordering::AcqRel);
        if old == 1 {
            drop(Box::from_raw(ch));
            return 0;
        }
        old - 1
    }
}

unsafe extern "system" fn host_ch_begin_edit(this: *mut IComponentHandler, id: ParamID) -> tresult {
    unsafe {
        let ch = this as *mut HostComponentHandler;
        (*ch).tracker.begin_edit(id);
        kResultOk
    }
}

unsafe extern "system" fn host_ch_perform_edit(
    this: *mut IComponentHandler,
    id: ParamID,
    value_normalized: ParamValue,
) -> tresult {
    unsafe {
        let ch = this as *mut HostComponentHandler;
        (*ch).tracker.perform_edit(id, value_normalized);
        kResultOk
    }
}

unsafe extern "system" fn host_ch_end_edit(this: *mut IComponentHandler, id: ParamID) -> tresult {
    unsafe {
        let ch = this as *mut HostComponentHandler;
        (*ch).tracker.end_edit(id);
        kResultOk
    }
}

unsafe extern "system" fn host_ch_restart_component(
    this: *mut IComponentHandler,
    flags: int32,
) -> tresult {
    unsafe {
        let ch = this as *mut HostComponentHandler;
        log::debug!("VST3: restartComponent(flags=0x{:x})", flags);
        (*ch).tracker.restart_component(flags);
        kResultOk
    }
}

unsafe extern "system" fn host_ch2_query_interface(
    this: *mut FUnknown,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> tresult {
    unsafe {
        let ch = handler_from_second(this as *mut c_void);
        host_ch_query_interface(ch as *mut FUnknown, iid, obj)
    }
}

unsafe extern "system" fn host_ch2_add_ref(this: *mut FUnknown) -> uint32 {
    unsafe { host_ch_add_ref(handler_from_second(this as *mut c_void) as *mut FUnknown) }
}

unsafe extern "system" fn host_ch2_release(this: *mut FUnknown) -> uint32 {
    unsafe { host_ch_release(handler_from_second(this as *mut c_void) as *mut FUnknown) }
}

unsafe extern "system" fn host_ch2_set_dirty(this: *mut IComponentHandler2, state: TBool) -> tresult {
    unsafe {
        let ch = handler_from_second(this as *mut c_void);
        if state != 0 {
            (*ch).tracker.set_dirty();
        }
        kResultOk
    }
}

unsafe extern "system" fn host_ch2_request_open_editor(
    this: *mut IComponentHandler2,
    _name: FIDString,
) -> tresult {
    unsafe {
        let ch = handler_from_second(this as *mut c_void);
        (*ch).tracker.request_open_editor();
        kResultOk
    }
}

unsafe extern "system" fn host_ch2_start_group_edit(_this: *mut IComponentHandler2) -> tresult {
    kResultOk
}

unsafe extern "system" fn host_ch2_finish_group_edit(_this: *mut IComponentHandler2) -> tresult {
    kResultOk
}

pub fn new_host_component_handler(tracker: Arc<EditTracker>) -> *mut HostComponentHandler {
    Box::into_raw(Box::new(HostComponentHandler {
        vtbl: &HOST_COMPONENT_HANDLER_VTBL,
        vtbl2: &HOST_COMPONENT_HANDLER2_VTBL,
        ref_count: AtomicU32::new(1),
        tracker,
    }))
}

/// # Safety
/// `ch` must come from [`new_host_component_handler`].
pub unsafe fn release_host_component_handler(ch: *mut HostComponentHandler) {
    if !ch.is_null() {
        unsafe {
            host_ch_release(ch as *mut FUnknown);
        }
    }
}

// =========================================================================
// IPlugFrame
// =========================================================================

/// Frame handed to the editor view.  Resize requests become
/// `ResizeWindow` notifications; the host resizes its window when it
/// drains them.
#[repr(C)]
pub struct HostPlugFrame {
    vtbl: *const IPlugFrameVtbl,
    ref_count: AtomicU32,
    tracker: Arc<EditTracker>,
}

unsafe impl Send for HostPlugFrame {}
unsafe impl Sync for HostPlugFrame {}

static HOST_PLUG_FRAME_VTBL: IPlugFrameVtbl = IPlugFrameVtbl {
    base: FUnknownVtbl {
        queryInterface: host_plug_frame_query_interface,
        addRef: host_plug_frame_add_ref,
        release: host_plug_frame_release,
    },
    resizeView: host_plug_frame_resize_view,
};

unsafe extern "system" fn host_plug_frame_query_interface(
    this: *mut FUnknown,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> tresult {
    unsafe { query_self(this, iid, obj, &[&IPlugFrame_iid]) }
}

unsafe extern "system" fn host_plug_frame_add_ref(this: *mut FUnknown) -> uint32 {
    unsafe {
        let frame = this as *mut HostPlugFrame;
        (*frame).ref_count.fetch_add(1, Ordering::Relaxed) + 1
    }
}

unsafe extern "system" fn host_plug_frame_release(this: *mut FUnknown) -> uint32 {
    unsafe {
        let frame = this as *mut HostPlugFrame;
        let old = (*frame).ref_count.fetch_sub(1, Ordering::AcqRel);
        if old == 1 {
            drop(Box::from_raw(frame));
            return 0;
        }
        old - 1
    }
}

/// Only reports the request.  The host resizes its window and then calls
/// back into the view through `PluginSession::resize_view`.
unsafe extern "system" fn host_plug_frame_resize_view(
    this: *mut IPlugFrame,
    _view: *mut IPlugView,
    new_size: *mut ViewRect,
) -> tresult {
    unsafe {
        if new_size.is_null() {
            return kInvalidArgument;
        }
        let frame = this as *mut HostPlugFrame;
        let rect = &*new_size;
        let width = (rect.right - rect.left).max(1) as u32;
        let height = (rect.bottom - rect.top).max(1) as u32;
        log::debug!("VST3: resizeView {}x{}", width, height);
        (*frame).tracker.request_resize(width, height);
        kResultOk
    }
}

pub fn new_host_plug_frame(tracker: Arc<EditTracker>) -> *mut HostPlugFrame {
    Box::into_raw(Box::new(HostPlugFrame {
        vtbl: &HOST_PLUG_FRAME_VTBL,
        ref_count: AtomicU32::new(1),
        tracker,
    }))
}

/// # Safety
/// `frame` must come from [`new_host_plug_frame`].
pub unsafe fn release_host_plug_frame(frame: *mut HostPlugFrame) {
    if !frame.is_null() {
        unsafe {
            host_plug_frame_release(frame as *mut FUnknown);
        }
    }
}

// =========================================================================
// IBStream over a StateBuffer
// =========================================================================

#[repr(C)]
pub struct MemoryStream {
    vtbl: *const IBStreamVtbl,
    ref_count: AtomicU32,
    buffer: StateBuffer,
}

unsafe impl Send for MemoryStream {}

static MEMORY_STREAM_VTBL: IBStreamVtbl = IBStreamVtbl {
    base: FUnknownVtbl {
        queryInterface: ms_query_interface,
        addRef: ms_add_ref,
        release: ms_release,
    },
    read: ms_read,
    write: ms_write,
    seek: ms_seek,
    tell: ms_tell,
};

unsafe extern "system" fn ms_query_interface(
    this: *mut FUnknown,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> tresult {
    unsafe { query_self(this, iid, obj, &[&IBStream_iid]) }
}

unsafe extern "system" fn ms_add_ref(this: *mut FUnknown) -> uint32 {
    unsafe {
        let ms = this as *mut MemoryStream;
        (*ms).ref_count.fetch_add(1, Ordering::Relaxed) + 1
    }
}

unsafe extern "system" fn ms_release(this: *mut FUnknown) -> uint32 {
    unsafe {
        let ms = this as *mut MemoryStream;
        let old = (*ms).ref_count.fetch_sub(1, Ordering::AcqRel);
        if old == 1 {
            drop(Box::from_raw(ms));
            return 0;
        }
        old - 1
    }
}

unsafe extern "system" fn ms_read(
    this: *mut IBStream,
    buffer: *mut c_void,
    num_bytes: int32,
    num_bytes_read: *mut int32,
) -> tresult {
    unsafe {
        if buffer.is_null() || num_bytes < 0 {
            return kInvalidArgument;
        }
        let ms = this as *mut MemoryStream;
        let out = std::slice::from_raw_parts_mut(buffer as *mut u8, num_bytes as usize);
        let n = (*ms).buffer.read(out).unwrap_or(0);
        if !num_bytes_read.is_null() {
            *num_bytes_read = n as int32;
        }
        kResultOk
    }
}

unsafe extern "system" fn ms_write(
    this: *mut IBStream,
    buffer: *mut c_void,
    num_bytes: int32,
    num_bytes_written: *mut int32,
) -> tresult {
    unsafe {
        if buffer.is_null() || num_bytes < 0 {
            return kInvalidArgument;
        }
        let ms = this as *mut MemoryStream;
        let data = std::slice::from_raw_parts(buffer as *const u8, num_bytes as usize);
        if (*ms).buffer.write_all(data).is_err() {
            return kResultFalse;
        }
        if !num_bytes_written.is_null() {
            *num_bytes_written = num_bytes;
        }
        kResultOk
    }
}

unsafe extern "system" fn ms_seek(
    this: *mut IBStream,
    pos: int64,
    mode: int32,
    result: *mut int64,
) -> tresult {
    unsafe {
        let ms = this as *mut MemoryStream;
        let target = match mode {
            m if m == kIBSeekSet as int32 => match u64::try_from(pos) {
                Ok(p) => SeekFrom::Start(p),
                Err(_) => return kInvalidArgument,
            },
            m if m == kIBSeekCur as int32 => SeekFrom::Current(pos),
            m if m == kIBSeekEnd as int32 => SeekFrom::End(pos),
            _ => return kInvalidArgument,
        };
        match (*ms).buffer.seek(target) {
            Ok(new_pos) => {
                if !result.is_null() {
                    *result = new_pos as int64;
                }
                kResultOk
            }
            Err(_) => kInvalidArgument,
        }
    }
}

unsafe extern "system" fn ms_tell(this: *mut IBStream, pos: *mut int64) -> tresult {
    unsafe {
        if pos.is_null() {
            return kInvalidArgument;
        }
        let ms = this as *mut MemoryStream;
        *pos = (*ms).buffer.position() as int64;
        kResultOk
    }
}

/// Lend `buffer` to the plugin as an IBStream for the duration of `call`.
///
/// The buffer is moved into a fresh stream object and moved back out
/// afterwards, keeping its read/write position.  A plugin that wrongly
/// keeps a reference ends up holding an empty stream.
pub fn with_memory_stream(
    buffer: &mut StateBuffer,
    call: impl FnOnce(*mut IBStream) -> tresult,
) -> tresult {
    let ms = Box::into_raw(Box::new(MemoryStream {
        vtbl: &MEMORY_STREAM_VTBL,
        ref_count: AtomicU32::new(1),
        buffer: std::mem::take(buffer),
    }));
    let result = call(ms as *mut IBStream);
    unsafe {
        std::mem::swap(buffer, &mut (*ms).buffer);
        ms_release(ms as *mut FUnknown);
    }
    result
}

// =========================================================================
// IAttributeList
// =========================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    /// UTF-16 with a trailing null.
    String(Vec<u16>),
    Binary(Vec<u8>),
}

/// Key/value list passed to `IInfoListener::setChannelContextInfos`.
#[repr(C)]
pub struct HostAttributeList {
    vtbl: *const IAttributeListVtbl,
    ref_count: AtomicU32,
    values: Mutex<HashMap<String, AttributeValue>>,
}

unsafe impl Send for HostAttributeList {}
unsafe impl Sync for HostAttributeList {}

static HOST_ATTRIBUTE_LIST_VTBL: IAttributeListVtbl = IAttributeListVtbl {
    base: FUnknownVtbl {
        queryInterface: attr_query_interface,
        addRef: attr_add_ref,
        release: attr_release,
    },
    setInt: attr_set_int,
    getInt: attr_get_int,
    setFloat: attr_set_float,
    getFloat: attr_get_float,
    setString: attr_set_string,
    getString: attr_get_string,
    setBinary: attr_set_binary,
    getBinary: attr_get_binary,
};

unsafe fn attr_key(id: IAttrID) -> Option<String> {
    if id.is_null() {
        return None;
    }
    unsafe { Some(std::ffi::CStr::from_ptr(id).to_string_lossy().into_owned()) }
}

unsafe extern "system" fn attr_query_interface(
    this: *mut FUnknown,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> tresult {
    unsafe { query_self(this, iid, obj, &[&IAttributeList_iid]) }
}

unsafe extern "system" fn attr_add_ref(this: *mut FUnknown) -> uint32 {
    unsafe {
        let list = this as *mut HostAttributeList;
        (*list).ref_count.fetch_add(1, Ordering::Relaxed) + 1
    }
}

unsafe extern "system" fn attr_release(this: *mut FUnknown) -> uint32 {
    unsafe {
        let list = this as *mut HostAttributeList;
        let old = (*list).ref_count.fetch_sub(1, Ordering::AcqRel);
        if old == 1 {
            drop(Box::from_raw(list));
            return 0;
        }
        old - 1
    }
}

unsafe extern "system" fn attr_set_int(this: *mut IAttributeList, id: IAttrID, value: int64) -> tresult {
    unsafe {
        let Some(key) = attr_key(id) else {
            return kInvalidArgument;
        };
        let list = this as *mut HostAttributeList;
        (*list).values.lock().insert(key, AttributeValue::Int(value));
        kResultOk
    }
}

unsafe extern "system" fn attr_get_int(
    this: *mut IAttributeList,
    id: IAttrID,
    value: *mut int64,
) -> tresult {
    unsafe {
        let Some(key) = attr_key(id) else {
            return kInvalidArgument;
        };
        if value.is_null() {
            return kInvalidArgument;
        }
        let list = this as *mut HostAttributeList;
        match (*list).values.lock().get(&key) {
            Some(AttributeValue::Int(v)) => {
                *value = *v;
                kResultOk
            }
            _ => kResultFalse,
        }
    }
}

unsafe extern "system" fn attr_set_float(
    this: *mut IAttributeList,
    id: IAttrID,
    value: f64,
) -> tresult {
    unsafe {
        let Some(key) = attr_key(id) else {
            return kInvalidArgument;
        };
        let list = this as *mut HostAttributeList;
        (*list).values.lock().insert(key, AttributeValue::Float(value));
        kResultOk
    }
}

unsafe extern "system" fn attr_get_float(
    this: *mut IAttributeList,
    id: IAttrID,
    value: *mut f64,
) -> tresult {
    unsafe {
        let Some(key) = attr_key(id) else {
            return kInvalidArgument;
        };
        if value.is_null() {
            return kInvalidArgument;
        }
        let list = this as *mut HostAttributeList;
        match (*list).values.lock().get(&key) {
            Some(AttributeValue::Float(v)) => {
                *value = *v;
                kResultOk
            }
            _ => kResultFalse,
        }
    }
}

unsafe extern "system" fn attr_set_string(
    this: *mut IAttributeList,
    id: IAttrID,
    string: *const TChar,
) -> tresult {
    unsafe {
        let Some(key) = attr_key(id) else {
            return kInvalidArgument;
        };
        if string.is_null() {
            return kInvalidArgument;
        }
        let mut text = Vec::new();
        let mut p = string;
        while *p != 0 {
            text.push(*p as u16);
            p = p.add(1);
        }
        text.push(0);
        let list = this as *mut HostAttributeList;
        (*list).values.lock().insert(key, AttributeValue::String(text));
        kResultOk
    }
}

unsafe extern "system" fn attr_get_string(
    this: *mut IAttributeList,
    id: IAttrID,
    string: *mut TChar,
    size_in_bytes: uint32,
) -> tresult {
    unsafe {
        let Some(key) = attr_key(id) else {
            return kInvalidArgument;
        };
        let capacity = size_in_bytes as usize / std::mem::size_of::<TChar>();
        if string.is_null() || capacity == 0 {
            return kInvalidArgument;
        }
        let list = this as *mut HostAttributeList;
        match (*list).values.lock().get(&key) {
            Some(AttributeValue::String(text)) => {
                let n = text.len().min(capacity);
                for (i, &c) in text[..n].iter().enumerate() {
                    *string.add(i) = c as TChar;
                }
                *string.add(n.min(capacity - 1)) = 0;
                kResultOk
            }
            _ => kResultFalse,
        }
    }
}

unsafe extern "system" fn attr_set_binary(
    this: *mut IAttributeList,
    id: IAttrID,
    data: *const c_void,
    size_in_bytes: uint32,
) -> tresult {
    unsafe {
        let Some(key) = attr_key(id) else {
            return kInvalidArgument;
        };
        let bytes = if data.is_null() || size_in_bytes == 0 {
            Vec::new()
        } else {
            std::slice::from_raw_parts(data as *const u8, size_in_bytes as usize).to_vec()
        };
        let list = this as *mut HostAttributeList;
        (*list).values.lock().insert(key, AttributeValue::Binary(bytes));
        kResultOk
    }
}

unsafe extern "system" fn attr_get_binary(
    this: *mut IAttributeList,
    id: IAttrID,
    data: *mut *const c_void,
    size_in_bytes: *mut uint32,
) -> tresult {
    unsafe {
        let Some(key) = attr_key(id) else {
            return kInvalidArgument;
        };
        if data.is_null() || size_in_bytes.is_null() {
            return kInvalidArgument;
        }
        let list = this as *mut HostAttributeList;
        // The pointer stays valid until the entry is overwritten or the list
        // is released.
        match (*list).values.lock().get(&key) {
            Some(AttributeValue::Binary(bytes)) => {
                *data = bytes.as_ptr() as *const c_void;
                *size_in_bytes = bytes.len() as uint32;
                kResultOk
            }
            _ => kResultFalse,
        }
    }
}

pub fn new_attribute_list() -> *mut HostAttributeList {
    Box::into_raw(Box::new(HostAttributeList {
        vtbl: &HOST_ATTRIBUTE_LIST_VTBL,
        ref_count: AtomicU32::new(1),
        values: Mutex::new(HashMap::new()),
    }))
}

impl HostAttributeList {
    /// Host-side insert, bypassing the COM surface.
    pub fn insert(&self, key: &str, value: AttributeValue) {
        self.values.lock().insert(key.to_owned(), value);
    }

    pub fn get(&self, key: &str) -> Option<AttributeValue> {
        self.values.lock().get(key).cloned()
    }
}

/// # Safety
/// `list` must come from [`new_attribute_list`].
pub unsafe fn release_attribute_list(list: *mut HostAttributeList) {
    if !list.is_null() {
        unsafe {
            attr_release(list as *mut FUnknown);
        }
    }
}
