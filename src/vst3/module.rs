//! Loading a VST3 module: bundle resolution, dlopen, ModuleEntry/Exit and
//! the plugin factory.

use std::ffi::{CStr, CString, c_char};
use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};

use vst3::ComPtr;
use vst3::Steinberg::*;

use crate::error::{BridgeError, LoadStage, Result};

/// Category string of processor classes in a factory.
pub const AUDIO_MODULE_CLASS: &str = "Audio Module Class";

/// Keeps the shared library alive.  Must outlive every object created from
/// its factory; plugin wrappers hold it through an `Arc`.
pub struct Vst3Module {
    handle: *mut std::ffi::c_void,
    path: PathBuf,
    factory: ManuallyDrop<ComPtr<IPluginFactory>>,
}

// The handle is only used for dlsym and ModuleExit; the factory is
// documented as thread-safe for class enumeration and instantiation.
unsafe impl Send for Vst3Module {}
unsafe impl Sync for Vst3Module {}

/// One class advertised by the factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub index: i32,
    /// 32 upper-case hex digits.
    pub id: String,
    pub cid: TUID,
    pub name: String,
    pub category: String,
    pub vendor: String,
    pub version: String,
}

impl Vst3Module {
    /// Open the binary behind `path`.  `path` may be a `.vst3` bundle
    /// directory or the shared object itself.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BridgeError::ModuleNotFound(path.to_path_buf()));
        }
        let binary = if path.is_dir() {
            find_bundle_binary(path).ok_or_else(|| BridgeError::ModuleNotFound(path.to_path_buf()))?
        } else {
            path.to_path_buf()
        };
        let c_path = CString::new(binary.to_string_lossy().as_bytes())
            .map_err(|_| BridgeError::load(LoadStage::Opening, "path contains a NUL byte"))?;

        unsafe {
            let handle = libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL);
            if handle.is_null() {
                let err = CStr::from_ptr(libc::dlerror()).to_string_lossy().into_owned();
                return Err(BridgeError::load(LoadStage::Opening, err));
            }

            let module_entry_sym = libc::dlsym(handle, c"ModuleEntry".as_ptr());
            if !module_entry_sym.is_null() {
                let module_entry: unsafe extern "system" fn(*mut std::ffi::c_void) -> bool =
                    std::mem::transmute(module_entry_sym);
                if !module_entry(handle) {
                    libc::dlclose(handle);
                    return Err(BridgeError::load(LoadStage::Opening, "ModuleEntry returned false"));
                }
            }

            let get_factory_sym = libc::dlsym(handle, c"GetPluginFactory".as_ptr());
            if get_factory_sym.is_null() {
                call_module_exit(handle);
                return Err(BridgeError::load(LoadStage::Factory, "no GetPluginFactory export"));
            }
            let get_factory: unsafe extern "system" fn() -> *mut IPluginFactory =
                std::mem::transmute(get_factory_sym);
            let Some(factory) = ComPtr::<IPluginFactory>::from_raw(get_factory()) else {
                call_module_exit(handle);
                return Err(BridgeError::load(LoadStage::Factory, "GetPluginFactory returned null"));
            };

            log::debug!("VST3: opened {}", binary.display());
            Ok(Self {
                handle,
                path: binary,
                factory: ManuallyDrop::new(factory),
            })
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn factory(&self) -> &ComPtr<IPluginFactory> {
        &self.factory
    }

    /// Every class in the factory, with vendor and version when the factory
    /// implements IPluginFactory2.
    pub fn classes(&self) -> Vec<ClassInfo> {
        let mut vendor = String::new();
        unsafe {
            let mut factory_info: PFactoryInfo = std::mem::zeroed();
            if self.factory.getFactoryInfo(&mut factory_info) == kResultOk {
                vendor = read_cstr(&factory_info.vendor);
            }
        }
        let factory2 = self.factory.cast::<IPluginFactory2>();

        let count = unsafe { self.factory.countClasses() };
        let mut classes = Vec::with_capacity(count.max(0) as usize);
        for index in 0..count {
            unsafe {
                let mut info: PClassInfo = std::mem::zeroed();
                if self.factory.getClassInfo(index, &mut info) != kResultOk {
                    continue;
                }
                let mut class = ClassInfo {
                    index,
                    id: tuid_to_hex(&info.cid),
                    cid: info.cid,
                    name: read_cstr(&info.name),
                    category: read_cstr(&info.category),
                    vendor: vendor.clone(),
                    version: String::new(),
                };
                if let Some(ref f2) = factory2 {
                    let mut info2: PClassInfo2 = std::mem::zeroed();
                    if f2.getClassInfo2(index, &mut info2) == kResultOk {
                        let v = read_cstr(&info2.vendor);
                        if !v.is_empty() {
                            class.vendor = v;
                        }
                        class.version = read_cstr(&info2.version);
                    }
                }
                classes.push(class);
            }
        }
        classes
    }

    /// Find the processor class whose id matches `class_id`
    /// (case-insensitive hex).
    pub fn find_class(&self, class_id: &str) -> Result<ClassInfo> {
        let wanted = hex_to_tuid(class_id).ok_or_else(|| BridgeError::ClassNotFound(class_id.to_owned()))?;
        self.classes()
            .into_iter()
            .find(|c| c.cid == wanted && c.category == AUDIO_MODULE_CLASS)
            .ok_or_else(|| BridgeError::ClassNotFound(class_id.to_owned()))
    }
}

impl Drop for Vst3Module {
    fn drop(&mut self) {
        log::debug!("VST3: closing {}", self.path.display());
        unsafe {
            // The factory must go before ModuleExit.
            ManuallyDrop::drop(&mut self.factory);
            call_module_exit(self.handle);
        }
    }
}

/// Call ModuleExit if exported.  The library is never dlclose'd; static
/// destructors inside plugins are not reliably unload-safe.
unsafe fn call_module_exit(handle: *mut std::ffi::c_void) {
    unsafe {
        let sym = libc::dlsym(handle, c"ModuleExit".as_ptr());
        if !sym.is_null() {
            let module_exit: unsafe extern "system" fn() -> bool = std::mem::transmute(sym);
            module_exit();
        }
    }
}

/// Resolve the shared library inside a `.vst3` bundle:
/// `<name>.vst3/Contents/<arch>-linux/<name>.so`.
pub fn find_bundle_binary(bundle_path: &Path) -> Option<PathBuf> {
    let arch_dirs = [
        "x86_64-linux",
        "i386-linux",
        "aarch64-linux",
        "armv7l-linux",
    ];

    let first_so = |dir: &Path| -> Option<PathBuf> {
        std::fs::read_dir(dir)
            .ok()?
            .flatten()
            .map(|e| e.path())
            .find(|p| p.extension().is_some_and(|e| e == "so"))
    };

    arch_dirs
        .iter()
        .map(|arch| bundle_path.join("Contents").join(arch))
        .filter(|dir| dir.is_dir())
        .find_map(|dir| first_so(&dir))
        // Some bundles put the .so directly in the bundle root.
        .or_else(|| first_so(bundle_path))
}

/// TUID as 32 upper-case hex digits.
pub fn tuid_to_hex(tuid: &TUID) -> String {
    tuid.iter().map(|&b| format!("{:02X}", b as u8)).collect()
}

/// Parse a 32-digit hex class id, either case.
pub fn hex_to_tuid(hex: &str) -> Option<TUID> {
    let hex = hex.trim();
    if hex.len() != 32 || !hex.is_ascii() {
        return None;
    }
    let mut tuid: TUID = [0; 16];
    for (i, byte) in tuid.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()? as c_char;
    }
    Some(tuid)
}

/// Null-terminated C string from a fixed-size char array.
pub fn read_cstr(buf: &[c_char]) -> String {
    let bytes: Vec<u8> = buf.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Null-terminated UTF-16 string from a String128.
pub fn read_string128(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

/// Encode `text` as a null-terminated UTF-16 buffer of at most `max` units.
pub fn to_utf16z(text: &str, max: usize) -> Vec<u16> {
    let mut out: Vec<u16> = text.encode_utf16().take(max.saturating_sub(1)).collect();
    out.push(0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip_is_case_insensitive() {
        let tuid = hex_to_tuid("0123456789abcdefFEDCBA9876543210").unwrap();
        assert_eq!(tuid_to_hex(&tuid), "0123456789ABCDEFFEDCBA9876543210");
        assert_eq!(hex_to_tuid(&tuid_to_hex(&tuid)), Some(tuid));
    }

    #[test]
    fn test_hex_rejects_bad_input() {
        assert!(hex_to_tuid("").is_none());
        assert!(hex_to_tuid("0123").is_none());
        assert!(hex_to_tuid("zz23456789ABCDEFFEDCBA9876543210").is_none());
        assert!(hex_to_tuid("é123456789ABCDEFFEDCBA987654321").is_none());
    }

    #[test]
    fn test_read_strings() {
        let mut c = [0 as c_char; 8];
        for (dst, src) in c.iter_mut().zip(b"Gain") {
            *dst = *src as c_char;
        }
        assert_eq!(read_cstr(&c), "Gain");

        let mut s = [0u16; 128];
        for (dst, src) in s.iter_mut().zip("Höhe".encode_utf16()) {
            *dst = src;
        }
        assert_eq!(read_string128(&s), "Höhe");
    }

    #[test]
    fn test_utf16z_truncates_and_terminates() {
        assert_eq!(to_utf16z("abc", 3), vec![b'a' as u16, b'b' as u16, 0]);
        assert_eq!(to_utf16z("", 64), vec![0]);
    }

    #[test]
    fn test_open_missing_path() {
        let err = Vst3Module::open(Path::new("/nonexistent/Plugin.vst3")).err().unwrap();
        assert!(matches!(err, BridgeError::ModuleNotFound(_)));
    }

    #[test]
    fn test_find_bundle_binary() {
        let root = std::env::temp_dir().join(format!("vst3-bridge-bundle-{}", std::process::id()));
        let arch = root.join("Thing.vst3").join("Contents").join("x86_64-linux");
        std::fs::create_dir_all(&arch).unwrap();
        std::fs::write(arch.join("Thing.so"), b"").unwrap();

        let found = find_bundle_binary(&root.join("Thing.vst3")).unwrap();
        assert_eq!(found, arch.join("Thing.so"));
        assert!(find_bundle_binary(&root).is_none());
        std::fs::remove_dir_all(&root).unwrap();
    }
}
