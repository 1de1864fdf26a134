//! VST3 implementations of the capability traits.
//!
//! [`Vst3Loader`] instantiates a plugin through its factory and hands the
//! session a processor / controller pair.  Every wrapper keeps the module
//! alive through an `Arc<Vst3Module>`, declared last so COM pointers are
//! released before the library can go.

use std::path::Path;
use std::sync::Arc;

use vst3::ComPtr;
use vst3::Steinberg::Vst;
use vst3::Steinberg::Vst::ChannelContext::{IInfoListener, IInfoListenerTrait};
use vst3::Steinberg::Vst::*;
use vst3::Steinberg::*;

use super::com_host::{
    self, AttributeValue, HostComponentHandler, new_attribute_list, new_host_component_handler,
    with_memory_stream,
};
use super::module::{Vst3Module, read_string128, to_utf16z};
use super::process::ProcessScratch;
use super::view::Vst3View;
use crate::error::{BridgeError, LoadStage, Result};
use crate::plugin::automation::ScratchLimits;
use crate::plugin::bus::BusConfiguration;
use crate::plugin::edit::EditTracker;
use crate::plugin::model::*;
use crate::plugin::state::StateBuffer;
use crate::plugin::types::{
    BusDirection, BusInfo, MediaKind, ParamId, ParameterDescriptor, ParameterFlags,
    PluginIdentity, ProcessMode, ProcessSetup, SpeakerArrangement, TrackContext,
};

// The vst3 crate types these as u32; the API takes i32.
const K_AUDIO: i32 = MediaTypes_::kAudio as i32;
const K_EVENT: i32 = MediaTypes_::kEvent as i32;
const K_INPUT: i32 = BusDirections_::kInput as i32;
const K_OUTPUT: i32 = BusDirections_::kOutput as i32;

/// Attribute keys understood by `IInfoListener::setChannelContextInfos`.
const CHANNEL_COLOR_KEY: &str = "channel color";
const CHANNEL_NAME_KEY: &str = "channel name";
const CHANNEL_NAME_LENGTH_KEY: &str = "channel name length";

pub(super) fn check(code: tresult) -> CallResult {
    if code == kResultOk {
        Ok(())
    } else {
        Err(PluginCallError { code })
    }
}

fn media_type(media: MediaKind) -> i32 {
    match media {
        MediaKind::Audio => K_AUDIO,
        MediaKind::Event => K_EVENT,
    }
}

fn bus_direction(direction: BusDirection) -> i32 {
    match direction {
        BusDirection::Input => K_INPUT,
        BusDirection::Output => K_OUTPUT,
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Loads plugins from `.vst3` bundles on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct Vst3Loader;

impl PluginLoader for Vst3Loader {
    fn load(&self, path: &Path, class_id: &str, cx: &LoadContext<'_>) -> Result<PluginObjects> {
        let module = Arc::new(Vst3Module::open(path)?);
        let class = module.find_class(class_id)?;
        log::info!(
            "VST3: instantiating \"{}\" ({}) from {}",
            class.name,
            class.id,
            module.path().display()
        );

        unsafe {
            let factory = module.factory();
            let host_app = cx.host.application() as *mut FUnknown;

            let mut obj: *mut std::ffi::c_void = std::ptr::null_mut();
            let result = factory.createInstance(
                class.cid.as_ptr() as FIDString,
                IComponent_iid.as_ptr() as FIDString,
                &mut obj,
            );
            let component = match ComPtr::<IComponent>::from_raw(obj as *mut IComponent) {
                Some(c) if result == kResultOk => c,
                _ => {
                    return Err(BridgeError::load(
                        LoadStage::Instantiation,
                        format!("createInstance returned {:#x}", result),
                    ));
                }
            };

            let result = component.initialize(host_app);
            if result != kResultOk {
                return Err(BridgeError::load(
                    LoadStage::Initialization,
                    format!("IComponent::initialize returned {:#x}", result),
                ));
            }

            let Some(processor) = component.cast::<IAudioProcessor>() else {
                component.terminate();
                return Err(BridgeError::load(LoadStage::Instantiation, "no IAudioProcessor"));
            };

            // Single-component plugins implement the controller on the
            // component itself; otherwise the factory makes a second object.
            let (controller, separate) = match component.cast::<IEditController>() {
                Some(ec) => (ec, false),
                None => match create_controller(&module, &component, host_app) {
                    Ok(ec) => (ec, true),
                    Err(e) => {
                        component.terminate();
                        return Err(e);
                    }
                },
            };

            let handler = new_host_component_handler(cx.tracker.clone());
            let result = ((*(*controller.as_ptr()).vtbl).setComponentHandler)(
                controller.as_ptr(),
                handler as *mut IComponentHandler,
            );
            if result != kResultOk {
                log::warn!("VST3: setComponentHandler returned {:#x}", result);
            }

            let connection: Option<Box<dyn ConnectionLink>> = if separate {
                match (
                    component.cast::<IConnectionPoint>(),
                    controller.cast::<IConnectionPoint>(),
                ) {
                    (Some(component_cp), Some(controller_cp)) => Some(Box::new(Vst3Connection {
                        component: component_cp,
                        controller: controller_cp,
                        connected: false,
                        _module: module.clone(),
                    })),
                    _ => None,
                }
            } else {
                None
            };

            Ok(PluginObjects {
                identity: PluginIdentity {
                    id: class.id,
                    name: class.name,
                    vendor: class.vendor,
                    version: class.version,
                },
                processor: Box::new(Vst3Processor {
                    component,
                    processor,
                    scratch: ProcessScratch::new(),
                    terminated: false,
                    _module: module.clone(),
                }),
                controller: Box::new(Vst3Controller {
                    controller,
                    separate,
                    handler,
                    tracker: cx.tracker.clone(),
                    terminated: false,
                    module,
                }),
                connection,
            })
        }
    }
}

unsafe fn create_controller(
    module: &Vst3Module,
    component: &ComPtr<IComponent>,
    host_app: *mut FUnknown,
) -> Result<ComPtr<IEditController>> {
    unsafe {
        let mut controller_cid: TUID = std::mem::zeroed();
        if component.getControllerClassId(&mut controller_cid) != kResultOk {
            return Err(BridgeError::load(LoadStage::Instantiation, "no edit controller class"));
        }
        let mut obj: *mut std::ffi::c_void = std::ptr::null_mut();
        let result = module.factory().createInstance(
            controller_cid.as_ptr() as FIDString,
            IEditController_iid.as_ptr() as FIDString,
            &mut obj,
        );
        let controller = match ComPtr::<IEditController>::from_raw(obj as *mut IEditController) {
            Some(c) if result == kResultOk => c,
            _ => {
                return Err(BridgeError::load(
                    LoadStage::Instantiation,
                    format!("controller createInstance returned {:#x}", result),
                ));
            }
        };
        let result = controller.initialize(host_app);
        if result != kResultOk {
            return Err(BridgeError::load(
                LoadStage::Initialization,
                format!("IEditController::initialize returned {:#x}", result),
            ));
        }
        Ok(controller)
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

pub struct Vst3Processor {
    component: ComPtr<IComponent>,
    processor: ComPtr<IAudioProcessor>,
    scratch: ProcessScratch,
    terminated: bool,
    _module: Arc<Vst3Module>,
}

unsafe impl Send for Vst3Processor {}

impl Processor for Vst3Processor {
    fn bus_count(&self, media: MediaKind, direction: BusDirection) -> usize {
        let n = unsafe { self.component.getBusCount(media_type(media), bus_direction(direction)) };
        n.max(0) as usize
    }

    fn bus_info(&self, media: MediaKind, direction: BusDirection, index: usize) -> Option<BusInfo> {
        unsafe {
            let mut info: Vst::BusInfo = std::mem::zeroed();
            let r = self.component.getBusInfo(
                media_type(media),
                bus_direction(direction),
                index as i32,
                &mut info,
            );
            (r == kResultOk).then(|| BusInfo {
                name: read_string128(&info.name),
                channel_count: info.channelCount.max(0) as u32,
            })
        }
    }

    fn activate_bus(
        &mut self,
        media: MediaKind,
        direction: BusDirection,
        index: usize,
        active: bool,
    ) -> CallResult {
        check(unsafe {
            self.component.activateBus(
                media_type(media),
                bus_direction(direction),
                index as i32,
                TBool::from(active),
            )
        })
    }

    fn bus_arrangement(&self, direction: BusDirection, index: usize) -> Option<SpeakerArrangement> {
        let mut arrangement: Vst::SpeakerArrangement = 0;
        let r = unsafe {
            self.processor
                .getBusArrangement(bus_direction(direction), index as i32, &mut arrangement)
        };
        (r == kResultOk).then_some(arrangement)
    }

    fn set_bus_arrangements(
        &mut self,
        inputs: &[SpeakerArrangement],
        outputs: &[SpeakerArrangement],
    ) -> CallResult {
        let mut inputs = inputs.to_vec();
        let mut outputs = outputs.to_vec();
        check(unsafe {
            self.processor.setBusArrangements(
                inputs.as_mut_ptr(),
                inputs.len() as i32,
                outputs.as_mut_ptr(),
                outputs.len() as i32,
            )
        })
    }

    fn setup_processing(&mut self, setup: &ProcessSetup) -> CallResult {
        let mut vst_setup = Vst::ProcessSetup {
            processMode: match setup.mode {
                ProcessMode::Realtime => ProcessModes_::kRealtime as i32,
                ProcessMode::Offline => ProcessModes_::kOffline as i32,
            },
            symbolicSampleSize: SymbolicSampleSizes_::kSample32 as i32,
            maxSamplesPerBlock: setup.max_block_size as i32,
            sampleRate: setup.sample_rate,
        };
        check(unsafe { self.processor.setupProcessing(&mut vst_setup) })
    }

    fn prepare(&mut self, buses: &BusConfiguration, limits: &ScratchLimits) {
        self.scratch.prepare(buses, limits);
    }

    fn set_active(&mut self, active: bool) -> CallResult {
        check(unsafe { self.component.setActive(TBool::from(active)) })
    }

    fn set_processing(&mut self, processing: bool) -> CallResult {
        check(unsafe { self.processor.setProcessing(TBool::from(processing)) })
    }

    fn latency_samples(&self) -> u32 {
        unsafe { self.processor.getLatencySamples() }
    }

    fn tail_samples(&self) -> u32 {
        unsafe { self.processor.getTailSamples() }
    }

    fn process(
        &mut self,
        block: &ProcessBlock<'_>,
        inputs: InputBuffers<'_, '_, '_>,
        outputs: OutputBuffers<'_, '_, '_>,
    ) -> CallResult {
        let Some(mut data) = self.scratch.build(block, inputs, outputs) else {
            return Err(PluginCallError {
                code: kInvalidArgument,
            });
        };
        check(unsafe { self.processor.process(&mut data) })
    }

    fn read_output_parameters(&self, sink: &mut dyn FnMut(ParamId, f64)) {
        self.scratch.read_output_parameters(sink);
    }

    fn get_state(&mut self, stream: &mut StateBuffer) -> CallResult {
        check(with_memory_stream(stream, |s| unsafe { self.component.getState(s) }))
    }

    fn set_state(&mut self, stream: &mut StateBuffer) -> CallResult {
        check(with_memory_stream(stream, |s| unsafe { self.component.setState(s) }))
    }

    fn terminate(&mut self) {
        if !self.terminated {
            self.terminated = true;
            unsafe {
                self.component.terminate();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Vst3Controller {
    controller: ComPtr<IEditController>,
    /// The controller is its own object rather than the component.
    separate: bool,
    handler: *mut HostComponentHandler,
    tracker: Arc<EditTracker>,
    terminated: bool,
    module: Arc<Vst3Module>,
}

unsafe impl Send for Vst3Controller {}

impl Controller for Vst3Controller {
    fn parameter_count(&self) -> usize {
        unsafe { self.controller.getParameterCount().max(0) as usize }
    }

    fn parameter_descriptor(&self, index: usize) -> Option<ParameterDescriptor> {
        use ParameterInfo_::ParameterFlags_::*;

        unsafe {
            let mut pinfo: Vst::ParameterInfo = std::mem::zeroed();
            if self.controller.getParameterInfo(index as i32, &mut pinfo) != kResultOk {
                return None;
            }
            let has = |flag: i32| pinfo.flags & flag != 0;
            Some(ParameterDescriptor {
                id: pinfo.id,
                title: read_string128(&pinfo.title),
                short_title: read_string128(&pinfo.shortTitle),
                units: read_string128(&pinfo.units),
                step_count: pinfo.stepCount,
                default_value: pinfo.defaultNormalizedValue,
                flags: ParameterFlags {
                    automatable: has(kCanAutomate),
                    read_only: has(kIsReadOnly),
                    wrap_around: has(kIsWrapAround),
                    hidden: has(kIsHidden),
                    is_list: has(kIsList),
                    is_bypass: has(kIsBypass),
                },
            })
        }
    }

    fn param_normalized(&self, id: ParamId) -> f64 {
        unsafe { self.controller.getParamNormalized(id) }
    }

    fn param_string(&self, id: ParamId, value: f64) -> Option<String> {
        unsafe {
            let mut text: String128 = [0; 128];
            (self.controller.getParamStringByValue(id, value, &mut text) == kResultOk)
                .then(|| read_string128(&text))
        }
    }

    fn set_param_normalized(&mut self, id: ParamId, value: f64) -> CallResult {
        check(unsafe { self.controller.setParamNormalized(id, value) })
    }

    fn set_component_state(&mut self, stream: &mut StateBuffer) -> CallResult {
        check(with_memory_stream(stream, |s| unsafe { self.controller.setComponentState(s) }))
    }

    fn get_state(&mut self, stream: &mut StateBuffer) -> CallResult {
        check(with_memory_stream(stream, |s| unsafe { self.controller.getState(s) }))
    }

    fn set_state(&mut self, stream: &mut StateBuffer) -> CallResult {
        check(with_memory_stream(stream, |s| unsafe { self.controller.setState(s) }))
    }

    fn midi_mapping(&self) -> Option<Box<dyn MidiMapping>> {
        let mapping = self.controller.cast::<IMidiMapping>()?;
        Some(Box::new(Vst3MidiMapping {
            mapping,
            _module: self.module.clone(),
        }))
    }

    fn info_listener(&self) -> Option<Box<dyn InfoListener>> {
        let listener = self.controller.cast::<IInfoListener>()?;
        Some(Box::new(Vst3InfoListener {
            listener,
            _module: self.module.clone(),
        }))
    }

    fn create_view(&mut self) -> Option<Box<dyn PlugView>> {
        unsafe {
            let ctrl = self.controller.as_ptr();
            let view = ((*(*ctrl).vtbl).createView)(ctrl, ViewType::kEditor);
            if view.is_null() {
                log::debug!("VST3: createView returned null");
                return None;
            }
            Some(Box::new(Vst3View::new(view, self.tracker.clone(), self.module.clone())))
        }
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        unsafe {
            let ctrl = self.controller.as_ptr();
            ((*(*ctrl).vtbl).setComponentHandler)(ctrl, std::ptr::null_mut());
            if self.separate {
                self.controller.terminate();
            }
        }
    }
}

impl Drop for Vst3Controller {
    fn drop(&mut self) {
        self.terminate();
        unsafe {
            com_host::release_host_component_handler(self.handler);
        }
    }
}

// ---------------------------------------------------------------------------
// Optional capabilities
// ---------------------------------------------------------------------------

struct Vst3MidiMapping {
    mapping: ComPtr<IMidiMapping>,
    _module: Arc<Vst3Module>,
}

unsafe impl Send for Vst3MidiMapping {}

impl MidiMapping for Vst3MidiMapping {
    fn controller_assignment(&self, bus: i32, channel: i16, controller: i16) -> Option<ParamId> {
        let mut id: ParamID = 0;
        let r = unsafe {
            self.mapping
                .getMidiControllerAssignment(bus, channel, controller, &mut id)
        };
        (r == kResultOk).then_some(id)
    }
}

struct Vst3InfoListener {
    listener: ComPtr<IInfoListener>,
    _module: Arc<Vst3Module>,
}

unsafe impl Send for Vst3InfoListener {}

impl InfoListener for Vst3InfoListener {
    fn set_channel_context(&mut self, context: &TrackContext) -> CallResult {
        let name = to_utf16z(&context.name, 128);
        let name_len = name.len() as i64 - 1;
        let list = new_attribute_list();
        unsafe {
            (*list).insert(CHANNEL_COLOR_KEY, AttributeValue::Int(i64::from(context.colour.packed())));
            (*list).insert(CHANNEL_NAME_KEY, AttributeValue::String(name));
            (*list).insert(CHANNEL_NAME_LENGTH_KEY, AttributeValue::Int(name_len));
            let result = self.listener.setChannelContextInfos(list as *mut IAttributeList);
            com_host::release_attribute_list(list);
            check(result)
        }
    }
}

struct Vst3Connection {
    component: ComPtr<IConnectionPoint>,
    controller: ComPtr<IConnectionPoint>,
    connected: bool,
    _module: Arc<Vst3Module>,
}

unsafe impl Send for Vst3Connection {}

impl ConnectionLink for Vst3Connection {
    fn connect(&mut self) -> CallResult {
        unsafe {
            check(self.component.connect(self.controller.as_ptr()))?;
            if let Err(e) = check(self.controller.connect(self.component.as_ptr())) {
                self.component.disconnect(self.controller.as_ptr());
                return Err(e);
            }
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        unsafe {
            self.component.disconnect(self.controller.as_ptr());
            self.controller.disconnect(self.component.as_ptr());
        }
    }
}

impl Drop for Vst3Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_maps_result_codes() {
        assert_eq!(check(kResultOk), Ok(()));
        assert_eq!(
            check(kNotImplemented),
            Err(PluginCallError {
                code: kNotImplemented
            })
        );
    }

    #[test]
    fn test_bus_constants() {
        assert_eq!(media_type(MediaKind::Audio), K_AUDIO);
        assert_eq!(media_type(MediaKind::Event), K_EVENT);
        assert_ne!(bus_direction(BusDirection::Input), bus_direction(BusDirection::Output));
    }

    #[test]
    fn test_loader_reports_missing_module() {
        let host = crate::plugin::context::HostContext::acquire(&Default::default());
        let (notifier, _rx) = crate::plugin::notify::channel();
        let tracker = Arc::new(EditTracker::new(notifier));
        let cx = LoadContext {
            host: &host,
            tracker: &tracker,
        };
        let err = Vst3Loader
            .load(Path::new("/nonexistent/Missing.vst3"), "00000000000000000000000000000000", &cx)
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::ModuleNotFound(_)));
    }
}
