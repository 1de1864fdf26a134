//! Realtime COM scratch for `IAudioProcessor::process`.
//!
//! Everything here is sized in [`ProcessScratch::prepare`] on the UI thread
//! and only overwritten in place on the audio thread.  The COM objects are
//! embedded (never reference counted away) and boxed so their addresses stay
//! put for as long as the processor lives.

use std::os::raw::c_void;

use vst3::Steinberg::Vst::*;
use vst3::Steinberg::*;

use crate::plugin::automation::{ParameterQueues, ScratchLimits};
use crate::plugin::bus::BusConfiguration;
use crate::plugin::events::{PluginEvent, PluginEventBody};
use crate::plugin::model::ProcessBlock;
use crate::plugin::transport::TransportContext;
use crate::plugin::types::ProcessMode;

// ---------------------------------------------------------------------------
// Embedded objects: refcounting is a no-op, the owner frees them.
// ---------------------------------------------------------------------------

unsafe extern "system" fn embedded_add_ref(_this: *mut FUnknown) -> uint32 {
    1
}

unsafe extern "system" fn embedded_release(_this: *mut FUnknown) -> uint32 {
    1
}

unsafe fn embedded_query(
    this: *mut FUnknown,
    iid: *const TUID,
    obj: *mut *mut c_void,
    own_iid: &TUID,
) -> tresult {
    unsafe {
        if iid.is_null() || obj.is_null() {
            return kInvalidArgument;
        }
        let iid_ref = &*iid;
        if *iid_ref == FUnknown_iid || iid_ref == own_iid {
            *obj = this as *mut c_void;
            return kResultOk;
        }
        *obj = std::ptr::null_mut();
        kNoInterface
    }
}

// ---------------------------------------------------------------------------
// IParamValueQueue / IParameterChanges
// ---------------------------------------------------------------------------

/// One parameter's automation for the block: at most one point.
#[repr(C)]
struct HostParamValueQueue {
    vtbl: *const IParamValueQueueVtbl,
    id: ParamID,
    sample_offset: int32,
    value: ParamValue,
    has_point: bool,
}

static PARAM_VALUE_QUEUE_VTBL: IParamValueQueueVtbl = IParamValueQueueVtbl {
    base: FUnknownVtbl {
        queryInterface: pvq_query_interface,
        addRef: embedded_add_ref,
        release: embedded_release,
    },
    getParameterId: pvq_get_parameter_id,
    getPointCount: pvq_get_point_count,
    getPoint: pvq_get_point,
    addPoint: pvq_add_point,
};

unsafe extern "system" fn pvq_query_interface(
    this: *mut FUnknown,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> tresult {
    unsafe { embedded_query(this, iid, obj, &IParamValueQueue_iid) }
}

unsafe extern "system" fn pvq_get_parameter_id(this: *mut IParamValueQueue) -> ParamID {
    unsafe { (*(this as *mut HostParamValueQueue)).id }
}

unsafe extern "system" fn pvq_get_point_count(this: *mut IParamValueQueue) -> int32 {
    unsafe { int32::from((*(this as *mut HostParamValueQueue)).has_point) }
}

unsafe extern "system" fn pvq_get_point(
    this: *mut IParamValueQueue,
    index: int32,
    sample_offset: *mut int32,
    value: *mut ParamValue,
) -> tresult {
    unsafe {
        let q = this as *mut HostParamValueQueue;
        if index != 0 || !(*q).has_point {
            return kInvalidArgument;
        }
        if !sample_offset.is_null() {
            *sample_offset = (*q).sample_offset;
        }
        if !value.is_null() {
            *value = (*q).value;
        }
        kResultOk
    }
}

/// Output queues: the plugin reports values here.  Only the latest point
/// is kept.
unsafe extern "system" fn pvq_add_point(
    this: *mut IParamValueQueue,
    sample_offset: int32,
    value: ParamValue,
    index: *mut int32,
) -> tresult {
    unsafe {
        let q = this as *mut HostParamValueQueue;
        (*q).sample_offset = sample_offset;
        (*q).value = value;
        (*q).has_point = true;
        if !index.is_null() {
            *index = 0;
        }
        kResultOk
    }
}

#[repr(C)]
struct HostParameterChanges {
    vtbl: *const IParameterChangesVtbl,
    queues: Vec<HostParamValueQueue>,
    used: usize,
}

static PARAMETER_CHANGES_VTBL: IParameterChangesVtbl = IParameterChangesVtbl {
    base: FUnknownVtbl {
        queryInterface: pc_query_interface,
        addRef: embedded_add_ref,
        release: embedded_release,
    },
    getParameterCount: pc_get_parameter_count,
    getParameterData: pc_get_parameter_data,
    addParameterData: pc_add_parameter_data,
};

unsafe extern "system" fn pc_query_interface(
    this: *mut FUnknown,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> tresult {
    unsafe { embedded_query(this, iid, obj, &IParameterChanges_iid) }
}

unsafe extern "system" fn pc_get_parameter_count(this: *mut IParameterChanges) -> int32 {
    unsafe { (*(this as *mut HostParameterChanges)).used as int32 }
}

unsafe extern "system" fn pc_get_parameter_data(
    this: *mut IParameterChanges,
    index: int32,
) -> *mut IParamValueQueue {
    unsafe {
        let pc = this as *mut HostParameterChanges;
        if index < 0 || index as usize >= (*pc).used {
            return std::ptr::null_mut();
        }
        (*pc).queues.as_mut_ptr().add(index as usize) as *mut IParamValueQueue
    }
}

unsafe extern "system" fn pc_add_parameter_data(
    this: *mut IParameterChanges,
    id: *const ParamID,
    index: *mut int32,
) -> *mut IParamValueQueue {
    unsafe {
        if id.is_null() {
            return std::ptr::null_mut();
        }
        let pc = &mut *(this as *mut HostParameterChanges);
        let slot = match pc.queues[..pc.used].iter().position(|q| q.id == *id) {
            Some(i) => i,
            None => {
                if pc.used == pc.queues.len() {
                    return std::ptr::null_mut();
                }
                let i = pc.used;
                pc.queues[i].id = *id;
                pc.queues[i].has_point = false;
                pc.used += 1;
                i
            }
        };
        if !index.is_null() {
            *index = slot as int32;
        }
        pc.queues.as_mut_ptr().add(slot) as *mut IParamValueQueue
    }
}

impl HostParameterChanges {
    fn new() -> Box<Self> {
        Box::new(Self {
            vtbl: &PARAMETER_CHANGES_VTBL,
            queues: Vec::new(),
            used: 0,
        })
    }

    /// UI thread.
    fn reserve(&mut self, capacity: usize) {
        self.queues.clear();
        self.queues.extend((0..capacity).map(|_| HostParamValueQueue {
            vtbl: &PARAM_VALUE_QUEUE_VTBL,
            id: 0,
            sample_offset: 0,
            value: 0.0,
            has_point: false,
        }));
        self.used = 0;
    }

    fn clear(&mut self) {
        self.used = 0;
    }

    /// Copy the block's queues in, up to capacity.
    fn fill(&mut self, source: &ParameterQueues) {
        self.used = 0;
        for (slot, queue) in self.queues.iter_mut().zip(source.as_slice()) {
            let Some(point) = queue.points().last() else {
                continue;
            };
            slot.id = queue.id;
            slot.sample_offset = point.sample_offset;
            slot.value = point.value;
            slot.has_point = true;
            self.used += 1;
        }
    }

    /// Latest point of every queue the plugin filled.
    fn read(&self, sink: &mut dyn FnMut(ParamID, ParamValue)) {
        for queue in self.queues[..self.used].iter().filter(|q| q.has_point) {
            sink(queue.id, queue.value);
        }
    }

    fn as_com(&mut self) -> *mut IParameterChanges {
        self as *mut Self as *mut IParameterChanges
    }
}

// ---------------------------------------------------------------------------
// IEventList
// ---------------------------------------------------------------------------

#[repr(C)]
struct HostEventList {
    vtbl: *const IEventListVtbl,
    events: Vec<Event>,
}

static EVENT_LIST_VTBL: IEventListVtbl = IEventListVtbl {
    base: FUnknownVtbl {
        queryInterface: el_query_interface,
        addRef: embedded_add_ref,
        release: embedded_release,
    },
    getEventCount: el_get_event_count,
    getEvent: el_get_event,
    addEvent: el_add_event,
};

unsafe extern "system" fn el_query_interface(
    this: *mut FUnknown,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> tresult {
    unsafe { embedded_query(this, iid, obj, &IEventList_iid) }
}

unsafe extern "system" fn el_get_event_count(this: *mut IEventList) -> int32 {
    unsafe { (*(this as *mut HostEventList)).events.len() as int32 }
}

unsafe extern "system" fn el_get_event(this: *mut IEventList, index: int32, e: *mut Event) -> tresult {
    unsafe {
        let list = this as *mut HostEventList;
        if e.is_null() || index < 0 {
            return kInvalidArgument;
        }
        match (*list).events.get(index as usize) {
            Some(ev) => {
                *e = *ev;
                kResultOk
            }
            None => kInvalidArgument,
        }
    }
}

/// Never grows past the capacity reserved on the UI thread.
unsafe extern "system" fn el_add_event(this: *mut IEventList, e: *mut Event) -> tresult {
    unsafe {
        let list = this as *mut HostEventList;
        if e.is_null() {
            return kInvalidArgument;
        }
        if (*list).events.len() == (*list).events.capacity() {
            return kResultFalse;
        }
        (*list).events.push(*e);
        kResultOk
    }
}

impl HostEventList {
    fn new() -> Box<Self> {
        Box::new(Self {
            vtbl: &EVENT_LIST_VTBL,
            events: Vec::new(),
        })
    }

    fn reserve(&mut self, capacity: usize) {
        self.events = Vec::with_capacity(capacity);
    }

    fn as_com(&mut self) -> *mut IEventList {
        self as *mut Self as *mut IEventList
    }
}

/// Translate one event.  `Data` events point into `event`, which must
/// outlive the process call.
fn to_vst_event(event: &PluginEvent) -> Event {
    let mut e: Event = unsafe { std::mem::zeroed() };
    e.busIndex = event.bus_index;
    e.sampleOffset = event.sample_offset;
    e.ppqPosition = event.ppq_position;
    if event.is_live {
        e.flags = Event_::EventFlags_::kIsLive as uint16;
    }
    match event.body {
        PluginEventBody::NoteOn {
            channel,
            pitch,
            tuning,
            velocity,
            length,
            note_id,
        } => {
            e.r#type = Event_::EventTypes_::kNoteOnEvent as uint16;
            e.__field0.noteOn = NoteOnEvent {
                channel,
                pitch,
                tuning,
                velocity,
                length,
                noteId: note_id,
            };
        }
        PluginEventBody::NoteOff {
            channel,
            pitch,
            velocity,
            note_id,
            tuning,
        } => {
            e.r#type = Event_::EventTypes_::kNoteOffEvent as uint16;
            e.__field0.noteOff = NoteOffEvent {
                channel,
                pitch,
                velocity,
                noteId: note_id,
                tuning,
            };
        }
        PluginEventBody::NoteExpression {
            type_id,
            note_id,
            value,
        } => {
            e.r#type = Event_::EventTypes_::kNoteExpressionValueEvent as uint16;
            e.__field0.noteExpressionValue = NoteExpressionValueEvent {
                typeId: type_id,
                noteId: note_id,
                value,
            };
        }
        PluginEventBody::Data { ref bytes } => {
            e.r#type = Event_::EventTypes_::kDataEvent as uint16;
            e.__field0.data = DataEvent {
                size: bytes.len() as uint32,
                r#type: DataEvent_::DataTypes_::kMidiSysEx as uint32,
                bytes: bytes.as_ptr(),
            };
        }
    }
    e
}

// ---------------------------------------------------------------------------
// ProcessContext
// ---------------------------------------------------------------------------

fn fill_context(ctx: &mut ProcessContext, transport: &TransportContext) {
    use ProcessContext_::StatesAndFlags_::*;

    let mut state = (kTempoValid
        | kTimeSigValid
        | kProjectTimeMusicValid
        | kBarPositionValid
        | kSystemTimeValid) as uint32;
    if transport.playing {
        state |= kPlaying as uint32;
    }
    if transport.recording {
        state |= kRecording as uint32;
    }
    if transport.cycle_active {
        state |= (kCycleActive | kCycleValid) as uint32;
    }

    ctx.state = state;
    ctx.sampleRate = transport.sample_rate;
    ctx.projectTimeSamples = transport.project_time_samples;
    ctx.systemTime = transport.system_time;
    ctx.continousTimeSamples = transport.project_time_samples;
    ctx.projectTimeMusic = transport.project_time_music;
    ctx.barPositionMusic = transport.bar_position_music;
    ctx.cycleStartMusic = transport.cycle_start_music;
    ctx.cycleEndMusic = transport.cycle_end_music;
    ctx.tempo = transport.tempo;
    ctx.timeSigNumerator = transport.time_sig_numerator;
    ctx.timeSigDenominator = transport.time_sig_denominator;
    ctx.frameRate.framesPerSecond = transport.frames_per_second;
    ctx.frameRate.flags = 0;
}

// ---------------------------------------------------------------------------
// ProcessScratch
// ---------------------------------------------------------------------------

/// Per-processor scratch: parameter changes, event lists, bus buffer arrays
/// and the process context.
pub struct ProcessScratch {
    input_changes: Box<HostParameterChanges>,
    output_changes: Box<HostParameterChanges>,
    input_events: Box<HostEventList>,
    output_events: Box<HostEventList>,
    input_buses: Vec<AudioBusBuffers>,
    output_buses: Vec<AudioBusBuffers>,
    input_channels: Vec<Vec<*mut f32>>,
    output_channels: Vec<Vec<*mut f32>>,
    context: Box<ProcessContext>,
}

// The raw pointers are only dereferenced by the plugin during `process`,
// on whichever thread currently owns the processor.
unsafe impl Send for ProcessScratch {}

impl Default for ProcessScratch {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessScratch {
    pub fn new() -> Self {
        Self {
            input_changes: HostParameterChanges::new(),
            output_changes: HostParameterChanges::new(),
            input_events: HostEventList::new(),
            output_events: HostEventList::new(),
            input_buses: Vec::new(),
            output_buses: Vec::new(),
            input_channels: Vec::new(),
            output_channels: Vec::new(),
            context: Box::new(unsafe { std::mem::zeroed() }),
        }
    }

    /// Size everything for `buses`.  UI thread.
    pub fn prepare(&mut self, buses: &BusConfiguration, limits: &ScratchLimits) {
        self.input_changes.reserve(limits.max_parameter_changes);
        self.output_changes.reserve(limits.max_parameter_changes);
        self.input_events.reserve(limits.max_events);
        self.output_events.reserve(limits.max_events);

        self.input_channels = buses
            .audio_inputs
            .iter()
            .map(|b| vec![std::ptr::null_mut(); b.channel_count as usize])
            .collect();
        self.output_channels = buses
            .audio_outputs
            .iter()
            .map(|b| vec![std::ptr::null_mut(); b.channel_count as usize])
            .collect();
        self.input_buses = self
            .input_channels
            .iter()
            .map(|_| unsafe { std::mem::zeroed() })
            .collect();
        self.output_buses = self
            .output_channels
            .iter()
            .map(|_| unsafe { std::mem::zeroed() })
            .collect();
    }

    /// Fill a `ProcessData` pointing into this scratch and the host's
    /// buffers.  Returns `None` if the buffers do not fit the prepared
    /// layout.  Audio thread; does not allocate.
    pub fn build(
        &mut self,
        block: &ProcessBlock<'_>,
        inputs: &[&[&[f32]]],
        outputs: &mut [&mut [&mut [f32]]],
    ) -> Option<ProcessData> {
        if inputs.len() != self.input_channels.len() || outputs.len() != self.output_channels.len() {
            return None;
        }
        for ((bus, ptrs), buf) in inputs
            .iter()
            .zip(self.input_channels.iter_mut())
            .zip(self.input_buses.iter_mut())
        {
            if bus.len() != ptrs.len() {
                return None;
            }
            for (ptr, channel) in ptrs.iter_mut().zip(bus.iter()) {
                *ptr = channel.as_ptr() as *mut f32;
            }
            buf.numChannels = ptrs.len() as int32;
            buf.silenceFlags = 0;
            buf.__field0.channelBuffers32 = ptrs.as_mut_ptr();
        }
        for ((bus, ptrs), buf) in outputs
            .iter_mut()
            .zip(self.output_channels.iter_mut())
            .zip(self.output_buses.iter_mut())
        {
            if bus.len() != ptrs.len() {
                return None;
            }
            for (ptr, channel) in ptrs.iter_mut().zip(bus.iter_mut()) {
                *ptr = channel.as_mut_ptr();
            }
            buf.numChannels = ptrs.len() as int32;
            buf.silenceFlags = 0;
            buf.__field0.channelBuffers32 = ptrs.as_mut_ptr();
        }

        self.input_changes.fill(block.parameters);
        self.output_changes.clear();
        self.input_events.events.clear();
        let room = self.input_events.events.capacity();
        self.input_events
            .events
            .extend(block.events.iter().take(room).map(to_vst_event));
        self.output_events.events.clear();
        fill_context(&mut self.context, block.transport);

        let mut data: ProcessData = unsafe { std::mem::zeroed() };
        data.processMode = match block.mode {
            ProcessMode::Realtime => ProcessModes_::kRealtime as int32,
            ProcessMode::Offline => ProcessModes_::kOffline as int32,
        };
        data.symbolicSampleSize = SymbolicSampleSizes_::kSample32 as int32;
        data.numSamples = block.num_samples as int32;
        data.numInputs = self.input_buses.len() as int32;
        data.numOutputs = self.output_buses.len() as int32;
        data.inputs = if self.input_buses.is_empty() {
            std::ptr::null_mut()
        } else {
            self.input_buses.as_mut_ptr()
        };
        data.outputs = if self.output_buses.is_empty() {
            std::ptr::null_mut()
        } else {
            self.output_buses.as_mut_ptr()
        };
        data.inputParameterChanges = self.input_changes.as_com();
        data.outputParameterChanges = self.output_changes.as_com();
        data.inputEvents = self.input_events.as_com();
        data.outputEvents = self.output_events.as_com();
        data.processContext = &mut *self.context;
        Some(data)
    }

    /// Values the plugin reported through `outputParameterChanges` in the
    /// last block.
    pub fn read_output_parameters(&self, sink: &mut dyn FnMut(ParamID, ParamValue)) {
        self.output_changes.read(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::automation::{AutomationQueueBuilder, ScratchLimits};
    use crate::plugin::cc_map::MidiCcMap;
    use crate::plugin::events::HostIssuedEvent;
    use crate::plugin::types::{BusDescriptor, BusDirection, MediaKind, PlayingState, ProcessDetails};

    fn stereo(direction: BusDirection) -> BusDescriptor {
        BusDescriptor {
            direction,
            media: MediaKind::Audio,
            channel_count: 2,
            name: String::new(),
        }
    }

    fn buses() -> BusConfiguration {
        BusConfiguration {
            audio_inputs: vec![stereo(BusDirection::Input)],
            audio_outputs: vec![stereo(BusDirection::Output)],
            event_inputs: vec![BusDescriptor {
                direction: BusDirection::Input,
                media: MediaKind::Event,
                channel_count: 16,
                name: String::new(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_build_wires_buffers_events_and_parameters() {
        let limits = ScratchLimits::default();
        let mut scratch = ProcessScratch::new();
        scratch.prepare(&buses(), &limits);

        let mut builder = AutomationQueueBuilder::new(limits);
        let cc_map = MidiCcMap::new(None);
        builder.begin_block(16);
        builder.push(&HostIssuedEvent::midi(3, [0x90, 60, 127]), &cc_map, true);
        builder.push(&HostIssuedEvent::parameter(5, 7, 0.25), &cc_map, true);

        let transport = TransportContext::from_details(&ProcessDetails {
            playing_state: PlayingState::Playing,
            ..Default::default()
        });
        let block = ProcessBlock {
            num_samples: 16,
            mode: ProcessMode::Realtime,
            events: builder.events(),
            parameters: builder.parameters(),
            transport: &transport,
        };

        let l = [0.5f32; 16];
        let r = [0.5f32; 16];
        let mut ol = [0.0f32; 16];
        let mut or = [0.0f32; 16];
        let input: [&[f32]; 2] = [&l, &r];
        let inputs: [&[&[f32]]; 1] = [&input];
        let mut out: [&mut [f32]; 2] = [&mut ol, &mut or];
        let mut outputs: [&mut [&mut [f32]]; 1] = [&mut out];

        let data = scratch.build(&block, &inputs, &mut outputs).unwrap();
        assert_eq!(data.numSamples, 16);
        assert_eq!(data.numInputs, 1);
        assert_eq!(data.numOutputs, 1);
        unsafe {
            let events = data.inputEvents;
            assert_eq!(((*(*events).vtbl).getEventCount)(events), 1);
            let mut e: Event = std::mem::zeroed();
            assert_eq!(((*(*events).vtbl).getEvent)(events, 0, &mut e), kResultOk);
            assert_eq!(e.sampleOffset, 3);
            assert_eq!(e.r#type, Event_::EventTypes_::kNoteOnEvent as uint16);
            assert_eq!(e.__field0.noteOn.pitch, 60);
            assert_eq!(e.__field0.noteOn.velocity, 1.0);

            let changes = data.inputParameterChanges;
            assert_eq!(((*(*changes).vtbl).getParameterCount)(changes), 1);
            let q = ((*(*changes).vtbl).getParameterData)(changes, 0);
            assert_eq!(((*(*q).vtbl).getParameterId)(q), 7);
            let (mut offset, mut value) = (0, 0.0);
            ((*(*q).vtbl).getPoint)(q, 0, &mut offset, &mut value);
            assert_eq!((offset, value), (5, 0.25));

            let ctx = &*data.processContext;
            assert_ne!(ctx.state & ProcessContext_::StatesAndFlags_::kPlaying as uint32, 0);
            assert_eq!(ctx.frameRate.framesPerSecond, 60);
        }
    }

    #[test]
    fn test_build_rejects_wrong_layout() {
        let mut scratch = ProcessScratch::new();
        scratch.prepare(&buses(), &ScratchLimits::default());
        let builder = AutomationQueueBuilder::new(ScratchLimits::default());
        let transport = TransportContext::default();
        let block = ProcessBlock {
            num_samples: 4,
            mode: ProcessMode::Offline,
            events: builder.events(),
            parameters: builder.parameters(),
            transport: &transport,
        };
        let mono = [0.0f32; 4];
        let input: [&[f32]; 1] = [&mono];
        let inputs: [&[&[f32]]; 1] = [&input];
        assert!(scratch.build(&block, &inputs, &mut []).is_none());
    }

    #[test]
    fn test_output_changes_accept_plugin_writes() {
        let mut pc = HostParameterChanges::new();
        pc.reserve(2);
        unsafe {
            let com = pc.as_com();
            let mut index = -1;
            let q = pc_add_parameter_data(com, &9, &mut index);
            assert_eq!(index, 0);
            pvq_add_point(q, 4, 0.75, std::ptr::null_mut());
            pvq_add_point(q, 9, 0.8, std::ptr::null_mut());
            let again = pc_add_parameter_data(com, &9, &mut index);
            assert_eq!(q, again);
            pc_add_parameter_data(com, &10, std::ptr::null_mut());
            assert!(pc_add_parameter_data(com, &11, std::ptr::null_mut()).is_null());
            assert_eq!(pc_get_parameter_count(com), 2);
        }

        // Queue 10 was opened but never given a point.
        let mut seen = Vec::new();
        pc.read(&mut |id, value| seen.push((id, value)));
        assert_eq!(seen, vec![(9, 0.8)]);

        pc.clear();
        seen.clear();
        pc.read(&mut |id, value| seen.push((id, value)));
        assert!(seen.is_empty());
    }
}
