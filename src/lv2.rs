//! LV2 C ABI definitions and URI constants.
//!
//! `lv2_raw` covers the core and URID headers; the interfaces below mirror
//! the worker, options, log and state make-path headers, which it does not
//! ship. All of these structs are part of the plugin ABI and must keep the
//! exact C layout.

use std::os::raw::{c_char, c_int, c_void};

pub use lv2_raw::core::LV2Feature;
pub use lv2_raw::urid::{LV2Urid, LV2UridMap, LV2UridUnmap};

pub type LV2Handle = *mut c_void;

/// `LV2_Worker_Status`.
pub type LV2WorkerStatus = c_int;
pub const LV2_WORKER_SUCCESS: LV2WorkerStatus = 0;
pub const LV2_WORKER_ERR_UNKNOWN: LV2WorkerStatus = 1;
pub const LV2_WORKER_ERR_NO_SPACE: LV2WorkerStatus = 2;

pub type LV2WorkerRespondHandle = *mut c_void;

/// Callback handed to the plugin's `work` so it can queue a response for
/// the next process cycle.
pub type LV2WorkerRespondFunction = unsafe extern "C" fn(
    handle: LV2WorkerRespondHandle,
    size: u32,
    data: *const c_void,
) -> LV2WorkerStatus;

/// `LV2_Worker_Interface`, returned through the plugin's extension data.
#[repr(C)]
pub struct LV2WorkerInterface {
    pub work: unsafe extern "C" fn(
        instance: LV2Handle,
        respond: LV2WorkerRespondFunction,
        handle: LV2WorkerRespondHandle,
        size: u32,
        data: *const c_void,
    ) -> LV2WorkerStatus,
    pub work_response: Option<
        unsafe extern "C" fn(instance: LV2Handle, size: u32, body: *const c_void) -> LV2WorkerStatus,
    >,
    pub end_run: Option<unsafe extern "C" fn(instance: LV2Handle) -> LV2WorkerStatus>,
}

/// `LV2_Worker_Schedule`, passed to the plugin as feature data.
#[repr(C)]
pub struct LV2WorkerSchedule {
    pub handle: *mut c_void,
    pub schedule_work:
        unsafe extern "C" fn(handle: *mut c_void, size: u32, data: *const c_void) -> LV2WorkerStatus,
}

/// `LV2_Options_Context::LV2_OPTIONS_INSTANCE`.
pub const LV2_OPTIONS_INSTANCE: u32 = 0;

/// One entry of the zero-terminated `LV2_Options_Option` array.
#[repr(C)]
pub struct LV2OptionsOption {
    pub context: u32,
    pub subject: u32,
    pub key: LV2Urid,
    pub size: u32,
    pub typ: LV2Urid,
    pub value: *const c_void,
}

/// `LV2_Log_Log`.
///
/// The plugin calls `printf` variadically; the host side receives the
/// format string only and prints it verbatim, since C varargs cannot be
/// consumed from stable Rust. `vprintf` treats the `va_list` as opaque.
#[repr(C)]
pub struct LV2LogLog {
    pub handle: *mut c_void,
    pub printf:
        unsafe extern "C" fn(handle: *mut c_void, typ: LV2Urid, fmt: *const c_char) -> c_int,
    pub vprintf: unsafe extern "C" fn(
        handle: *mut c_void,
        typ: LV2Urid,
        fmt: *const c_char,
        args: *mut c_void,
    ) -> c_int,
}

/// `LV2_State_Make_Path`. The returned string is allocated with `malloc`
/// and owned by the plugin, which frees it with `free`.
#[repr(C)]
pub struct LV2StateMakePath {
    pub handle: *mut c_void,
    pub path: unsafe extern "C" fn(handle: *mut c_void, path: *const c_char) -> *mut c_char,
}

pub const LV2_CORE_AUDIO_PORT: &str = "http://lv2plug.in/ns/lv2core#AudioPort";
pub const LV2_CORE_CONTROL_PORT: &str = "http://lv2plug.in/ns/lv2core#ControlPort";
pub const LV2_CORE_CV_PORT: &str = "http://lv2plug.in/ns/lv2core#CVPort";
pub const LV2_CORE_INPUT_PORT: &str = "http://lv2plug.in/ns/lv2core#InputPort";
pub const LV2_CORE_OUTPUT_PORT: &str = "http://lv2plug.in/ns/lv2core#OutputPort";
pub const LV2_CORE_CONNECTION_OPTIONAL: &str = "http://lv2plug.in/ns/lv2core#connectionOptional";
pub const LV2_CORE_CONTROL: &str = "http://lv2plug.in/ns/lv2core#control";
pub const LV2_CORE_DESIGNATION: &str = "http://lv2plug.in/ns/lv2core#designation";
pub const LV2_CORE_REPORTS_LATENCY: &str = "http://lv2plug.in/ns/lv2core#reportsLatency";
pub const LV2_CORE_IS_LIVE: &str = "http://lv2plug.in/ns/lv2core#isLive";

pub const LV2_ATOM_PORT: &str = "http://lv2plug.in/ns/ext/atom#AtomPort";
pub const LV2_ATOM_CHUNK: &str = "http://lv2plug.in/ns/ext/atom#Chunk";
pub const LV2_ATOM_SEQUENCE: &str = "http://lv2plug.in/ns/ext/atom#Sequence";
pub const LV2_ATOM_FLOAT: &str = "http://lv2plug.in/ns/ext/atom#Float";
pub const LV2_ATOM_INT: &str = "http://lv2plug.in/ns/ext/atom#Int";
pub const LV2_ATOM_LONG: &str = "http://lv2plug.in/ns/ext/atom#Long";
pub const LV2_ATOM_OBJECT: &str = "http://lv2plug.in/ns/ext/atom#Object";
pub const LV2_ATOM_PATH: &str = "http://lv2plug.in/ns/ext/atom#Path";
pub const LV2_ATOM_STRING: &str = "http://lv2plug.in/ns/ext/atom#String";
pub const LV2_ATOM_EVENT_TRANSFER: &str = "http://lv2plug.in/ns/ext/atom#eventTransfer";

pub const LV2_EVENT_PORT: &str = "http://lv2plug.in/ns/ext/event#EventPort";

pub const LV2_BUF_SIZE_MIN_BLOCK_LENGTH: &str =
    "http://lv2plug.in/ns/ext/buf-size#minBlockLength";
pub const LV2_BUF_SIZE_MAX_BLOCK_LENGTH: &str =
    "http://lv2plug.in/ns/ext/buf-size#maxBlockLength";
pub const LV2_BUF_SIZE_SEQUENCE_SIZE: &str = "http://lv2plug.in/ns/ext/buf-size#sequenceSize";
pub const LV2_BUF_SIZE_POWER_OF_2_BLOCK_LENGTH: &str =
    "http://lv2plug.in/ns/ext/buf-size#powerOf2BlockLength";
pub const LV2_BUF_SIZE_FIXED_BLOCK_LENGTH: &str =
    "http://lv2plug.in/ns/ext/buf-size#fixedBlockLength";
pub const LV2_BUF_SIZE_BOUNDED_BLOCK_LENGTH: &str =
    "http://lv2plug.in/ns/ext/buf-size#boundedBlockLength";

pub const LV2_LOG_LOG: &str = "http://lv2plug.in/ns/ext/log#log";
pub const LV2_LOG_ENTRY: &str = "http://lv2plug.in/ns/ext/log#Entry";
pub const LV2_LOG_ERROR: &str = "http://lv2plug.in/ns/ext/log#Error";
pub const LV2_LOG_NOTE: &str = "http://lv2plug.in/ns/ext/log#Note";
pub const LV2_LOG_TRACE: &str = "http://lv2plug.in/ns/ext/log#Trace";
pub const LV2_LOG_WARNING: &str = "http://lv2plug.in/ns/ext/log#Warning";

pub const LV2_MIDI_EVENT: &str = "http://lv2plug.in/ns/ext/midi#MidiEvent";

pub const LV2_PARAM_SAMPLE_RATE: &str = "http://lv2plug.in/ns/ext/parameters#sampleRate";

pub const LV2_PATCH_GET: &str = "http://lv2plug.in/ns/ext/patch#Get";
pub const LV2_PATCH_PUT: &str = "http://lv2plug.in/ns/ext/patch#Put";
pub const LV2_PATCH_SET: &str = "http://lv2plug.in/ns/ext/patch#Set";
pub const LV2_PATCH_BODY: &str = "http://lv2plug.in/ns/ext/patch#body";
pub const LV2_PATCH_PROPERTY: &str = "http://lv2plug.in/ns/ext/patch#property";
pub const LV2_PATCH_VALUE: &str = "http://lv2plug.in/ns/ext/patch#value";

pub const LV2_RESIZE_PORT_MINIMUM_SIZE: &str =
    "http://lv2plug.in/ns/ext/resize-port#minimumSize";

pub const LV2_STATE_MAKE_PATH: &str = "http://lv2plug.in/ns/ext/state#makePath";
pub const LV2_STATE_LOAD_DEFAULT_STATE: &str =
    "http://lv2plug.in/ns/ext/state#loadDefaultState";
pub const LV2_STATE_THREAD_SAFE_RESTORE: &str =
    "http://lv2plug.in/ns/ext/state#threadSafeRestore";

pub const LV2_TIME_POSITION: &str = "http://lv2plug.in/ns/ext/time#Position";
pub const LV2_TIME_BAR: &str = "http://lv2plug.in/ns/ext/time#bar";
pub const LV2_TIME_BAR_BEAT: &str = "http://lv2plug.in/ns/ext/time#barBeat";
pub const LV2_TIME_BEAT_UNIT: &str = "http://lv2plug.in/ns/ext/time#beatUnit";
pub const LV2_TIME_BEATS_PER_BAR: &str = "http://lv2plug.in/ns/ext/time#beatsPerBar";
pub const LV2_TIME_BEATS_PER_MINUTE: &str = "http://lv2plug.in/ns/ext/time#beatsPerMinute";
pub const LV2_TIME_FRAME: &str = "http://lv2plug.in/ns/ext/time#frame";
pub const LV2_TIME_SPEED: &str = "http://lv2plug.in/ns/ext/time#speed";

pub const LV2_UI_UPDATE_RATE: &str = "http://lv2plug.in/ns/extensions/ui#updateRate";

pub const LV2_URID_MAP: &str = "http://lv2plug.in/ns/ext/urid#map";
pub const LV2_URID_UNMAP: &str = "http://lv2plug.in/ns/ext/urid#unmap";

pub const LV2_OPTIONS_OPTIONS: &str = "http://lv2plug.in/ns/ext/options#options";

pub const LV2_WORKER_SCHEDULE: &str = "http://lv2plug.in/ns/ext/worker#schedule";
pub const LV2_WORKER_INTERFACE: &str = "http://lv2plug.in/ns/ext/worker#interface";
