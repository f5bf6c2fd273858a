//! The URI to URID symbol map shared by every thread, and the pre-cached
//! identifiers the process cycle is allowed to use.
//!
//! Mapping takes a mutex, so the realtime thread must never call `map` for
//! a URI that was not already resolved during setup. Everything the cycle
//! needs lives in [`HostUrids`], resolved once before the plugin is
//! instantiated.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::sync::Arc;

use crate::lv2::{self, LV2Urid, LV2UridMap, LV2UridUnmap};

/// Append-only URI dictionary. IDs start at 1 and are dense and stable for
/// the lifetime of the process.
struct Symap {
    ids: HashMap<String, LV2Urid>,
    /// Reverse index. `uris[id - 1]` is the string for `id`. The CStrings
    /// are heap allocations whose addresses survive Vec growth, which is
    /// what lets `unmap` hand out raw pointers.
    uris: Vec<CString>,
}

impl Symap {
    fn new() -> Self {
        Symap {
            ids: HashMap::new(),
            uris: Vec::new(),
        }
    }

    fn map(&mut self, uri: &str) -> LV2Urid {
        if let Some(id) = self.ids.get(uri) {
            return *id;
        }

        let id = self.uris.len() as LV2Urid + 1;
        let cstr = CString::new(uri).expect("URI contains a NUL byte");
        self.uris.push(cstr);
        self.ids.insert(uri.to_owned(), id);
        id
    }

    fn unmap(&self, urid: LV2Urid) -> Option<&CStr> {
        if urid == 0 {
            return None;
        }
        self.uris.get(urid as usize - 1).map(|s| s.as_c_str())
    }
}

/// Thread-safe URI mapper handed to the plugin through the urid:map and
/// urid:unmap features.
pub struct UridMapper {
    inner: Mutex<Symap>,
}

impl UridMapper {
    pub fn new() -> Arc<Self> {
        Arc::new(UridMapper {
            inner: Mutex::new(Symap::new()),
        })
    }

    /// Map a URI to its URID, assigning the next free one if needed.
    pub fn map(&self, uri: &str) -> LV2Urid {
        self.inner.lock().map(uri)
    }

    /// Look up the URI for an URID assigned earlier. Returns an owned copy
    /// so the lock is not held by the caller.
    pub fn unmap(&self, urid: LV2Urid) -> Option<String> {
        self.inner
            .lock()
            .unmap(urid)
            .map(|s| s.to_string_lossy().into_owned())
    }

    fn map_cstr(&self, uri: &CStr) -> LV2Urid {
        match uri.to_str() {
            Ok(uri) => self.inner.lock().map(uri),
            Err(_) => 0,
        }
    }

    fn unmap_raw(&self, urid: LV2Urid) -> *const c_char {
        match self.inner.lock().unmap(urid) {
            Some(s) => s.as_ptr(),
            None => std::ptr::null(),
        }
    }
}

extern "C" fn map_uri(handle: *mut c_void, uri: *const c_char) -> LV2Urid {
    if handle.is_null() || uri.is_null() {
        return 0;
    }
    let mapper = unsafe { &*(handle as *const UridMapper) };
    let uri = unsafe { CStr::from_ptr(uri) };
    mapper.map_cstr(uri)
}

extern "C" fn unmap_uri(handle: *mut c_void, urid: LV2Urid) -> *const c_char {
    if handle.is_null() {
        return std::ptr::null();
    }
    let mapper = unsafe { &*(handle as *const UridMapper) };
    mapper.unmap_raw(urid)
}

/// The C structs for the urid features, heap pinned so the plugin can keep
/// the pointers for its whole lifetime.
pub struct UridFeatures {
    pub map: Box<LV2UridMap>,
    pub unmap: Box<LV2UridUnmap>,
    /// Keeps the mapper behind the raw handles alive.
    _mapper: Arc<UridMapper>,
}

impl UridFeatures {
    pub fn new(mapper: &Arc<UridMapper>) -> Self {
        let handle = Arc::as_ptr(mapper) as *mut c_void;
        UridFeatures {
            map: Box::new(LV2UridMap {
                handle,
                map: map_uri,
            }),
            unmap: Box::new(LV2UridUnmap {
                handle,
                unmap: unmap_uri,
            }),
            _mapper: Arc::clone(mapper),
        }
    }
}

/// Every URID the host uses after setup, resolved once. The process cycle
/// reads these fields and never touches the mapper itself.
#[derive(Clone)]
pub struct HostUrids {
    pub atom_chunk: LV2Urid,
    pub atom_float: LV2Urid,
    pub atom_int: LV2Urid,
    pub atom_long: LV2Urid,
    pub atom_object: LV2Urid,
    pub atom_path: LV2Urid,
    pub atom_sequence: LV2Urid,
    pub atom_string: LV2Urid,
    pub atom_event_transfer: LV2Urid,
    pub bufsz_min_block_length: LV2Urid,
    pub bufsz_max_block_length: LV2Urid,
    pub bufsz_sequence_size: LV2Urid,
    pub log_error: LV2Urid,
    pub log_note: LV2Urid,
    pub log_trace: LV2Urid,
    pub log_warning: LV2Urid,
    pub midi_event: LV2Urid,
    pub param_sample_rate: LV2Urid,
    pub patch_get: LV2Urid,
    pub patch_put: LV2Urid,
    pub patch_set: LV2Urid,
    pub patch_body: LV2Urid,
    pub patch_property: LV2Urid,
    pub patch_value: LV2Urid,
    pub time_position: LV2Urid,
    pub time_bar: LV2Urid,
    pub time_bar_beat: LV2Urid,
    pub time_beat_unit: LV2Urid,
    pub time_beats_per_bar: LV2Urid,
    pub time_beats_per_minute: LV2Urid,
    pub time_frame: LV2Urid,
    pub time_speed: LV2Urid,
    pub ui_update_rate: LV2Urid,
}

impl HostUrids {
    pub fn new(mapper: &UridMapper) -> Self {
        HostUrids {
            atom_chunk: mapper.map(lv2::LV2_ATOM_CHUNK),
            atom_float: mapper.map(lv2::LV2_ATOM_FLOAT),
            atom_int: mapper.map(lv2::LV2_ATOM_INT),
            atom_long: mapper.map(lv2::LV2_ATOM_LONG),
            atom_object: mapper.map(lv2::LV2_ATOM_OBJECT),
            atom_path: mapper.map(lv2::LV2_ATOM_PATH),
            atom_sequence: mapper.map(lv2::LV2_ATOM_SEQUENCE),
            atom_string: mapper.map(lv2::LV2_ATOM_STRING),
            atom_event_transfer: mapper.map(lv2::LV2_ATOM_EVENT_TRANSFER),
            bufsz_min_block_length: mapper.map(lv2::LV2_BUF_SIZE_MIN_BLOCK_LENGTH),
            bufsz_max_block_length: mapper.map(lv2::LV2_BUF_SIZE_MAX_BLOCK_LENGTH),
            bufsz_sequence_size: mapper.map(lv2::LV2_BUF_SIZE_SEQUENCE_SIZE),
            log_error: mapper.map(lv2::LV2_LOG_ERROR),
            log_note: mapper.map(lv2::LV2_LOG_NOTE),
            log_trace: mapper.map(lv2::LV2_LOG_TRACE),
            log_warning: mapper.map(lv2::LV2_LOG_WARNING),
            midi_event: mapper.map(lv2::LV2_MIDI_EVENT),
            param_sample_rate: mapper.map(lv2::LV2_PARAM_SAMPLE_RATE),
            patch_get: mapper.map(lv2::LV2_PATCH_GET),
            patch_put: mapper.map(lv2::LV2_PATCH_PUT),
            patch_set: mapper.map(lv2::LV2_PATCH_SET),
            patch_body: mapper.map(lv2::LV2_PATCH_BODY),
            patch_property: mapper.map(lv2::LV2_PATCH_PROPERTY),
            patch_value: mapper.map(lv2::LV2_PATCH_VALUE),
            time_position: mapper.map(lv2::LV2_TIME_POSITION),
            time_bar: mapper.map(lv2::LV2_TIME_BAR),
            time_bar_beat: mapper.map(lv2::LV2_TIME_BAR_BEAT),
            time_beat_unit: mapper.map(lv2::LV2_TIME_BEAT_UNIT),
            time_beats_per_bar: mapper.map(lv2::LV2_TIME_BEATS_PER_BAR),
            time_beats_per_minute: mapper.map(lv2::LV2_TIME_BEATS_PER_MINUTE),
            time_frame: mapper.map(lv2::LV2_TIME_FRAME),
            time_speed: mapper.map(lv2::LV2_TIME_SPEED),
            ui_update_rate: mapper.map(lv2::LV2_UI_UPDATE_RATE),
        }
    }
}
