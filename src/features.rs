//! The capability list handed to the plugin at instantiation.
//!
//! Everything referenced by a feature (the C structs, the option values,
//! the URI strings) is heap pinned inside [`FeatureSet`] and outlives the
//! plugin instance. The set itself may move; the plugin only ever holds
//! pointers to the boxed contents.

use log::{error, info, warn};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::path::PathBuf;
use std::sync::Arc;

use crate::lv2::{
    self, LV2Feature, LV2LogLog, LV2OptionsOption, LV2StateMakePath, LV2Urid, LV2WorkerSchedule,
    LV2_OPTIONS_INSTANCE,
};
use crate::urid::{HostUrids, UridFeatures, UridMapper};
use crate::worker;

/// Features the host can provide. A plugin requiring anything else fails
/// instantiation.
const SUPPORTED_FEATURES: &[&str] = &[
    lv2::LV2_URID_MAP,
    lv2::LV2_URID_UNMAP,
    lv2::LV2_STATE_MAKE_PATH,
    lv2::LV2_STATE_LOAD_DEFAULT_STATE,
    lv2::LV2_WORKER_SCHEDULE,
    lv2::LV2_LOG_LOG,
    lv2::LV2_OPTIONS_OPTIONS,
    lv2::LV2_BUF_SIZE_POWER_OF_2_BLOCK_LENGTH,
    lv2::LV2_BUF_SIZE_FIXED_BLOCK_LENGTH,
    lv2::LV2_BUF_SIZE_BOUNDED_BLOCK_LENGTH,
];

/// True when the host offers `uri`. lv2core#isLive is a property of the
/// host rather than a capability, and is accepted implicitly.
pub fn is_supported(uri: &str) -> bool {
    uri == lv2::LV2_CORE_IS_LIVE || SUPPORTED_FEATURES.contains(&uri)
}

/// The option values passed through options:options. The plugin keeps
/// pointers to these for its lifetime.
#[repr(C)]
pub struct FeatureOptions {
    pub sample_rate: f32,
    pub min_block_length: i32,
    pub max_block_length: i32,
    pub sequence_size: i32,
    pub ui_update_rate: f32,
}

struct LogCtx {
    trace_enabled: bool,
    trace: LV2Urid,
    error: LV2Urid,
    warning: LV2Urid,
}

struct PathCtx {
    dir: PathBuf,
}

pub struct FeatureSetConfig<'a> {
    pub mapper: &'a Arc<UridMapper>,
    pub urids: &'a HostUrids,
    /// Data pointer for the worker schedule feature.
    pub schedule_data: *mut c_void,
    /// Print the plugin's trace-class log messages.
    pub trace: bool,
    /// Directory handed out through state:makePath.
    pub save_dir: PathBuf,
    pub options: FeatureOptions,
}

pub struct FeatureSet {
    _urid: UridFeatures,
    _schedule: Box<LV2WorkerSchedule>,
    _log: Box<LV2LogLog>,
    _make_path: Box<LV2StateMakePath>,
    _option_values: Box<FeatureOptions>,
    _options: Box<[LV2OptionsOption; 6]>,
    _log_ctx: Box<LogCtx>,
    _path_ctx: Box<PathCtx>,
    /// Backing storage for the feature URI pointers.
    _uris: Vec<CString>,
    features: Vec<LV2Feature>,
}

impl FeatureSet {
    pub fn new(config: FeatureSetConfig) -> Self {
        let urid = UridFeatures::new(config.mapper);

        let schedule = Box::new(LV2WorkerSchedule {
            handle: config.schedule_data,
            schedule_work: worker::schedule_work,
        });

        let log_ctx = Box::new(LogCtx {
            trace_enabled: config.trace,
            trace: config.urids.log_trace,
            error: config.urids.log_error,
            warning: config.urids.log_warning,
        });
        let llog = Box::new(LV2LogLog {
            handle: &*log_ctx as *const LogCtx as *mut c_void,
            printf: log_printf,
            vprintf: log_vprintf,
        });

        let path_ctx = Box::new(PathCtx {
            dir: config.save_dir,
        });
        let make_path = Box::new(LV2StateMakePath {
            handle: &*path_ctx as *const PathCtx as *mut c_void,
            path: state_make_path,
        });

        let option_values = Box::new(config.options);
        let urids = config.urids;
        let options = Box::new([
            option_entry(
                urids.param_sample_rate,
                4,
                urids.atom_float,
                &option_values.sample_rate as *const f32 as *const c_void,
            ),
            option_entry(
                urids.bufsz_min_block_length,
                4,
                urids.atom_int,
                &option_values.min_block_length as *const i32 as *const c_void,
            ),
            option_entry(
                urids.bufsz_max_block_length,
                4,
                urids.atom_int,
                &option_values.max_block_length as *const i32 as *const c_void,
            ),
            option_entry(
                urids.bufsz_sequence_size,
                4,
                urids.atom_int,
                &option_values.sequence_size as *const i32 as *const c_void,
            ),
            option_entry(
                urids.ui_update_rate,
                4,
                urids.atom_float,
                &option_values.ui_update_rate as *const f32 as *const c_void,
            ),
            option_entry(0, 0, 0, std::ptr::null()),
        ]);

        let uris: Vec<CString> = SUPPORTED_FEATURES
            .iter()
            .map(|uri| CString::new(*uri).unwrap())
            .collect();

        let data_for = |uri: &str| -> *mut c_void {
            match uri {
                lv2::LV2_URID_MAP => &*urid.map as *const _ as *mut c_void,
                lv2::LV2_URID_UNMAP => &*urid.unmap as *const _ as *mut c_void,
                lv2::LV2_STATE_MAKE_PATH => &*make_path as *const _ as *mut c_void,
                lv2::LV2_WORKER_SCHEDULE => &*schedule as *const _ as *mut c_void,
                lv2::LV2_LOG_LOG => &*llog as *const _ as *mut c_void,
                lv2::LV2_OPTIONS_OPTIONS => options.as_ptr() as *mut c_void,
                // loadDefaultState and the block length guarantees carry
                // no data.
                _ => std::ptr::null_mut(),
            }
        };

        let features: Vec<LV2Feature> = SUPPORTED_FEATURES
            .iter()
            .zip(&uris)
            .map(|(uri, curi)| LV2Feature {
                uri: curi.as_ptr(),
                data: data_for(uri),
            })
            .collect();

        FeatureSet {
            _urid: urid,
            _schedule: schedule,
            _log: llog,
            _make_path: make_path,
            _option_values: option_values,
            _options: options,
            _log_ctx: log_ctx,
            _path_ctx: path_ctx,
            _uris: uris,
            features,
        }
    }

    /// The feature list in the shape `lilv` expects for instantiation.
    pub fn refs(&self) -> Vec<&LV2Feature> {
        self.features.iter().collect()
    }
}

fn option_entry(key: LV2Urid, size: u32, typ: LV2Urid, value: *const c_void) -> LV2OptionsOption {
    LV2OptionsOption {
        context: LV2_OPTIONS_INSTANCE,
        subject: 0,
        key,
        size,
        typ,
        value,
    }
}

fn log_message(ctx: &LogCtx, typ: LV2Urid, fmt: *const c_char) -> c_int {
    if fmt.is_null() {
        return 0;
    }
    let msg = unsafe { CStr::from_ptr(fmt) }.to_string_lossy();
    let msg = msg.trim_end();

    // The format string is printed verbatim; C varargs cannot be consumed
    // from here.
    if typ == ctx.trace {
        if ctx.trace_enabled {
            println!("trace: {msg}");
        }
    } else if typ == ctx.error {
        error!("plugin: {msg}");
    } else if typ == ctx.warning {
        warn!("plugin: {msg}");
    } else {
        info!("plugin: {msg}");
    }
    msg.len() as c_int
}

unsafe extern "C" fn log_printf(handle: *mut c_void, typ: LV2Urid, fmt: *const c_char) -> c_int {
    if handle.is_null() {
        return 0;
    }
    log_message(&*(handle as *const LogCtx), typ, fmt)
}

unsafe extern "C" fn log_vprintf(
    handle: *mut c_void,
    typ: LV2Urid,
    fmt: *const c_char,
    _args: *mut c_void,
) -> c_int {
    if handle.is_null() {
        return 0;
    }
    log_message(&*(handle as *const LogCtx), typ, fmt)
}

/// state:makePath callback. Returns a malloc-allocated path inside the
/// save directory which the plugin frees with `free`.
unsafe extern "C" fn state_make_path(handle: *mut c_void, path: *const c_char) -> *mut c_char {
    if handle.is_null() || path.is_null() {
        return std::ptr::null_mut();
    }
    let ctx = &*(handle as *const PathCtx);
    let relative = CStr::from_ptr(path).to_string_lossy();
    let full = ctx.dir.join(relative.as_ref());

    if let Some(parent) = full.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            error!("could not create state directory {}: {err}", parent.display());
        }
    }

    let bytes = full.to_string_lossy().into_owned().into_bytes();
    let out = libc::malloc(bytes.len() + 1) as *mut c_char;
    if out.is_null() {
        return std::ptr::null_mut();
    }
    std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, out, bytes.len());
    *out.add(bytes.len()) = 0;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_set(dir: PathBuf) -> FeatureSet {
        let mapper = UridMapper::new();
        let urids = HostUrids::new(&mapper);
        FeatureSet::new(FeatureSetConfig {
            mapper: &mapper,
            urids: &urids,
            schedule_data: std::ptr::null_mut(),
            trace: false,
            save_dir: dir,
            options: FeatureOptions {
                sample_rate: 48000.0,
                min_block_length: 256,
                max_block_length: 256,
                sequence_size: 4096,
                ui_update_rate: 30.0,
            },
        })
    }

    #[test]
    fn supports_its_own_feature_list() {
        for uri in SUPPORTED_FEATURES {
            assert!(is_supported(uri), "{uri} should be supported");
        }
        assert!(is_supported(lv2::LV2_CORE_IS_LIVE));
        assert!(!is_supported("http://example.org/not-a-feature"));
    }

    #[test]
    fn every_feature_has_a_valid_uri() {
        let dir = tempfile::tempdir().unwrap();
        let set = test_set(dir.path().to_owned());
        let refs = set.refs();
        assert_eq!(refs.len(), SUPPORTED_FEATURES.len());
        for feature in refs {
            let uri = unsafe { CStr::from_ptr(feature.uri) };
            assert!(is_supported(uri.to_str().unwrap()));
        }
    }

    #[test]
    fn options_array_is_zero_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let set = test_set(dir.path().to_owned());
        let last = &set._options[5];
        assert_eq!(last.key, 0);
        assert!(last.value.is_null());
    }

    #[test]
    fn make_path_returns_a_path_inside_the_save_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Box::new(PathCtx {
            dir: dir.path().to_owned(),
        });
        let request = CString::new("samples/kick.wav").unwrap();
        let out = unsafe {
            state_make_path(
                &*ctx as *const PathCtx as *mut c_void,
                request.as_ptr(),
            )
        };
        assert!(!out.is_null());
        let path = unsafe { CStr::from_ptr(out) }.to_str().unwrap().to_owned();
        unsafe { libc::free(out as *mut c_void) };

        assert!(path.starts_with(dir.path().to_str().unwrap()));
        assert!(path.ends_with("kick.wav"));
        // The parent directory now exists so the plugin can write there.
        assert!(dir.path().join("samples").is_dir());
    }
}
