//! C-compatible Foreign Function Interface (FFI) for reelvault
//!
//! Lets a host application (the mobile app shell, or anything that can call
//! a C library) own a transfer controller and receive progress and terminal
//! events through C callbacks.
//!
//! # Memory Management
//!
//! - All string parameters should be null-terminated UTF-8 C strings (char*)
//! - Controllers are created with `reelvault_controller_new()` and must be
//!   released with `reelvault_controller_free()`
//! - Returned strings are allocated by Rust and must be freed with
//!   `reelvault_free_string()`
//!
//! # Error Handling
//!
//! Functions return a ReelvaultResult code:
//! - 0: Success
//! - 1: Invalid parameter
//! - 2: Network error
//! - 3: I/O error
//! - 4: A transfer is already active
//! - 5: Unknown error
//!
//! For detailed error messages, call `reelvault_last_error_message()` after any
//! non-success result. The returned string must be freed with `reelvault_free_string()`.
//!
//! # Threading Model
//!
//! One global Tokio runtime runs every transfer. `reelvault_start_*` return
//! as soon as the transfer is running; progress and terminal callbacks are
//! then invoked from the runtime's worker threads. `reelvault_cancel` and
//! `reelvault_controller_free` block the calling thread until the transfer
//! has stopped. None of these may be called from inside a Tokio runtime.

use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::panic::AssertUnwindSafe;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use tokio::runtime::Runtime;

use crate::{
    DownloadRequest, Error, Progress, TaskSnapshot, TransferConfig, TransferController,
    TransferObserver, TransferOutcome, TransferRequest, TransferState, UploadRequest, UploadTarget,
};

// Thread-local storage for the last error message, read back through
// `reelvault_last_error_message()`.
thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_last_error(msg: String) {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = Some(msg);
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = None;
    });
}

/// Global async runtime for C FFI calls.
///
/// If it cannot be created, every call returns `UnknownError` instead of
/// panicking across the FFI boundary.
static RUNTIME: Lazy<Option<Runtime>> = Lazy::new(|| Runtime::new().ok());

fn get_runtime() -> Option<&'static Runtime> {
    match RUNTIME.as_ref() {
        Some(rt) => Some(rt),
        None => {
            set_last_error("Failed to initialize async runtime".to_string());
            None
        }
    }
}

/// Result codes for C FFI
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReelvaultResult {
    Success = 0,
    InvalidParameter = 1,
    NetworkError = 2,
    IoError = 3,
    Busy = 4,
    UnknownError = 5,
}

/// Transfer state as seen from C
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReelvaultState {
    Idle = 0,
    Running = 1,
    Cancelling = 2,
    Completed = 3,
    Failed = 4,
    Cancelled = 5,
}

impl From<TransferState> for ReelvaultState {
    fn from(state: TransferState) -> Self {
        match state {
            TransferState::Idle => ReelvaultState::Idle,
            TransferState::Running => ReelvaultState::Running,
            TransferState::Cancelling => ReelvaultState::Cancelling,
            TransferState::Completed => ReelvaultState::Completed,
            TransferState::Failed => ReelvaultState::Failed,
            TransferState::Cancelled => ReelvaultState::Cancelled,
        }
    }
}

/// Progress callback: `percent` is `-1` while the total size is unknown, in
/// which case `transferred` carries the raw byte count
pub type ProgressCallback = extern "C" fn(percent: i32, transferred: u64, user_data: *mut c_void);

/// Terminal callback: `reason` is NULL unless the transfer failed and is
/// only valid for the duration of the call; `total` is `-1` if never known
pub type TerminalCallback = extern "C" fn(
    state: ReelvaultState,
    transferred: u64,
    total: i64,
    reason: *const c_char,
    user_data: *mut c_void,
);

#[derive(Clone, Copy)]
struct Callbacks {
    progress: Option<ProgressCallback>,
    terminal: Option<TerminalCallback>,
    // address only, so the observer stays Send + Sync
    user_data: usize,
}

/// Forwards events to the callbacks of the current transfer
#[derive(Default)]
struct CallbackObserver {
    current: Mutex<Option<Callbacks>>,
}

impl CallbackObserver {
    fn set(&self, callbacks: Callbacks) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(callbacks);
    }

    fn get(&self) -> Option<Callbacks> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransferObserver for CallbackObserver {
    fn on_progress(&self, progress: Progress) {
        let Some(callbacks) = self.get() else { return };
        let Some(callback) = callbacks.progress else { return };
        let (percent, transferred) = match progress {
            Progress::Percent(pct) => (i32::from(pct), 0),
            Progress::Bytes(bytes) => (-1, bytes),
        };
        callback(percent, transferred, callbacks.user_data as *mut c_void);
    }

    fn on_terminal(&self, outcome: &TransferOutcome, snapshot: &TaskSnapshot) {
        let Some(callbacks) = self.get() else { return };
        let Some(callback) = callbacks.terminal else { return };
        let reason = match outcome {
            TransferOutcome::Failed { reason } => CString::new(reason.replace('\0', " ")).ok(),
            _ => None,
        };
        callback(
            snapshot.state.into(),
            snapshot.transferred_bytes,
            snapshot.total_bytes,
            reason.as_ref().map_or(ptr::null(), |r| r.as_ptr()),
            callbacks.user_data as *mut c_void,
        );
    }
}

/// Opaque controller handle for C
pub struct ReelvaultController {
    controller: TransferController,
    observer: Arc<CallbackObserver>,
}

/// Convert a Rust error to a C result code, keeping its message for
/// `reelvault_last_error_message()`.
fn convert_error(err: &Error) -> ReelvaultResult {
    set_last_error(err.to_string());
    match err {
        Error::InvalidInput(_) => ReelvaultResult::InvalidParameter,
        Error::NetworkError(_) | Error::HttpError(_) | Error::ProtocolViolation(_) => {
            ReelvaultResult::NetworkError
        }
        Error::SinkError(_) | Error::SourceError(_) | Error::IoError(_) => ReelvaultResult::IoError,
        Error::TransferFailed(_) | Error::Cancelled { .. } => ReelvaultResult::UnknownError,
    }
}

/// Run `f`, turning a panic into `UnknownError` so it never unwinds into C.
fn guarded(name: &str, f: impl FnOnce() -> ReelvaultResult) -> ReelvaultResult {
    std::panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        set_last_error(format!("internal panic caught in {name}"));
        ReelvaultResult::UnknownError
    })
}

/// Borrow a C string parameter as UTF-8.
///
/// # Safety
///
/// `ptr` must be NULL or a valid null-terminated C string that outlives `'a`.
unsafe fn str_arg<'a>(name: &str, ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        set_last_error(format!("{name} parameter is NULL"));
        return None;
    }
    match unsafe { CStr::from_ptr(ptr) }.to_str() {
        Ok(s) => Some(s),
        Err(_) => {
            set_last_error(format!("{name} parameter is not valid UTF-8"));
            None
        }
    }
}

/// # Safety
///
/// `handle` must be NULL or a live pointer from `reelvault_controller_new()`.
unsafe fn controller_ref<'a>(handle: *mut ReelvaultController) -> Option<&'a ReelvaultController> {
    if handle.is_null() {
        set_last_error("controller handle is NULL".to_string());
        None
    } else {
        Some(unsafe { &*handle })
    }
}

/// Get the last error message from the most recent FFI call on this thread.
///
/// Returns a string that must be freed with `reelvault_free_string()`, or
/// NULL if no error has occurred.
#[no_mangle]
pub extern "C" fn reelvault_last_error_message() -> *mut c_char {
    LAST_ERROR.with(|cell| {
        let borrow = cell.borrow();
        match borrow.as_ref() {
            Some(msg) => match CString::new(msg.as_str()) {
                Ok(c_string) => c_string.into_raw(),
                Err(_) => ptr::null_mut(),
            },
            None => ptr::null_mut(),
        }
    })
}

/// Create a controller
///
/// # Parameters
/// - `chunk_size`: Buffer and chunk size in bytes, or 0 for the default (1 MiB)
///
/// # Returns
/// Controller handle, or NULL on error
#[no_mangle]
pub extern "C" fn reelvault_controller_new(chunk_size: u64) -> *mut ReelvaultController {
    let result = std::panic::catch_unwind(|| {
        let rt = get_runtime()?;
        let mut config = TransferConfig::default();
        if chunk_size > 0 {
            config.chunk_size = usize::try_from(chunk_size).ok()?;
        }

        let _guard = rt.enter();
        let observer = Arc::new(CallbackObserver::default());
        match TransferController::new(config, observer.clone()) {
            Ok(controller) => {
                clear_last_error();
                Some(Box::into_raw(Box::new(ReelvaultController { controller, observer })))
            }
            Err(e) => {
                convert_error(&e);
                None
            }
        }
    });

    match result {
        Ok(Some(handle)) => handle,
        _ => ptr::null_mut(),
    }
}

/// Cancel any active transfer and release the controller
///
/// # Safety
///
/// `handle` must be NULL or a pointer from `reelvault_controller_new()` that
/// has not been freed yet. It is invalid after this call.
#[no_mangle]
pub unsafe extern "C" fn reelvault_controller_free(handle: *mut ReelvaultController) {
    if handle.is_null() {
        return;
    }
    let handle = unsafe { Box::from_raw(handle) };
    guarded("reelvault_controller_free", || {
        if let Some(rt) = get_runtime() {
            rt.block_on(handle.controller.shutdown());
        }
        ReelvaultResult::Success
    });
}

fn start(handle: &ReelvaultController, request: TransferRequest, callbacks: Callbacks) -> ReelvaultResult {
    let Some(rt) = get_runtime() else {
        return ReelvaultResult::UnknownError;
    };
    if handle.controller.state().is_active() {
        set_last_error("a transfer is already active".to_string());
        return ReelvaultResult::Busy;
    }
    handle.observer.set(callbacks);

    match rt.block_on(handle.controller.start(request)) {
        Ok(true) => {
            clear_last_error();
            ReelvaultResult::Success
        }
        Ok(false) => {
            set_last_error("a transfer is already active".to_string());
            ReelvaultResult::Busy
        }
        Err(e) => convert_error(&e),
    }
}

/// Start a download in the background
///
/// # Parameters
/// - `handle`: Controller
/// - `url`: Resource URL (null-terminated string)
/// - `dest_path`: Destination file path (null-terminated string)
/// - `resume_from`: Bytes of `dest_path` already downloaded, 0 for a fresh download
/// - `progress_callback`: Optional progress callback function
/// - `terminal_callback`: Optional terminal callback function
/// - `user_data`: User data pointer passed to the callbacks
///
/// # Returns
/// ReelvaultResult code; `Busy` if a transfer is already active
///
/// # Safety
///
/// - `handle` must be a live pointer from `reelvault_controller_new()`, or NULL.
/// - `url` and `dest_path` must be valid, null-terminated C strings or NULL.
/// - `user_data` must stay valid until the terminal callback has been called.
/// - The callbacks must be safe to call from any thread.
#[no_mangle]
pub unsafe extern "C" fn reelvault_start_download(
    handle: *mut ReelvaultController,
    url: *const c_char,
    dest_path: *const c_char,
    resume_from: u64,
    progress_callback: Option<ProgressCallback>,
    terminal_callback: Option<TerminalCallback>,
    user_data: *mut c_void,
) -> ReelvaultResult {
    guarded("reelvault_start_download", || {
        let (Some(handle), Some(url), Some(dest)) = (
            unsafe { controller_ref(handle) },
            unsafe { str_arg("url", url) },
            unsafe { str_arg("dest_path", dest_path) },
        ) else {
            return ReelvaultResult::InvalidParameter;
        };

        let request = DownloadRequest::new(url, dest).resume_from(resume_from);
        let callbacks = Callbacks {
            progress: progress_callback,
            terminal: terminal_callback,
            user_data: user_data as usize,
        };
        start(handle, request.into(), callbacks)
    })
}

/// Start an upload in the background
///
/// # Parameters
/// - `handle`: Controller
/// - `source_path`: File to upload (null-terminated string)
/// - `endpoint`: Chunk endpoint URL (null-terminated string)
/// - `session_id`: Session key of the signed-in user (null-terminated string)
/// - `chat_id`: Destination channel id (null-terminated string)
/// - `progress_callback`, `terminal_callback`, `user_data`: as for downloads
///
/// # Safety
///
/// Same requirements as `reelvault_start_download()`.
#[no_mangle]
pub unsafe extern "C" fn reelvault_start_upload(
    handle: *mut ReelvaultController,
    source_path: *const c_char,
    endpoint: *const c_char,
    session_id: *const c_char,
    chat_id: *const c_char,
    progress_callback: Option<ProgressCallback>,
    terminal_callback: Option<TerminalCallback>,
    user_data: *mut c_void,
) -> ReelvaultResult {
    guarded("reelvault_start_upload", || {
        let Some(handle) = (unsafe { controller_ref(handle) }) else {
            return ReelvaultResult::InvalidParameter;
        };
        let (Some(source), Some(endpoint), Some(session_id), Some(chat_id)) = (
            unsafe { str_arg("source_path", source_path) },
            unsafe { str_arg("endpoint", endpoint) },
            unsafe { str_arg("session_id", session_id) },
            unsafe { str_arg("chat_id", chat_id) },
        ) else {
            return ReelvaultResult::InvalidParameter;
        };

        let target = UploadTarget::new(endpoint, session_id, chat_id);
        let callbacks = Callbacks {
            progress: progress_callback,
            terminal: terminal_callback,
            user_data: user_data as usize,
        };
        start(handle, UploadRequest::new(source, target).into(), callbacks)
    })
}

/// Cancel the active transfer; returns once it has stopped
///
/// # Safety
///
/// `handle` must be a live pointer from `reelvault_controller_new()`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn reelvault_cancel(handle: *mut ReelvaultController) -> ReelvaultResult {
    guarded("reelvault_cancel", || {
        let Some(handle) = (unsafe { controller_ref(handle) }) else {
            return ReelvaultResult::InvalidParameter;
        };
        let Some(rt) = get_runtime() else {
            return ReelvaultResult::UnknownError;
        };
        rt.block_on(handle.controller.cancel());
        clear_last_error();
        ReelvaultResult::Success
    })
}

/// Current state of the active or last transfer
///
/// # Safety
///
/// `handle` must be a live pointer from `reelvault_controller_new()`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn reelvault_state(handle: *mut ReelvaultController) -> ReelvaultState {
    match unsafe { controller_ref(handle) } {
        Some(handle) => handle.controller.state().into(),
        None => ReelvaultState::Idle,
    }
}

/// Snapshot of the active or last transfer as JSON
///
/// # Returns
/// Allocated string that must be freed with `reelvault_free_string()`, or
/// NULL if no transfer was started
///
/// # Safety
///
/// `handle` must be a live pointer from `reelvault_controller_new()`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn reelvault_snapshot_json(handle: *mut ReelvaultController) -> *mut c_char {
    let Some(snapshot) = (unsafe { controller_ref(handle) }).and_then(|h| h.controller.snapshot()) else {
        return ptr::null_mut();
    };
    serde_json::to_string(&snapshot)
        .ok()
        .and_then(|json| CString::new(json).ok())
        .map_or(ptr::null_mut(), CString::into_raw)
}

/// Get the local file name a download URL resolves to
///
/// # Returns
/// Allocated string that must be freed with `reelvault_free_string()`, or NULL on error
///
/// # Safety
///
/// `url` must be a valid, null-terminated C string or NULL.
#[no_mangle]
pub unsafe extern "C" fn reelvault_get_filename(url: *const c_char) -> *mut c_char {
    let Some(url) = (unsafe { str_arg("url", url) }) else {
        return ptr::null_mut();
    };

    let filename = crate::core::resolve_output_filename(url);

    match CString::new(filename) {
        Ok(c_string) => c_string.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Free a string allocated by the library
///
/// # Safety
///
/// `ptr` must be NULL or a string returned by this library that has not
/// been freed yet.
#[no_mangle]
pub unsafe extern "C" fn reelvault_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            drop(CString::from_raw(ptr));
        }
    }
}

/// Get library version string
///
/// # Returns
/// Static string with version information (does not need to be freed)
#[no_mangle]
pub extern "C" fn reelvault_version() -> *const c_char {
    use std::sync::OnceLock;
    static VERSION_STRING: OnceLock<CString> = OnceLock::new();

    VERSION_STRING
        .get_or_init(|| CString::new(format!("reelvault {}", env!("REELVAULT_VERSION"))).unwrap_or_default())
        .as_ptr()
}

/// Initialize the library (optional, called automatically)
#[no_mangle]
pub extern "C" fn reelvault_init() -> ReelvaultResult {
    match get_runtime() {
        Some(_) => ReelvaultResult::Success,
        None => ReelvaultResult::UnknownError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recorded {
        last_percent: AtomicI32,
        terminals: AtomicU32,
        transferred: AtomicU64,
    }

    extern "C" fn on_progress(percent: i32, _transferred: u64, user_data: *mut c_void) {
        let recorded = unsafe { &*(user_data as *const Recorded) };
        recorded.last_percent.store(percent, Ordering::SeqCst);
    }

    extern "C" fn on_terminal(
        _state: ReelvaultState,
        transferred: u64,
        _total: i64,
        _reason: *const c_char,
        user_data: *mut c_void,
    ) {
        let recorded = unsafe { &*(user_data as *const Recorded) };
        recorded.transferred.store(transferred, Ordering::SeqCst);
        recorded.terminals.fetch_add(1, Ordering::SeqCst);
    }

    fn last_error() -> String {
        let msg = reelvault_last_error_message();
        assert!(!msg.is_null());
        let text = unsafe { CStr::from_ptr(msg) }.to_str().unwrap().to_string();
        unsafe { reelvault_free_string(msg) };
        text
    }

    #[test]
    fn test_reelvault_version() {
        let version = reelvault_version();
        let version_str = unsafe { CStr::from_ptr(version) }.to_str().unwrap();
        assert!(version_str.contains("reelvault"));
        assert!(version_str.contains(env!("REELVAULT_VERSION")));
    }

    #[test]
    fn test_reelvault_get_filename() {
        let url = CString::new("https://host:10000/video?file_id=9&session_id=1").unwrap();
        let filename_ptr = unsafe { reelvault_get_filename(url.as_ptr()) };
        assert!(!filename_ptr.is_null());

        let filename = unsafe { CStr::from_ptr(filename_ptr) }.to_str().unwrap();
        assert_eq!(filename, "video-9.mp4");

        unsafe { reelvault_free_string(filename_ptr) };
    }

    #[test]
    fn test_reelvault_init() {
        assert_eq!(reelvault_init(), ReelvaultResult::Success);
    }

    #[test]
    fn test_invalid_parameters() {
        let result = unsafe {
            reelvault_start_download(
                ptr::null_mut(),
                ptr::null(),
                ptr::null(),
                0,
                None,
                None,
                ptr::null_mut(),
            )
        };
        assert_eq!(result, ReelvaultResult::InvalidParameter);
        assert!(last_error().contains("NULL"));
        assert_eq!(unsafe { reelvault_state(ptr::null_mut()) }, ReelvaultState::Idle);
        assert_eq!(unsafe { reelvault_cancel(ptr::null_mut()) }, ReelvaultResult::InvalidParameter);
    }

    #[test]
    fn test_idle_controller() {
        let handle = reelvault_controller_new(0);
        assert!(!handle.is_null());
        unsafe {
            assert_eq!(reelvault_state(handle), ReelvaultState::Idle);
            assert_eq!(reelvault_cancel(handle), ReelvaultResult::Success);
            assert!(reelvault_snapshot_json(handle).is_null());

            let url = CString::new("ftp://example.org/a").unwrap();
            let dest = CString::new("/tmp/reelvault-never-written.mp4").unwrap();
            let result = reelvault_start_download(handle, url.as_ptr(), dest.as_ptr(), 0, None, None, ptr::null_mut());
            assert_eq!(result, ReelvaultResult::InvalidParameter);
            assert!(last_error().contains("unsupported URL scheme"));
            reelvault_controller_free(handle);
        }
    }

    #[test]
    fn test_download_with_callbacks() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let rt = get_runtime().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(
                    ResponseTemplate::new(206)
                        .insert_header("Content-Range", "bytes 0-4/5")
                        .set_body_bytes(b"hello".to_vec()),
                )
                .mount(&server)
                .await;
            server
        });

        let dir = tempfile::tempdir().unwrap();
        let dest_path = dir.path().join("hello.mp4");
        let url = CString::new(format!("{}/video", server.uri())).unwrap();
        let dest = CString::new(dest_path.to_str().unwrap()).unwrap();
        let recorded = Recorded::default();

        let handle = reelvault_controller_new(0);
        let result = unsafe {
            reelvault_start_download(
                handle,
                url.as_ptr(),
                dest.as_ptr(),
                0,
                Some(on_progress),
                Some(on_terminal),
                &recorded as *const Recorded as *mut c_void,
            )
        };
        assert_eq!(result, ReelvaultResult::Success);

        let deadline = Instant::now() + Duration::from_secs(5);
        while recorded.terminals.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(unsafe { reelvault_state(handle) }, ReelvaultState::Completed);
        assert_eq!(recorded.terminals.load(Ordering::SeqCst), 1);
        assert_eq!(recorded.transferred.load(Ordering::SeqCst), 5);
        assert_eq!(recorded.last_percent.load(Ordering::SeqCst), 100);
        assert_eq!(std::fs::read(&dest_path).unwrap(), b"hello");

        unsafe {
            let json = reelvault_snapshot_json(handle);
            let json_str = CStr::from_ptr(json).to_str().unwrap();
            assert!(json_str.contains("\"state\":\"completed\""));
            reelvault_free_string(json);
            reelvault_controller_free(handle);
        }

        let _guard = rt.enter();
        drop(server);
    }
}
