//! COM callback objects handed to the engine.
//!
//! Both objects are owned by [`DbgEngClient`](super::DbgEngClient) and
//! outlive their registration with the engine; their reference counts are
//! tracked but never free anything.

use std::cell::{Cell, RefCell};
use std::ffi::{c_char, c_void, CStr};
use std::ptr::NonNull;

use windows_sys::core::{GUID, HRESULT};

use super::com::{guid_eq, vtable_entry, IID_IDEBUG_EVENT_CALLBACKS, IID_IDEBUG_OUTPUT_CALLBACKS, IID_IUNKNOWN};
use crate::engine::{BreakpointHandle, EventCallbacks, ExecutionStatus, OutputSink};
use crate::error::EngineStatus;
use crate::events::{EventMask, EventType, ExceptionRecord, EXCEPTION_RECORD_SIZE};

type Unknown = *mut c_void;

unsafe extern "system" fn add_ref<T: Counted>(this: Unknown) -> u32
{
    // SAFETY: the engine only calls this with the object it was given.
    unsafe { &*(this as *const T) }.refs().add()
}

unsafe extern "system" fn release<T: Counted>(this: Unknown) -> u32
{
    // SAFETY: as for `add_ref`.
    unsafe { &*(this as *const T) }.refs().release()
}

unsafe extern "system" fn query_interface<T: Counted>(this: Unknown, iid: *const GUID, out: *mut Unknown) -> HRESULT
{
    if out.is_null() || iid.is_null() {
        return EngineStatus::INVALID_ARG.raw();
    }
    // SAFETY: both pointers were checked above and come from the engine.
    unsafe {
        if guid_eq(&*iid, &IID_IUNKNOWN) || guid_eq(&*iid, T::IID) {
            *out = this;
            (*(this as *const T)).refs().add();
            EngineStatus::OK.raw()
        } else {
            *out = std::ptr::null_mut();
            EngineStatus::NO_INTERFACE.raw()
        }
    }
}

#[derive(Debug)]
struct RefCount(Cell<u32>);

impl RefCount
{
    fn add(&self) -> u32
    {
        self.0.set(self.0.get() + 1);
        self.0.get()
    }

    fn release(&self) -> u32
    {
        self.0.set(self.0.get().saturating_sub(1));
        self.0.get()
    }
}

trait Counted
{
    const IID: &'static GUID;
    fn refs(&self) -> &RefCount;
}

// --- event callbacks ---

#[repr(C)]
struct EventCallbacksVtbl
{
    query_interface: unsafe extern "system" fn(Unknown, *const GUID, *mut Unknown) -> HRESULT,
    add_ref: unsafe extern "system" fn(Unknown) -> u32,
    release: unsafe extern "system" fn(Unknown) -> u32,
    get_interest_mask: unsafe extern "system" fn(Unknown, *mut u32) -> HRESULT,
    breakpoint: unsafe extern "system" fn(Unknown, Unknown) -> HRESULT,
    exception: unsafe extern "system" fn(Unknown, *const u8, u32) -> HRESULT,
    create_thread: unsafe extern "system" fn(Unknown, u64, u64, u64) -> HRESULT,
    exit_thread: unsafe extern "system" fn(Unknown, u32) -> HRESULT,
    #[allow(clippy::type_complexity)]
    create_process: unsafe extern "system" fn(
        Unknown,
        u64,
        u64,
        u64,
        u32,
        *const c_char,
        *const c_char,
        u32,
        u32,
        u64,
        u64,
        u64,
    ) -> HRESULT,
    exit_process: unsafe extern "system" fn(Unknown, u32) -> HRESULT,
    load_module:
        unsafe extern "system" fn(Unknown, u64, u64, u32, *const c_char, *const c_char, u32, u32) -> HRESULT,
    unload_module: unsafe extern "system" fn(Unknown, *const c_char, u64) -> HRESULT,
    system_error: unsafe extern "system" fn(Unknown, u32, u32) -> HRESULT,
    session_status: unsafe extern "system" fn(Unknown, u32) -> HRESULT,
    change_debuggee_state: unsafe extern "system" fn(Unknown, u32, u64) -> HRESULT,
    change_engine_state: unsafe extern "system" fn(Unknown, u32, u64) -> HRESULT,
    change_symbol_state: unsafe extern "system" fn(Unknown, u32, u64) -> HRESULT,
}

/// `IDebugEventCallbacks` implementation forwarding to the [`EventCallbacks`]
/// of the wait in progress.
#[repr(C)]
pub(super) struct EventCallbackObject
{
    vtable: &'static EventCallbacksVtbl,
    refs: RefCount,
    interest: EventMask,
    target: Cell<Option<NonNull<dyn EventCallbacks>>>,
}

impl Counted for EventCallbackObject
{
    const IID: &'static GUID = &IID_IDEBUG_EVENT_CALLBACKS;

    fn refs(&self) -> &RefCount
    {
        &self.refs
    }
}

static EVENT_CALLBACKS_VTBL: EventCallbacksVtbl = EventCallbacksVtbl {
    query_interface: query_interface::<EventCallbackObject>,
    add_ref: add_ref::<EventCallbackObject>,
    release: release::<EventCallbackObject>,
    get_interest_mask: event_interest_mask,
    breakpoint: event_breakpoint,
    exception: event_exception,
    create_thread: event_create_thread,
    exit_thread: event_exit_thread,
    create_process: event_create_process,
    exit_process: event_exit_process,
    load_module: event_load_module,
    unload_module: event_unload_module,
    system_error: event_system_error,
    session_status: event_session_status,
    change_debuggee_state: event_change_debuggee_state,
    change_engine_state: event_change_engine_state,
    change_symbol_state: event_change_symbol_state,
};

impl EventCallbackObject
{
    pub(super) fn new(interest: EventMask) -> Box<Self>
    {
        Box::new(Self {
            vtable: &EVENT_CALLBACKS_VTBL,
            refs: RefCount(Cell::new(1)),
            interest,
            target: Cell::new(None),
        })
    }

    pub(super) fn as_com(&self) -> Unknown
    {
        self as *const Self as Unknown
    }

    /// Route callbacks to `callbacks` until the returned guard is dropped.
    pub(super) fn route<'a>(&'a self, callbacks: &'a mut dyn EventCallbacks) -> RouteGuard<'a>
    {
        let target: NonNull<dyn EventCallbacks + 'a> = NonNull::from(callbacks);
        // SAFETY: only the lifetime bound is erased. The guard clears the
        // pointer before `'a` ends, and the engine only calls back while the
        // wait that created the guard is running.
        let target: NonNull<dyn EventCallbacks> = unsafe { std::mem::transmute(target) };
        self.target.set(Some(target));
        RouteGuard { object: self }
    }

    /// Run `deliver` against the active target, or answer "no change".
    ///
    /// ## Safety
    ///
    /// `this` must be a live `EventCallbackObject`.
    unsafe fn dispatch(this: Unknown, deliver: impl FnOnce(&mut dyn EventCallbacks) -> ExecutionStatus) -> HRESULT
    {
        // SAFETY: guaranteed by the caller.
        let object = unsafe { &*(this as *const Self) };
        let Some(mut target) = object.target.take() else {
            return ExecutionStatus::NoChange.raw() as HRESULT;
        };
        // SAFETY: the target is live while routed (see `route`), and taking it
        // out of the cell keeps nested callbacks from aliasing it.
        let status = deliver(unsafe { target.as_mut() });
        object.target.set(Some(target));
        status.raw() as HRESULT
    }
}

/// Clears the routed callbacks when dropped.
pub(super) struct RouteGuard<'a>
{
    object: &'a EventCallbackObject,
}

impl Drop for RouteGuard<'_>
{
    fn drop(&mut self)
    {
        self.object.target.set(None);
    }
}

unsafe extern "system" fn event_interest_mask(this: Unknown, mask: *mut u32) -> HRESULT
{
    if mask.is_null() {
        return EngineStatus::INVALID_ARG.raw();
    }
    // SAFETY: `this` is the object given to the engine; `mask` was checked.
    unsafe {
        *mask = (*(this as *const EventCallbackObject)).interest.raw();
    }
    EngineStatus::OK.raw()
}

unsafe extern "system" fn event_breakpoint(this: Unknown, breakpoint: Unknown) -> HRESULT
{
    let handle = BreakpointHandle(breakpoint as u64);
    // SAFETY: `this` is the object given to the engine.
    unsafe { EventCallbackObject::dispatch(this, |callbacks| callbacks.breakpoint(handle)) }
}

unsafe extern "system" fn event_exception(this: Unknown, record: *const u8, first_chance: u32) -> HRESULT
{
    if record.is_null() {
        return ExecutionStatus::NoChange.raw() as HRESULT;
    }
    // SAFETY: the engine passes a full EXCEPTION_RECORD64.
    let bytes = unsafe { std::slice::from_raw_parts(record, EXCEPTION_RECORD_SIZE) };
    let record = ExceptionRecord::from_record_bytes(bytes, first_chance != 0);
    // SAFETY: `this` is the object given to the engine.
    unsafe { EventCallbackObject::dispatch(this, |callbacks| callbacks.exception(&record)) }
}

/// ## Safety
///
/// `this` must be a live `EventCallbackObject`.
unsafe fn other(this: Unknown, event: EventType) -> HRESULT
{
    // SAFETY: guaranteed by the caller.
    unsafe { EventCallbackObject::dispatch(this, |callbacks| callbacks.other(event)) }
}

unsafe extern "system" fn event_create_thread(this: Unknown, _handle: u64, _data: u64, _start: u64) -> HRESULT
{
    // SAFETY: `this` is the object given to the engine.
    unsafe { other(this, EventType::CreateThread) }
}

unsafe extern "system" fn event_exit_thread(this: Unknown, _exit_code: u32) -> HRESULT
{
    // SAFETY: as above.
    unsafe { other(this, EventType::ExitThread) }
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn event_create_process(
    this: Unknown,
    _image_file: u64,
    _handle: u64,
    _base: u64,
    _size: u32,
    _module_name: *const c_char,
    _image_name: *const c_char,
    _checksum: u32,
    _timestamp: u32,
    _initial_thread: u64,
    _thread_data: u64,
    _start: u64,
) -> HRESULT
{
    // SAFETY: as above.
    unsafe { other(this, EventType::CreateProcess) }
}

unsafe extern "system" fn event_exit_process(this: Unknown, _exit_code: u32) -> HRESULT
{
    // SAFETY: as above.
    unsafe { other(this, EventType::ExitProcess) }
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn event_load_module(
    this: Unknown,
    _image_file: u64,
    _base: u64,
    _size: u32,
    _module_name: *const c_char,
    _image_name: *const c_char,
    _checksum: u32,
    _timestamp: u32,
) -> HRESULT
{
    // SAFETY: as above.
    unsafe { other(this, EventType::LoadModule) }
}

unsafe extern "system" fn event_unload_module(this: Unknown, _image_name: *const c_char, _base: u64) -> HRESULT
{
    // SAFETY: as above.
    unsafe { other(this, EventType::UnloadModule) }
}

unsafe extern "system" fn event_system_error(this: Unknown, _error: u32, _level: u32) -> HRESULT
{
    // SAFETY: as above.
    unsafe { other(this, EventType::SystemError) }
}

unsafe extern "system" fn event_session_status(this: Unknown, _status: u32) -> HRESULT
{
    // SAFETY: as above.
    unsafe { other(this, EventType::SessionStatus) }
}

unsafe extern "system" fn event_change_debuggee_state(this: Unknown, _flags: u32, _argument: u64) -> HRESULT
{
    // SAFETY: as above.
    unsafe { other(this, EventType::ChangeDebuggeeState) }
}

unsafe extern "system" fn event_change_engine_state(this: Unknown, _flags: u32, _argument: u64) -> HRESULT
{
    // SAFETY: as above.
    unsafe { other(this, EventType::ChangeEngineState) }
}

unsafe extern "system" fn event_change_symbol_state(this: Unknown, _flags: u32, _argument: u64) -> HRESULT
{
    // SAFETY: as above.
    unsafe { other(this, EventType::ChangeSymbolState) }
}

// --- output callbacks ---

#[repr(C)]
struct OutputCallbacksVtbl
{
    query_interface: unsafe extern "system" fn(Unknown, *const GUID, *mut Unknown) -> HRESULT,
    add_ref: unsafe extern "system" fn(Unknown) -> u32,
    release: unsafe extern "system" fn(Unknown) -> u32,
    output: unsafe extern "system" fn(Unknown, u32, *const c_char) -> HRESULT,
}

/// `IDebugOutputCallbacks` implementation feeding an [`OutputSink`].
#[repr(C)]
pub(super) struct OutputCallbackObject
{
    vtable: &'static OutputCallbacksVtbl,
    refs: RefCount,
    sink: RefCell<OutputSink>,
}

impl Counted for OutputCallbackObject
{
    const IID: &'static GUID = &IID_IDEBUG_OUTPUT_CALLBACKS;

    fn refs(&self) -> &RefCount
    {
        &self.refs
    }
}

static OUTPUT_CALLBACKS_VTBL: OutputCallbacksVtbl = OutputCallbacksVtbl {
    query_interface: query_interface::<OutputCallbackObject>,
    add_ref: add_ref::<OutputCallbackObject>,
    release: release::<OutputCallbackObject>,
    output: output_text,
};

impl OutputCallbackObject
{
    pub(super) fn new(sink: OutputSink) -> Box<Self>
    {
        Box::new(Self {
            vtable: &OUTPUT_CALLBACKS_VTBL,
            refs: RefCount(Cell::new(1)),
            sink: RefCell::new(sink),
        })
    }

    pub(super) fn as_com(&self) -> Unknown
    {
        self as *const Self as Unknown
    }
}

unsafe extern "system" fn output_text(this: Unknown, mask: u32, text: *const c_char) -> HRESULT
{
    if text.is_null() {
        return EngineStatus::OK.raw();
    }
    // SAFETY: `this` is the object given to the engine and `text` is a
    // NUL-terminated string owned by the engine for the duration of the call.
    let (object, text) = unsafe { (&*(this as *const OutputCallbackObject), CStr::from_ptr(text)) };
    if let Ok(mut sink) = object.sink.try_borrow_mut() {
        sink(mask, &text.to_string_lossy());
    }
    EngineStatus::OK.raw()
}

/// Call `IDebugBreakpoint` method `ordinal` on a borrowed handle.
///
/// ## Safety
///
/// `handle` must be a live breakpoint issued by the engine and `F` the exact
/// type of the entry.
pub(super) unsafe fn breakpoint_method<F: Copy>(handle: BreakpointHandle, ordinal: usize) -> (Unknown, F)
{
    let object = handle.0 as Unknown;
    // SAFETY: guaranteed by the caller.
    (object, unsafe { vtable_entry(object, ordinal) })
}
