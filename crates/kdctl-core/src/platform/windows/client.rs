//! # DbgEng Client
//!
//! [`DebugEngine`] over the `dbgeng.dll` COM interfaces.
//!
//! One `IDebugClient` is created up front; the auxiliary interfaces
//! (`IDebugControl`, `IDebugRegisters`, `IDebugSymbols`, `IDebugDataSpaces`,
//! `IDebugSystemObjects`) are queried from it after the kernel attach, as the
//! engine only hands them out for an attached client.

use std::cell::{OnceCell, RefCell};
use std::ffi::{c_char, c_void, CString};
use std::fmt;
use std::ptr;

use tracing::{debug, trace};
use windows_sys::core::HRESULT;

use super::callbacks::{breakpoint_method, EventCallbackObject, OutputCallbackObject};
use super::com::{
    check_bool, ComPtr, IID_IDEBUG_CONTROL, IID_IDEBUG_DATA_SPACES, IID_IDEBUG_REGISTERS, IID_IDEBUG_SYMBOLS,
    IID_IDEBUG_SYSTEM_OBJECTS,
};
use crate::engine::{
    AttachMode, BreakpointHandle, BreakpointKind, DebugEngine, EndSessionMode, EventCallbacks, ExecutionStatus,
    InterruptKind, LastEventHeader, OutputSink,
};
use crate::error::{EngineResult, EngineStatus};
use crate::events::EventMask;
use crate::registers::DebugValue;
use crate::stack::RawStackFrame;

type This = *mut c_void;

/// `DEBUG_OUTCTL_THIS_CLIENT`
const OUTPUT_THIS_CLIENT: u32 = 0;
/// `DEBUG_REGISTERS_DEFAULT`
const REGISTERS_DEFAULT: u32 = 0;
/// `DEBUG_WAIT_DEFAULT`
const WAIT_DEFAULT: u32 = 0;

// IDebugClient
const CLIENT_ATTACH_KERNEL: usize = 3;
const CLIENT_END_SESSION: usize = 26;
const CLIENT_SET_OUTPUT_CALLBACKS: usize = 34;
const CLIENT_SET_EVENT_CALLBACKS: usize = 46;

// IDebugControl
const CONTROL_SET_INTERRUPT: usize = 4;
const CONTROL_GET_STACK_TRACE: usize = 31;
const CONTROL_OUTPUT_STACK_TRACE: usize = 33;
const CONTROL_IS_POINTER_64BIT: usize = 42;
const CONTROL_GET_EXECUTION_STATUS: usize = 49;
const CONTROL_SET_EXECUTION_STATUS: usize = 50;
const CONTROL_ADD_BREAKPOINT: usize = 72;
const CONTROL_REMOVE_BREAKPOINT: usize = 73;
const CONTROL_WAIT_FOR_EVENT: usize = 93;
const CONTROL_GET_LAST_EVENT_INFORMATION: usize = 94;

// IDebugRegisters
const REGISTERS_GET_NUMBER: usize = 3;
const REGISTERS_GET_DESCRIPTION: usize = 4;
const REGISTERS_GET_INDEX_BY_NAME: usize = 5;
const REGISTERS_GET_VALUE: usize = 6;
const REGISTERS_SET_VALUE: usize = 7;
const REGISTERS_OUTPUT: usize = 10;

// IDebugSystemObjects
const SYSTEM_GET_CURRENT_THREAD_DATA_OFFSET: usize = 13;
const SYSTEM_GET_CURRENT_PROCESS_DATA_OFFSET: usize = 23;
const SYSTEM_GET_CURRENT_PROCESS_PEB: usize = 25;

// IDebugBreakpoint
const BREAKPOINT_GET_ID: usize = 3;
const BREAKPOINT_ADD_FLAGS: usize = 7;
const BREAKPOINT_SET_OFFSET: usize = 11;

// IDebugSymbols
const SYMBOLS_SET_OPTIONS: usize = 6;
const SYMBOLS_GET_NAME_BY_OFFSET: usize = 7;
const SYMBOLS_SET_PATH: usize = 41;

// IDebugDataSpaces
const DATA_READ_VIRTUAL: usize = 3;
const DATA_WRITE_VIRTUAL: usize = 4;

type U32Fn = unsafe extern "system" fn(This, u32) -> HRESULT;
type OutU32Fn = unsafe extern "system" fn(This, *mut u32) -> HRESULT;
type OutU64Fn = unsafe extern "system" fn(This, *mut u64) -> HRESULT;
type PtrFn = unsafe extern "system" fn(This, *mut c_void) -> HRESULT;
type StrFn = unsafe extern "system" fn(This, *const c_char) -> HRESULT;

struct Interfaces
{
    control: ComPtr,
    registers: ComPtr,
    symbols: ComPtr,
    data: ComPtr,
    system: ComPtr,
}

/// Native engine client backed by `dbgeng.dll`.
pub struct DbgEngClient
{
    // Field order matters: interfaces are released before the client.
    interfaces: OnceCell<Interfaces>,
    client: ComPtr,
    events: RefCell<Option<Box<EventCallbackObject>>>,
    output: RefCell<Option<Box<OutputCallbackObject>>>,
}

impl fmt::Debug for DbgEngClient
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("DbgEngClient")
            .field("client", &self.client)
            .field("attached", &self.interfaces.get().is_some())
            .finish_non_exhaustive()
    }
}

fn c_string(text: &str) -> EngineResult<CString>
{
    CString::new(text).map_err(|_| EngineStatus::INVALID_ARG)
}

fn buffer_len(len: usize) -> EngineResult<u32>
{
    u32::try_from(len).map_err(|_| EngineStatus::INVALID_ARG)
}

impl DbgEngClient
{
    /// Create a fresh engine client.
    ///
    /// ## Errors
    ///
    /// The engine's status if `DebugCreate` fails.
    pub fn new() -> EngineResult<Self>
    {
        let client = ComPtr::create_client()?;
        debug!("Created DbgEng client");
        Ok(Self {
            interfaces: OnceCell::new(),
            client,
            events: RefCell::new(None),
            output: RefCell::new(None),
        })
    }

    fn interfaces(&self) -> EngineResult<&Interfaces>
    {
        self.interfaces.get().ok_or(EngineStatus::FAIL)
    }

    fn call_u32(&self, target: &ComPtr, ordinal: usize, value: u32) -> EngineResult<()>
    {
        // SAFETY: callers pass the ordinal of a `(ULONG)` method of `target`.
        let method: U32Fn = unsafe { target.method(ordinal) };
        EngineStatus::check(unsafe { method(target.as_raw(), value) })
    }

    fn out_u32(&self, target: &ComPtr, ordinal: usize) -> EngineResult<u32>
    {
        let mut value = 0;
        // SAFETY: callers pass the ordinal of a `(PULONG)` method of `target`.
        let method: OutU32Fn = unsafe { target.method(ordinal) };
        EngineStatus::check(unsafe { method(target.as_raw(), &mut value) })?;
        Ok(value)
    }

    fn out_u64(&self, target: &ComPtr, ordinal: usize) -> EngineResult<u64>
    {
        let mut value = 0;
        // SAFETY: callers pass the ordinal of a `(PULONG64)` method of `target`.
        let method: OutU64Fn = unsafe { target.method(ordinal) };
        EngineStatus::check(unsafe { method(target.as_raw(), &mut value) })?;
        Ok(value)
    }

    fn call_str(&self, target: &ComPtr, ordinal: usize, text: &str) -> EngineResult<()>
    {
        let text = c_string(text)?;
        // SAFETY: callers pass the ordinal of a `(PCSTR)` method of `target`.
        let method: StrFn = unsafe { target.method(ordinal) };
        EngineStatus::check(unsafe { method(target.as_raw(), text.as_ptr()) })
    }
}

impl Drop for DbgEngClient
{
    fn drop(&mut self)
    {
        // Unhook before the callback objects are freed.
        if self.events.get_mut().is_some() {
            // SAFETY: SetEventCallbacks(PDEBUG_EVENT_CALLBACKS), null unregisters.
            let method: PtrFn = unsafe { self.client.method(CLIENT_SET_EVENT_CALLBACKS) };
            let _ = unsafe { method(self.client.as_raw(), ptr::null_mut()) };
        }
        if self.output.get_mut().is_some() {
            // SAFETY: SetOutputCallbacks(PDEBUG_OUTPUT_CALLBACKS), null unregisters.
            let method: PtrFn = unsafe { self.client.method(CLIENT_SET_OUTPUT_CALLBACKS) };
            let _ = unsafe { method(self.client.as_raw(), ptr::null_mut()) };
        }
    }
}

impl DebugEngine for DbgEngClient
{
    fn attach_kernel(&self, mode: AttachMode, connection: &str) -> EngineResult<()>
    {
        let connection = c_string(connection)?;
        // SAFETY: AttachKernel(ULONG Flags, PCSTR ConnectOptions)
        let method: unsafe extern "system" fn(This, u32, *const c_char) -> HRESULT =
            unsafe { self.client.method(CLIENT_ATTACH_KERNEL) };
        EngineStatus::check(unsafe { method(self.client.as_raw(), mode.raw(), connection.as_ptr()) })
    }

    fn acquire_interfaces(&self) -> EngineResult<()>
    {
        let interfaces = Interfaces {
            control: self.client.query_interface(&IID_IDEBUG_CONTROL)?,
            registers: self.client.query_interface(&IID_IDEBUG_REGISTERS)?,
            symbols: self.client.query_interface(&IID_IDEBUG_SYMBOLS)?,
            data: self.client.query_interface(&IID_IDEBUG_DATA_SPACES)?,
            system: self.client.query_interface(&IID_IDEBUG_SYSTEM_OBJECTS)?,
        };
        // A second call keeps the first set.
        let _ = self.interfaces.set(interfaces);
        Ok(())
    }

    fn set_output_callbacks(&self, sink: Option<OutputSink>) -> EngineResult<()>
    {
        let object = sink.map(OutputCallbackObject::new);
        let raw = object.as_ref().map_or(ptr::null_mut(), |object| object.as_com());
        // SAFETY: SetOutputCallbacks(PDEBUG_OUTPUT_CALLBACKS)
        let method: PtrFn = unsafe { self.client.method(CLIENT_SET_OUTPUT_CALLBACKS) };
        EngineStatus::check(unsafe { method(self.client.as_raw(), raw) })?;
        *self.output.borrow_mut() = object;
        Ok(())
    }

    fn install_event_callbacks(&self, interest: EventMask) -> EngineResult<()>
    {
        let object = EventCallbackObject::new(interest);
        // SAFETY: SetEventCallbacks(PDEBUG_EVENT_CALLBACKS); the engine reads
        // the interest mask during this call.
        let method: PtrFn = unsafe { self.client.method(CLIENT_SET_EVENT_CALLBACKS) };
        EngineStatus::check(unsafe { method(self.client.as_raw(), object.as_com()) })?;
        *self.events.borrow_mut() = Some(object);
        Ok(())
    }

    fn end_session(&self, mode: EndSessionMode) -> EngineResult<()>
    {
        self.call_u32(&self.client, CLIENT_END_SESSION, mode.raw())
    }

    fn set_interrupt(&self, kind: InterruptKind) -> EngineResult<()>
    {
        self.call_u32(&self.interfaces()?.control, CONTROL_SET_INTERRUPT, kind.raw())
    }

    fn is_pointer_64bit(&self) -> EngineResult<bool>
    {
        let control = &self.interfaces()?.control;
        // SAFETY: IsPointer64Bit() answers S_OK or S_FALSE.
        let method: unsafe extern "system" fn(This) -> HRESULT = unsafe { control.method(CONTROL_IS_POINTER_64BIT) };
        check_bool(unsafe { method(control.as_raw()) })
    }

    fn execution_status(&self) -> EngineResult<u32>
    {
        self.out_u32(&self.interfaces()?.control, CONTROL_GET_EXECUTION_STATUS)
    }

    fn set_execution_status(&self, status: ExecutionStatus) -> EngineResult<()>
    {
        self.call_u32(&self.interfaces()?.control, CONTROL_SET_EXECUTION_STATUS, status.raw())
    }

    fn wait_for_event(&self, timeout_ms: u32, callbacks: Option<&mut dyn EventCallbacks>) -> EngineResult<()>
    {
        let control = &self.interfaces()?.control;
        let object = self.events.borrow().as_deref().map(|object| object as *const EventCallbackObject);
        // SAFETY: the boxed callback object is only replaced by
        // `install_event_callbacks`, which cannot run during this wait.
        let _route = match (object, callbacks) {
            (Some(object), Some(callbacks)) => Some(unsafe { &*object }.route(callbacks)),
            _ => None,
        };
        trace!(timeout_ms, "WaitForEvent");
        // SAFETY: WaitForEvent(ULONG Flags, ULONG Timeout)
        let method: unsafe extern "system" fn(This, u32, u32) -> HRESULT =
            unsafe { control.method(CONTROL_WAIT_FOR_EVENT) };
        EngineStatus::check(unsafe { method(control.as_raw(), WAIT_DEFAULT, timeout_ms) })
    }

    fn last_event_information(
        &self,
        extra: Option<&mut [u8]>,
        description: Option<&mut [u8]>,
    ) -> EngineResult<LastEventHeader>
    {
        let control = &self.interfaces()?.control;
        let (extra_ptr, extra_len) = match extra {
            Some(buffer) => (buffer.as_mut_ptr().cast::<c_void>(), buffer_len(buffer.len())?),
            None => (ptr::null_mut(), 0),
        };
        let (description_ptr, description_len) = match description {
            Some(buffer) => (buffer.as_mut_ptr().cast::<c_char>(), buffer_len(buffer.len())?),
            None => (ptr::null_mut(), 0),
        };
        let (mut event_type, mut process_id, mut thread_id, mut extra_used, mut description_used) = (0, 0, 0, 0, 0);

        type GetLastEventInformationFn = unsafe extern "system" fn(
            This,
            *mut u32,
            *mut u32,
            *mut u32,
            *mut c_void,
            u32,
            *mut u32,
            *mut c_char,
            u32,
            *mut u32,
        ) -> HRESULT;
        // SAFETY: every pointer is either null with a zero size or a live
        // buffer of the given size.
        let method: GetLastEventInformationFn = unsafe { control.method(CONTROL_GET_LAST_EVENT_INFORMATION) };
        EngineStatus::check(unsafe {
            method(
                control.as_raw(),
                &mut event_type,
                &mut process_id,
                &mut thread_id,
                extra_ptr,
                extra_len,
                &mut extra_used,
                description_ptr,
                description_len,
                &mut description_used,
            )
        })?;

        Ok(LastEventHeader {
            event_type,
            process_id,
            thread_id,
            extra_size: extra_used as usize,
            description_size: description_used as usize,
        })
    }

    fn stack_trace(&self, frames: &mut [RawStackFrame]) -> EngineResult<usize>
    {
        let control = &self.interfaces()?.control;
        let mut filled = 0u32;
        // SAFETY: GetStackTrace(ULONG64, ULONG64, ULONG64, PDEBUG_STACK_FRAME, ULONG, PULONG);
        // `RawStackFrame` has the engine's layout.
        let method: unsafe extern "system" fn(This, u64, u64, u64, *mut RawStackFrame, u32, *mut u32) -> HRESULT =
            unsafe { control.method(CONTROL_GET_STACK_TRACE) };
        EngineStatus::check(unsafe {
            method(
                control.as_raw(),
                0,
                0,
                0,
                frames.as_mut_ptr(),
                buffer_len(frames.len())?,
                &mut filled,
            )
        })?;
        Ok(filled as usize)
    }

    fn output_stack_trace(&self, frame_count: u32, flags: u32) -> EngineResult<()>
    {
        let control = &self.interfaces()?.control;
        // SAFETY: OutputStackTrace(ULONG, PDEBUG_STACK_FRAME, ULONG, ULONG); a
        // null frame array makes the engine walk the current stack itself.
        let method: unsafe extern "system" fn(This, u32, *const RawStackFrame, u32, u32) -> HRESULT =
            unsafe { control.method(CONTROL_OUTPUT_STACK_TRACE) };
        EngineStatus::check(unsafe { method(control.as_raw(), OUTPUT_THIS_CLIENT, ptr::null(), frame_count, flags) })
    }

    fn add_breakpoint(&self, kind: BreakpointKind, desired_id: u32) -> EngineResult<BreakpointHandle>
    {
        let control = &self.interfaces()?.control;
        let mut breakpoint: This = ptr::null_mut();
        // SAFETY: AddBreakpoint(ULONG Type, ULONG DesiredId, PDEBUG_BREAKPOINT* Bp)
        let method: unsafe extern "system" fn(This, u32, u32, *mut This) -> HRESULT =
            unsafe { control.method(CONTROL_ADD_BREAKPOINT) };
        EngineStatus::check(unsafe { method(control.as_raw(), kind.raw(), desired_id, &mut breakpoint) })?;
        if breakpoint.is_null() {
            return Err(EngineStatus::FAIL);
        }
        Ok(BreakpointHandle(breakpoint as u64))
    }

    fn remove_breakpoint(&self, handle: BreakpointHandle) -> EngineResult<()>
    {
        let control = &self.interfaces()?.control;
        // SAFETY: RemoveBreakpoint(PDEBUG_BREAKPOINT); the engine releases it.
        let method: PtrFn = unsafe { control.method(CONTROL_REMOVE_BREAKPOINT) };
        EngineStatus::check(unsafe { method(control.as_raw(), handle.0 as This) })
    }

    fn breakpoint_id(&self, handle: BreakpointHandle) -> EngineResult<u32>
    {
        let mut id = 0;
        // SAFETY: IDebugBreakpoint::GetId(PULONG) on a handle issued by this engine.
        let (object, method) = unsafe { breakpoint_method::<OutU32Fn>(handle, BREAKPOINT_GET_ID) };
        EngineStatus::check(unsafe { method(object, &mut id) })?;
        Ok(id)
    }

    fn set_breakpoint_offset(&self, handle: BreakpointHandle, offset: u64) -> EngineResult<()>
    {
        // SAFETY: IDebugBreakpoint::SetOffset(ULONG64)
        let (object, method) = unsafe {
            breakpoint_method::<unsafe extern "system" fn(This, u64) -> HRESULT>(handle, BREAKPOINT_SET_OFFSET)
        };
        EngineStatus::check(unsafe { method(object, offset) })
    }

    fn add_breakpoint_flags(&self, handle: BreakpointHandle, flags: u32) -> EngineResult<()>
    {
        // SAFETY: IDebugBreakpoint::AddFlags(ULONG)
        let (object, method) = unsafe { breakpoint_method::<U32Fn>(handle, BREAKPOINT_ADD_FLAGS) };
        EngineStatus::check(unsafe { method(object, flags) })
    }

    fn register_count(&self) -> EngineResult<u32>
    {
        self.out_u32(&self.interfaces()?.registers, REGISTERS_GET_NUMBER)
    }

    fn register_description(&self, index: u32, name: Option<&mut [u8]>) -> EngineResult<usize>
    {
        let registers = &self.interfaces()?.registers;
        let (buffer, len) = match name {
            Some(buffer) => (buffer.as_mut_ptr().cast::<c_char>(), buffer_len(buffer.len())?),
            None => (ptr::null_mut(), 0),
        };
        let mut size = 0u32;
        // SAFETY: GetDescription(ULONG, PSTR, ULONG, PULONG, PDEBUG_REGISTER_DESCRIPTION);
        // the description out pointer is optional.
        let method: unsafe extern "system" fn(This, u32, *mut c_char, u32, *mut u32, *mut c_void) -> HRESULT =
            unsafe { registers.method(REGISTERS_GET_DESCRIPTION) };
        EngineStatus::check(unsafe { method(registers.as_raw(), index, buffer, len, &mut size, ptr::null_mut()) })?;
        Ok(size as usize)
    }

    fn register_index_by_name(&self, name: &str) -> EngineResult<u32>
    {
        let registers = &self.interfaces()?.registers;
        let name = c_string(name)?;
        let mut index = 0;
        // SAFETY: GetIndexByName(PCSTR, PULONG)
        let method: unsafe extern "system" fn(This, *const c_char, *mut u32) -> HRESULT =
            unsafe { registers.method(REGISTERS_GET_INDEX_BY_NAME) };
        EngineStatus::check(unsafe { method(registers.as_raw(), name.as_ptr(), &mut index) })?;
        Ok(index)
    }

    fn register_value(&self, index: u32) -> EngineResult<DebugValue>
    {
        let registers = &self.interfaces()?.registers;
        let mut value = DebugValue::default();
        // SAFETY: GetValue(ULONG, PDEBUG_VALUE); `DebugValue` has the engine's layout.
        let method: unsafe extern "system" fn(This, u32, *mut DebugValue) -> HRESULT =
            unsafe { registers.method(REGISTERS_GET_VALUE) };
        EngineStatus::check(unsafe { method(registers.as_raw(), index, &mut value) })?;
        Ok(value)
    }

    fn set_register_value(&self, index: u32, value: &DebugValue) -> EngineResult<()>
    {
        let registers = &self.interfaces()?.registers;
        // SAFETY: SetValue(ULONG, PDEBUG_VALUE)
        let method: unsafe extern "system" fn(This, u32, *const DebugValue) -> HRESULT =
            unsafe { registers.method(REGISTERS_SET_VALUE) };
        EngineStatus::check(unsafe { method(registers.as_raw(), index, value) })
    }

    fn output_registers(&self) -> EngineResult<()>
    {
        let registers = &self.interfaces()?.registers;
        // SAFETY: OutputRegisters(ULONG OutputControl, ULONG Flags)
        let method: unsafe extern "system" fn(This, u32, u32) -> HRESULT = unsafe { registers.method(REGISTERS_OUTPUT) };
        EngineStatus::check(unsafe { method(registers.as_raw(), OUTPUT_THIS_CLIENT, REGISTERS_DEFAULT) })
    }

    fn set_symbol_options(&self, options: u32) -> EngineResult<()>
    {
        self.call_u32(&self.interfaces()?.symbols, SYMBOLS_SET_OPTIONS, options)
    }

    fn set_symbol_path(&self, path: &str) -> EngineResult<()>
    {
        self.call_str(&self.interfaces()?.symbols, SYMBOLS_SET_PATH, path)
    }

    fn symbol_name_by_offset(&self, offset: u64, name: Option<&mut [u8]>) -> EngineResult<Option<(usize, u64)>>
    {
        let symbols = &self.interfaces()?.symbols;
        let (buffer, len) = match name {
            Some(buffer) => (buffer.as_mut_ptr().cast::<c_char>(), buffer_len(buffer.len())?),
            None => (ptr::null_mut(), 0),
        };
        let mut size = 0u32;
        let mut displacement = 0u64;
        // SAFETY: GetNameByOffset(ULONG64, PSTR, ULONG, PULONG, PULONG64)
        let method: unsafe extern "system" fn(This, u64, *mut c_char, u32, *mut u32, *mut u64) -> HRESULT =
            unsafe { symbols.method(SYMBOLS_GET_NAME_BY_OFFSET) };
        match EngineStatus::check(unsafe { method(symbols.as_raw(), offset, buffer, len, &mut size, &mut displacement) }) {
            Ok(()) => Ok(Some((size as usize, displacement))),
            // E_FAIL is how the engine says "no symbol here".
            Err(EngineStatus::FAIL) => Ok(None),
            Err(status) => Err(status),
        }
    }

    fn read_virtual(&self, offset: u64, buffer: &mut [u8]) -> EngineResult<usize>
    {
        let data = &self.interfaces()?.data;
        let mut read = 0u32;
        // SAFETY: ReadVirtual(ULONG64, PVOID, ULONG, PULONG)
        let method: unsafe extern "system" fn(This, u64, *mut c_void, u32, *mut u32) -> HRESULT =
            unsafe { data.method(DATA_READ_VIRTUAL) };
        EngineStatus::check(unsafe {
            method(
                data.as_raw(),
                offset,
                buffer.as_mut_ptr().cast(),
                buffer_len(buffer.len())?,
                &mut read,
            )
        })?;
        Ok(read as usize)
    }

    fn write_virtual(&self, offset: u64, bytes: &[u8]) -> EngineResult<usize>
    {
        let data = &self.interfaces()?.data;
        let mut written = 0u32;
        // SAFETY: WriteVirtual(ULONG64, PVOID, ULONG, PULONG); the buffer is only read.
        let method: unsafe extern "system" fn(This, u64, *const c_void, u32, *mut u32) -> HRESULT =
            unsafe { data.method(DATA_WRITE_VIRTUAL) };
        EngineStatus::check(unsafe {
            method(
                data.as_raw(),
                offset,
                bytes.as_ptr().cast(),
                buffer_len(bytes.len())?,
                &mut written,
            )
        })?;
        Ok(written as usize)
    }

    fn current_thread_data_offset(&self) -> EngineResult<u64>
    {
        self.out_u64(&self.interfaces()?.system, SYSTEM_GET_CURRENT_THREAD_DATA_OFFSET)
    }

    fn current_process_data_offset(&self) -> EngineResult<u64>
    {
        self.out_u64(&self.interfaces()?.system, SYSTEM_GET_CURRENT_PROCESS_DATA_OFFSET)
    }

    fn current_process_peb(&self) -> EngineResult<u64>
    {
        self.out_u64(&self.interfaces()?.system, SYSTEM_GET_CURRENT_PROCESS_PEB)
    }
}
