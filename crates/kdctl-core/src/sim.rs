//! # Simulated Engine
//!
//! An in-memory [`DebugEngine`] with a scripted target, for tests and for
//! exercising the session layer on machines without a native engine.
//!
//! The simulator is a cheap handle: clones share the same target, so a test
//! can keep one clone for scripting and inspection after handing another to
//! [`Session::attach`](crate::Session::attach).
//!
//! ## Scripted events
//!
//! Events queued with [`SimulatedEngine::queue_event`] are delivered by the
//! next waits that pass callbacks, in order. A wait keeps delivering while the
//! callbacks answer with a running status (`Go`, `GoHandled`, `GoNotHandled`,
//! `IgnoreEvent`) and returns as soon as one answers anything else or the
//! queue runs dry. Every delivered event becomes the last event.
//!
//! ```rust
//! use kdctl_core::sim::{SimEvent, SimulatedEngine};
//! use kdctl_core::{Session, SessionOptions};
//!
//! let engine = SimulatedEngine::new();
//! let script = engine.clone();
//! let mut session = Session::attach(Box::new(engine), "sim", SessionOptions::default()).unwrap();
//! script.queue_event(SimEvent::Other(kdctl_core::events::EventType::LoadModule));
//! session.go().unwrap();
//! assert_eq!(script.queued_events(), 0);
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::engine::{
    AttachMode, BreakpointHandle, BreakpointKind, DebugEngine, EndSessionMode, EventCallbacks, ExecutionStatus,
    InterruptKind, LastEventHeader, OutputSink,
};
use crate::error::{EngineResult, EngineStatus};
use crate::events::{EventMask, EventType, ExceptionRecord};
use crate::registers::{DebugValue, RegisterKind};
use crate::stack::RawStackFrame;

/// Base of the synthetic kernel stack produced by [`SimulatedEngine::set_stack_depth`].
pub const SIM_STACK_BASE: u64 = 0xffff_f800_0000_1000;

/// An event the simulated target raises during a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent
{
    /// The breakpoint with this engine id fires. Ids the engine never issued
    /// are delivered anyway.
    Breakpoint
    {
        /// Engine id.
        id: u32,
    },
    /// The target raises an exception.
    Exception(ExceptionRecord),
    /// Any other category, delivered without extra information.
    Other(EventType),
}

/// A breakpoint object as the simulated engine sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimBreakpoint
{
    /// Engine id.
    pub id: u32,
    /// Code or data.
    pub kind: BreakpointKind,
    /// Trigger address, zero until set.
    pub offset: u64,
    /// Accumulated flags.
    pub flags: u32,
}

#[derive(Default)]
struct LastEventRecord
{
    event_type: u32,
    process_id: u32,
    thread_id: u32,
    extra: Vec<u8>,
    description: Vec<u8>,
}

#[derive(Default)]
struct SimState
{
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, EngineStatus>,

    attached: Option<(AttachMode, String)>,
    ended: Option<EndSessionMode>,
    interrupts: Vec<InterruptKind>,
    output: Option<OutputSink>,
    output_log: Vec<String>,
    interest: Option<EventMask>,
    pointer_64bit: bool,
    execution_status: u32,
    status_history: Vec<ExecutionStatus>,

    registers: Vec<(String, DebugValue)>,
    skew_register_names: bool,

    breakpoints: BTreeMap<u64, SimBreakpoint>,
    next_handle: u64,
    next_breakpoint_id: u32,
    forced_breakpoint_id: Option<u32>,

    script: VecDeque<SimEvent>,
    last_event: LastEventRecord,
    skew_last_event: bool,

    stack: Vec<RawStackFrame>,
    stack_capacities: Vec<usize>,

    memory: BTreeMap<u64, u8>,
    symbols: BTreeMap<u64, String>,
    symbol_options: u32,
    symbol_path: Option<String>,

    thread_data: u64,
    process_data: u64,
    peb: u64,
}

/// Scriptable in-memory engine.
#[derive(Clone)]
pub struct SimulatedEngine
{
    state: Rc<RefCell<SimState>>,
}

impl fmt::Debug for SimulatedEngine
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let state = self.state.borrow();
        f.debug_struct("SimulatedEngine")
            .field("pointer_64bit", &state.pointer_64bit)
            .field("registers", &state.registers.len())
            .field("breakpoints", &state.breakpoints.len())
            .field("queued_events", &state.script.len())
            .finish_non_exhaustive()
    }
}

impl Default for SimulatedEngine
{
    fn default() -> Self
    {
        Self::new()
    }
}

fn int_value(kind: RegisterKind, value: u64) -> DebugValue
{
    let mut raw = DebugValue {
        value_type: kind.raw(),
        ..DebugValue::default()
    };
    raw.raw_bytes[..8].copy_from_slice(&value.to_le_bytes());
    raw
}

impl SimulatedEngine
{
    /// A 64-bit target with a small x64 register file.
    #[must_use]
    pub fn new() -> Self
    {
        let engine = Self {
            state: Rc::new(RefCell::new(SimState {
                pointer_64bit: true,
                execution_status: ExecutionStatus::Break.raw(),
                ..SimState::default()
            })),
        };
        for (name, value) in [
            ("rax", 0u64),
            ("rbx", 0),
            ("rcx", 0),
            ("rdx", 0),
            ("rsp", 0xffff_f800_0000_0f00),
            ("rbp", 0),
            ("rip", SIM_STACK_BASE),
        ] {
            engine.push_register(name, int_value(RegisterKind::Int64, value));
        }
        engine.push_register("efl", int_value(RegisterKind::Int32, 0x246));
        engine.push_register("cs", int_value(RegisterKind::Int16, 0x10));
        engine.push_register("al", int_value(RegisterKind::Int8, 0));
        engine.push_register("st0", DebugValue {
            value_type: RegisterKind::Float80.raw(),
            ..DebugValue::default()
        });
        engine.push_register("xmm0", DebugValue {
            value_type: RegisterKind::Vector128.raw(),
            ..DebugValue::default()
        });
        engine
    }

    /// A 32-bit target with a small x86 register file.
    #[must_use]
    pub fn new_32bit() -> Self
    {
        let engine = Self {
            state: Rc::new(RefCell::new(SimState {
                pointer_64bit: false,
                execution_status: ExecutionStatus::Break.raw(),
                ..SimState::default()
            })),
        };
        for (name, value) in [("eax", 0u64), ("ebx", 0), ("ecx", 0), ("esp", 0x8000_0f00), ("eip", 0x8000_1000)] {
            engine.push_register(name, int_value(RegisterKind::Int32, value));
        }
        engine.push_register("efl", int_value(RegisterKind::Int32, 0x246));
        engine
    }

    // --- scripting ---

    /// Append a register with the name the engine reports for it.
    pub fn push_register(&self, name: &str, value: DebugValue)
    {
        self.state.borrow_mut().registers.push((name.to_string(), value));
    }

    /// Raw value of register `index`.
    #[must_use]
    pub fn register(&self, index: usize) -> Option<DebugValue>
    {
        self.state.borrow().registers.get(index).map(|(_, value)| *value)
    }

    /// Make the named engine call fail with `status` until cleared.
    pub fn fail_on(&self, call: &'static str, status: EngineStatus)
    {
        self.state.borrow_mut().failures.insert(call, status);
    }

    /// Stop failing the named engine call.
    pub fn clear_failure(&self, call: &'static str)
    {
        self.state.borrow_mut().failures.remove(call);
    }

    /// Report a different size on the filling call of register name queries.
    pub fn skew_register_name_size(&self, skew: bool)
    {
        self.state.borrow_mut().skew_register_names = skew;
    }

    /// Report a different extra-information size on the filling call of
    /// last-event queries.
    pub fn skew_last_event_size(&self, skew: bool)
    {
        self.state.borrow_mut().skew_last_event = skew;
    }

    /// Issue `id` for the next breakpoint instead of the next free one.
    pub fn force_next_breakpoint_id(&self, id: u32)
    {
        self.state.borrow_mut().forced_breakpoint_id = Some(id);
    }

    /// Replace the last event record.
    pub fn set_last_event(&self, event_type: u32, process_id: u32, thread_id: u32, extra: &[u8], description: &[u8])
    {
        self.state.borrow_mut().last_event = LastEventRecord {
            event_type,
            process_id,
            thread_id,
            extra: extra.to_vec(),
            description: description.to_vec(),
        };
    }

    /// Queue an event for the next waits.
    pub fn queue_event(&self, event: SimEvent)
    {
        self.state.borrow_mut().script.push_back(event);
    }

    /// Replace the stack with `depth` synthetic frames.
    pub fn set_stack_depth(&self, depth: usize)
    {
        let stack = (0..depth)
            .map(|index| {
                let step = index as u64 * 0x20;
                RawStackFrame {
                    instruction_offset: SIM_STACK_BASE + step,
                    return_offset: SIM_STACK_BASE + step + 0x20,
                    frame_offset: 0xffff_f800_0000_0f00 + step,
                    stack_offset: 0xffff_f800_0000_0f00 + step,
                    frame_number: index as u32,
                    ..RawStackFrame::default()
                }
            })
            .collect();
        self.state.borrow_mut().stack = stack;
    }

    /// Replace the stack with explicit frames.
    pub fn set_stack(&self, frames: Vec<RawStackFrame>)
    {
        self.state.borrow_mut().stack = frames;
    }

    /// Make `bytes` readable and writable at `address`.
    pub fn map_memory(&self, address: u64, bytes: &[u8])
    {
        let mut state = self.state.borrow_mut();
        for (offset, byte) in bytes.iter().enumerate() {
            state.memory.insert(address + offset as u64, *byte);
        }
    }

    /// Bytes currently mapped at `address`, up to `len`.
    #[must_use]
    pub fn memory(&self, address: u64, len: usize) -> Vec<u8>
    {
        let state = self.state.borrow();
        (0..len as u64).map_while(|offset| state.memory.get(&(address + offset)).copied()).collect()
    }

    /// Declare a symbol starting at `address`.
    pub fn add_symbol(&self, address: u64, name: &str)
    {
        self.state.borrow_mut().symbols.insert(address, name.to_string());
    }

    /// Set the system object addresses.
    pub fn set_system_objects(&self, thread: u64, process: u64, peb: u64)
    {
        let mut state = self.state.borrow_mut();
        state.thread_data = thread;
        state.process_data = process;
        state.peb = peb;
    }

    // --- inspection ---

    /// Engine calls made so far, by name, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<&'static str>
    {
        self.state.borrow().calls.clone()
    }

    /// How many times the named call was made.
    #[must_use]
    pub fn call_count(&self, call: &str) -> usize
    {
        self.state.borrow().calls.iter().filter(|made| **made == call).count()
    }

    /// Array sizes passed to each stack capture call.
    #[must_use]
    pub fn stack_capacities(&self) -> Vec<usize>
    {
        self.state.borrow().stack_capacities.clone()
    }

    /// Attach mode and connection string, once attached.
    #[must_use]
    pub fn attached(&self) -> Option<(AttachMode, String)>
    {
        self.state.borrow().attached.clone()
    }

    /// How the session was ended, if it was.
    #[must_use]
    pub fn ended(&self) -> Option<EndSessionMode>
    {
        self.state.borrow().ended
    }

    /// Interrupt requests received.
    #[must_use]
    pub fn interrupts(&self) -> Vec<InterruptKind>
    {
        self.state.borrow().interrupts.clone()
    }

    /// Event interest installed by the client.
    #[must_use]
    pub fn interest(&self) -> Option<EventMask>
    {
        self.state.borrow().interest
    }

    /// Execution statuses set by the client, in order.
    #[must_use]
    pub fn status_history(&self) -> Vec<ExecutionStatus>
    {
        self.state.borrow().status_history.clone()
    }

    /// Text the engine printed.
    #[must_use]
    pub fn output_log(&self) -> Vec<String>
    {
        self.state.borrow().output_log.clone()
    }

    /// Current symbol options.
    #[must_use]
    pub fn symbol_options(&self) -> u32
    {
        self.state.borrow().symbol_options
    }

    /// Current symbol path.
    #[must_use]
    pub fn symbol_path(&self) -> Option<String>
    {
        self.state.borrow().symbol_path.clone()
    }

    /// Live engine breakpoints.
    #[must_use]
    pub fn breakpoints(&self) -> Vec<SimBreakpoint>
    {
        self.state.borrow().breakpoints.values().copied().collect()
    }

    /// The live engine breakpoint with this id.
    #[must_use]
    pub fn breakpoint(&self, id: u32) -> Option<SimBreakpoint>
    {
        self.state.borrow().breakpoints.values().find(|bp| bp.id == id).copied()
    }

    /// Events still queued.
    #[must_use]
    pub fn queued_events(&self) -> usize
    {
        self.state.borrow().script.len()
    }

    // --- internals ---

    fn call(&self, name: &'static str) -> EngineResult<()>
    {
        let mut state = self.state.borrow_mut();
        state.calls.push(name);
        trace!(call = name, "simulated engine call");
        match state.failures.get(name) {
            Some(status) => Err(*status),
            None => Ok(()),
        }
    }

    fn emit(&self, text: &str)
    {
        let sink = {
            let mut state = self.state.borrow_mut();
            state.output_log.push(text.to_string());
            state.output.take()
        };
        if let Some(mut sink) = sink {
            sink(0x1, text);
            let mut state = self.state.borrow_mut();
            if state.output.is_none() {
                state.output = Some(sink);
            }
        }
    }

    fn handle_for_id(&self, id: u32) -> BreakpointHandle
    {
        let mut state = self.state.borrow_mut();
        if let Some((handle, _)) = state.breakpoints.iter().find(|(_, bp)| bp.id == id) {
            return BreakpointHandle(*handle);
        }
        // Unknown to the engine as well: hand out a handle that still maps to the id.
        state.next_handle += 1;
        let handle = state.next_handle;
        state.breakpoints.insert(handle, SimBreakpoint {
            id,
            kind: BreakpointKind::Code,
            offset: 0,
            flags: 0,
        });
        BreakpointHandle(handle)
    }

    fn record_event(&self, event: &SimEvent)
    {
        let (event_type, extra, description) = match event {
            SimEvent::Breakpoint { id } => (
                EventType::Breakpoint,
                id.to_le_bytes().to_vec(),
                format!("Hit breakpoint {id}"),
            ),
            SimEvent::Exception(record) => (
                EventType::Exception,
                record.to_info_bytes(),
                format!("Exception {:#010x}", record.code),
            ),
            SimEvent::Other(kind) => (*kind, Vec::new(), kind.name().to_string()),
        };
        let mut description = description.into_bytes();
        description.push(0);
        self.set_last_event(event_type.bit(), 4, 8, &extra, &description);
    }

    fn deliver(&self, event: &SimEvent, callbacks: &mut dyn EventCallbacks) -> ExecutionStatus
    {
        match event {
            SimEvent::Breakpoint { id } => {
                let handle = self.handle_for_id(*id);
                callbacks.breakpoint(handle)
            }
            SimEvent::Exception(record) => callbacks.exception(record),
            SimEvent::Other(kind) => callbacks.other(*kind),
        }
    }
}

const fn keeps_running(status: ExecutionStatus) -> bool
{
    matches!(
        status,
        ExecutionStatus::Go | ExecutionStatus::GoHandled | ExecutionStatus::GoNotHandled | ExecutionStatus::IgnoreEvent
    )
}

fn event_type(event: &SimEvent) -> EventType
{
    match event {
        SimEvent::Breakpoint { .. } => EventType::Breakpoint,
        SimEvent::Exception(_) => EventType::Exception,
        SimEvent::Other(kind) => *kind,
    }
}

impl DebugEngine for SimulatedEngine
{
    fn attach_kernel(&self, mode: AttachMode, connection: &str) -> EngineResult<()>
    {
        self.call("attach_kernel")?;
        self.state.borrow_mut().attached = Some((mode, connection.to_string()));
        Ok(())
    }

    fn acquire_interfaces(&self) -> EngineResult<()>
    {
        self.call("acquire_interfaces")
    }

    fn set_output_callbacks(&self, sink: Option<OutputSink>) -> EngineResult<()>
    {
        self.call("set_output_callbacks")?;
        self.state.borrow_mut().output = sink;
        Ok(())
    }

    fn install_event_callbacks(&self, interest: EventMask) -> EngineResult<()>
    {
        self.call("install_event_callbacks")?;
        self.state.borrow_mut().interest = Some(interest);
        Ok(())
    }

    fn end_session(&self, mode: EndSessionMode) -> EngineResult<()>
    {
        self.call("end_session")?;
        self.state.borrow_mut().ended = Some(mode);
        Ok(())
    }

    fn set_interrupt(&self, kind: InterruptKind) -> EngineResult<()>
    {
        self.call("set_interrupt")?;
        self.state.borrow_mut().interrupts.push(kind);
        Ok(())
    }

    fn is_pointer_64bit(&self) -> EngineResult<bool>
    {
        self.call("is_pointer_64bit")?;
        Ok(self.state.borrow().pointer_64bit)
    }

    fn execution_status(&self) -> EngineResult<u32>
    {
        self.call("execution_status")?;
        Ok(self.state.borrow().execution_status)
    }

    fn set_execution_status(&self, status: ExecutionStatus) -> EngineResult<()>
    {
        self.call("set_execution_status")?;
        let mut state = self.state.borrow_mut();
        state.execution_status = status.raw();
        state.status_history.push(status);
        Ok(())
    }

    fn wait_for_event(&self, _timeout_ms: u32, callbacks: Option<&mut dyn EventCallbacks>) -> EngineResult<()>
    {
        self.call("wait_for_event")?;
        let Some(callbacks) = callbacks else {
            return Ok(());
        };

        loop {
            let (event, interested) = {
                let mut state = self.state.borrow_mut();
                let Some(event) = state.script.pop_front() else {
                    break;
                };
                let interested = state.interest.is_some_and(|mask| mask.contains(event_type(&event)));
                (event, interested)
            };
            self.record_event(&event);
            if !interested {
                continue;
            }
            let status = self.deliver(&event, callbacks);
            trace!(?event, ?status, "simulated event delivered");
            if !keeps_running(status) {
                break;
            }
        }
        self.state.borrow_mut().execution_status = ExecutionStatus::Break.raw();
        Ok(())
    }

    fn last_event_information(
        &self,
        extra: Option<&mut [u8]>,
        description: Option<&mut [u8]>,
    ) -> EngineResult<LastEventHeader>
    {
        self.call("last_event_information")?;
        let state = self.state.borrow();
        let record = &state.last_event;
        let filling = extra.is_some();
        if let Some(buffer) = extra {
            let len = buffer.len().min(record.extra.len());
            buffer[..len].copy_from_slice(&record.extra[..len]);
        }
        if let Some(buffer) = description {
            let len = buffer.len().min(record.description.len());
            buffer[..len].copy_from_slice(&record.description[..len]);
        }
        let skew = usize::from(filling && state.skew_last_event);
        Ok(LastEventHeader {
            event_type: record.event_type,
            process_id: record.process_id,
            thread_id: record.thread_id,
            extra_size: record.extra.len() + skew,
            description_size: record.description.len(),
        })
    }

    fn stack_trace(&self, frames: &mut [RawStackFrame]) -> EngineResult<usize>
    {
        self.call("stack_trace")?;
        let mut state = self.state.borrow_mut();
        state.stack_capacities.push(frames.len());
        let count = frames.len().min(state.stack.len());
        frames[..count].copy_from_slice(&state.stack[..count]);
        Ok(count)
    }

    fn output_stack_trace(&self, frame_count: u32, _flags: u32) -> EngineResult<()>
    {
        self.call("output_stack_trace")?;
        let lines: Vec<String> = {
            let state = self.state.borrow();
            state
                .stack
                .iter()
                .take(frame_count as usize)
                .map(|frame| {
                    format!(
                        "{:02x} {:016x} {:016x}\n",
                        frame.frame_number, frame.stack_offset, frame.return_offset
                    )
                })
                .collect()
        };
        for line in lines {
            self.emit(&line);
        }
        Ok(())
    }

    fn add_breakpoint(&self, kind: BreakpointKind, _desired_id: u32) -> EngineResult<BreakpointHandle>
    {
        self.call("add_breakpoint")?;
        let mut state = self.state.borrow_mut();
        let id = match state.forced_breakpoint_id.take() {
            Some(id) => id,
            None => {
                let id = state.next_breakpoint_id;
                state.next_breakpoint_id += 1;
                id
            }
        };
        state.next_handle += 1;
        let handle = state.next_handle;
        state.breakpoints.insert(handle, SimBreakpoint {
            id,
            kind,
            offset: 0,
            flags: 0,
        });
        Ok(BreakpointHandle(handle))
    }

    fn remove_breakpoint(&self, handle: BreakpointHandle) -> EngineResult<()>
    {
        self.call("remove_breakpoint")?;
        match self.state.borrow_mut().breakpoints.remove(&handle.0) {
            Some(_) => Ok(()),
            None => Err(EngineStatus::INVALID_ARG),
        }
    }

    fn breakpoint_id(&self, handle: BreakpointHandle) -> EngineResult<u32>
    {
        self.call("breakpoint_id")?;
        self.state
            .borrow()
            .breakpoints
            .get(&handle.0)
            .map(|bp| bp.id)
            .ok_or(EngineStatus::INVALID_ARG)
    }

    fn set_breakpoint_offset(&self, handle: BreakpointHandle, offset: u64) -> EngineResult<()>
    {
        self.call("set_breakpoint_offset")?;
        let mut state = self.state.borrow_mut();
        let bp = state.breakpoints.get_mut(&handle.0).ok_or(EngineStatus::INVALID_ARG)?;
        bp.offset = offset;
        Ok(())
    }

    fn add_breakpoint_flags(&self, handle: BreakpointHandle, flags: u32) -> EngineResult<()>
    {
        self.call("add_breakpoint_flags")?;
        let mut state = self.state.borrow_mut();
        let bp = state.breakpoints.get_mut(&handle.0).ok_or(EngineStatus::INVALID_ARG)?;
        bp.flags |= flags;
        Ok(())
    }

    fn register_count(&self) -> EngineResult<u32>
    {
        self.call("register_count")?;
        u32::try_from(self.state.borrow().registers.len()).map_err(|_| EngineStatus::FAIL)
    }

    fn register_description(&self, index: u32, name: Option<&mut [u8]>) -> EngineResult<usize>
    {
        self.call("register_description")?;
        let state = self.state.borrow();
        let (registered, _) = state.registers.get(index as usize).ok_or(EngineStatus::INVALID_ARG)?;
        let mut bytes = registered.clone().into_bytes();
        bytes.push(0);
        let filling = name.is_some();
        if let Some(buffer) = name {
            let len = buffer.len().min(bytes.len());
            buffer[..len].copy_from_slice(&bytes[..len]);
        }
        Ok(bytes.len() + usize::from(filling && state.skew_register_names))
    }

    fn register_index_by_name(&self, name: &str) -> EngineResult<u32>
    {
        self.call("register_index_by_name")?;
        let state = self.state.borrow();
        let position = state
            .registers
            .iter()
            .position(|(registered, _)| registered.eq_ignore_ascii_case(name))
            .ok_or(EngineStatus::INVALID_ARG)?;
        u32::try_from(position).map_err(|_| EngineStatus::FAIL)
    }

    fn register_value(&self, index: u32) -> EngineResult<DebugValue>
    {
        self.call("register_value")?;
        self.state
            .borrow()
            .registers
            .get(index as usize)
            .map(|(_, value)| *value)
            .ok_or(EngineStatus::INVALID_ARG)
    }

    fn set_register_value(&self, index: u32, value: &DebugValue) -> EngineResult<()>
    {
        self.call("set_register_value")?;
        let mut state = self.state.borrow_mut();
        let slot = state.registers.get_mut(index as usize).ok_or(EngineStatus::INVALID_ARG)?;
        slot.1 = *value;
        Ok(())
    }

    fn output_registers(&self) -> EngineResult<()>
    {
        self.call("output_registers")?;
        let text: String = {
            let state = self.state.borrow();
            state
                .registers
                .iter()
                .filter_map(|(name, value)| value.decode(0).ok().map(|decoded| format!("{name}={decoded}\n")))
                .collect()
        };
        self.emit(&text);
        Ok(())
    }

    fn set_symbol_options(&self, options: u32) -> EngineResult<()>
    {
        self.call("set_symbol_options")?;
        self.state.borrow_mut().symbol_options = options;
        Ok(())
    }

    fn set_symbol_path(&self, path: &str) -> EngineResult<()>
    {
        self.call("set_symbol_path")?;
        self.state.borrow_mut().symbol_path = Some(path.to_string());
        Ok(())
    }

    fn symbol_name_by_offset(&self, offset: u64, name: Option<&mut [u8]>) -> EngineResult<Option<(usize, u64)>>
    {
        self.call("symbol_name_by_offset")?;
        let state = self.state.borrow();
        let Some((start, symbol)) = state.symbols.range(..=offset).next_back() else {
            return Ok(None);
        };
        let mut bytes = symbol.clone().into_bytes();
        bytes.push(0);
        if let Some(buffer) = name {
            let len = buffer.len().min(bytes.len());
            buffer[..len].copy_from_slice(&bytes[..len]);
        }
        Ok(Some((bytes.len(), offset - start)))
    }

    fn read_virtual(&self, offset: u64, buffer: &mut [u8]) -> EngineResult<usize>
    {
        self.call("read_virtual")?;
        let state = self.state.borrow();
        let mut read = 0;
        for (slot, address) in buffer.iter_mut().zip(offset..) {
            match state.memory.get(&address) {
                Some(byte) => *slot = *byte,
                None => break,
            }
            read += 1;
        }
        if read == 0 && !buffer.is_empty() {
            return Err(EngineStatus::FAIL);
        }
        Ok(read)
    }

    fn write_virtual(&self, offset: u64, data: &[u8]) -> EngineResult<usize>
    {
        self.call("write_virtual")?;
        let mut state = self.state.borrow_mut();
        let mut written = 0;
        for (byte, address) in data.iter().zip(offset..) {
            match state.memory.get_mut(&address) {
                Some(slot) => *slot = *byte,
                None => break,
            }
            written += 1;
        }
        if written == 0 && !data.is_empty() {
            return Err(EngineStatus::FAIL);
        }
        Ok(written)
    }

    fn current_thread_data_offset(&self) -> EngineResult<u64>
    {
        self.call("current_thread_data_offset")?;
        Ok(self.state.borrow().thread_data)
    }

    fn current_process_data_offset(&self) -> EngineResult<u64>
    {
        self.call("current_process_data_offset")?;
        Ok(self.state.borrow().process_data)
    }

    fn current_process_peb(&self) -> EngineResult<u64>
    {
        self.call("current_process_peb")?;
        Ok(self.state.borrow().peb)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn reads_stop_at_unmapped_bytes()
    {
        let engine = SimulatedEngine::new();
        engine.map_memory(0x1000, &[1, 2, 3]);
        let mut buffer = [0u8; 8];
        assert_eq!(engine.read_virtual(0x1000, &mut buffer), Ok(3));
        assert_eq!(&buffer[..3], &[1, 2, 3]);
        assert_eq!(engine.read_virtual(0x2000, &mut buffer), Err(EngineStatus::FAIL));
    }

    #[test]
    fn injected_failures_apply_until_cleared()
    {
        let engine = SimulatedEngine::new();
        engine.fail_on("register_count", EngineStatus::NOT_IMPLEMENTED);
        assert_eq!(engine.register_count(), Err(EngineStatus::NOT_IMPLEMENTED));
        engine.clear_failure("register_count");
        assert!(engine.register_count().is_ok());
        assert_eq!(engine.call_count("register_count"), 2);
    }

    #[test]
    fn symbol_lookup_uses_nearest_preceding_symbol()
    {
        let engine = SimulatedEngine::new();
        engine.add_symbol(0x1000, "nt!KiBreak");
        assert_eq!(engine.symbol_name_by_offset(0x1010, None), Ok(Some((11, 0x10))));
        assert_eq!(engine.symbol_name_by_offset(0x0fff, None), Ok(None));
    }
}
