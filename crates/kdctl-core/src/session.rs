//! # Kernel Debugging Session
//!
//! [`Session`] is the single entry point: [`Session::attach`] takes an engine
//! and a connection string and returns a session that is attached, knows the
//! target's pointer width and is ready for commands.
//!
//! ## Lifecycle
//!
//! ```text
//! Unattached -> Attaching -> BitnessUnresolved -> Ready -> Detached
//! ```
//!
//! Only a `Ready` session exists outside of [`Session::attach`]. After
//! [`Session::detach`] every operation fails with `SessionDetached`.
//! Dropping a session that is still `Ready` detaches it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use kdctl_core::{create_engine, Session, SessionOptions};
//!
//! # fn demo() -> kdctl_core::KdResult<()> {
//! let engine = create_engine()?;
//! let mut session = Session::attach(engine, "net:port=50000,key=1.2.3.4", SessionOptions::default())?;
//! for frame in session.stack_trace()? {
//!     println!("{frame}");
//! }
//! session.go()?;
//! # Ok(())
//! # }
//! ```

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::breakpoints::{Breakpoint, BreakpointId, BreakpointRegistry};
use crate::dispatch::{DispatchContext, EventDispatcher, ExceptionPolicy};
use crate::engine::{AttachMode, DebugEngine, EndSessionMode, ExecutionStatus, InterruptKind, OutputSink, INFINITE};
use crate::error::{KdError, KdResult};
use crate::events::{self, LastEvent};
use crate::memory;
use crate::registers::RegisterBank;
use crate::stack::{StackFrame, StackWalker};
use crate::symbols::{self, Symbol, DEFAULT_SYMBOL_OPTIONS};
use crate::types::{width, Address, AddressWidth};

/// Frame count and flags used when the engine prints the stack itself.
const PRINT_STACK_FRAMES: u32 = 0x1fff;
const PRINT_STACK_FLAGS: u32 = 0x1fff;

/// Low bits of the engine's execution status that carry the status itself.
const EXECUTION_STATUS_MASK: u32 = 0x1f;

/// Tracing target engine output is forwarded to.
pub const ENGINE_OUTPUT_TARGET: &str = "kdctl::engine";

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState
{
    /// No engine call made yet.
    Unattached,
    /// Attach issued, auxiliary setup in progress.
    Attaching,
    /// Connected, pointer width not yet known.
    BitnessUnresolved,
    /// Usable.
    Ready,
    /// Session ended.
    Detached,
}

impl fmt::Display for SessionState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            Self::Unattached => "unattached",
            Self::Attaching => "attaching",
            Self::BitnessUnresolved => "bitness unresolved",
            Self::Ready => "ready",
            Self::Detached => "detached",
        };
        f.write_str(name)
    }
}

/// Attach-time configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions
{
    /// Remote connection or local kernel.
    pub attach: AttachMode,
    /// Drop engine output instead of logging it.
    pub quiet: bool,
    /// Symbol search path. The engine default is kept when `None`.
    pub symbol_path: Option<String>,
    /// Engine symbol options.
    pub symbol_options: u32,
    /// Reaction to target exceptions during a wait.
    pub exception_policy: ExceptionPolicy,
}

impl Default for SessionOptions
{
    fn default() -> Self
    {
        Self {
            attach: AttachMode::default(),
            quiet: false,
            symbol_path: None,
            symbol_options: DEFAULT_SYMBOL_OPTIONS,
            exception_policy: ExceptionPolicy::default(),
        }
    }
}

impl SessionOptions
{
    /// Set the attach mode.
    #[must_use]
    pub fn with_attach(mut self, attach: AttachMode) -> Self
    {
        self.attach = attach;
        self
    }

    /// Enable or disable quiet mode.
    #[must_use]
    pub fn with_quiet(mut self, quiet: bool) -> Self
    {
        self.quiet = quiet;
        self
    }

    /// Set the symbol search path.
    #[must_use]
    pub fn with_symbol_path(mut self, path: impl Into<String>) -> Self
    {
        self.symbol_path = Some(path.into());
        self
    }

    /// Replace the symbol options.
    #[must_use]
    pub fn with_symbol_options(mut self, options: u32) -> Self
    {
        self.symbol_options = options;
        self
    }

    /// Set the exception policy.
    #[must_use]
    pub fn with_exception_policy(mut self, policy: ExceptionPolicy) -> Self
    {
        self.exception_policy = policy;
        self
    }
}

/// An attached kernel debugging session.
///
/// Single-threaded: the session and its breakpoint handles are neither `Send`
/// nor `Sync`.
pub struct Session
{
    engine: Box<dyn DebugEngine>,
    width: &'static dyn AddressWidth,
    registry: BreakpointRegistry,
    dispatcher: EventDispatcher,
    state: SessionState,
    quiet: Rc<Cell<bool>>,
    connection: String,
}

impl fmt::Debug for Session
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Session")
            .field("connection", &self.connection)
            .field("state", &self.state)
            .field("width", &self.width)
            .field("breakpoints", &self.registry)
            .finish_non_exhaustive()
    }
}

fn advance(state: &mut SessionState, next: SessionState)
{
    debug!("Session state: {} -> {}", state, next);
    *state = next;
}

fn output_sink(quiet: Rc<Cell<bool>>) -> OutputSink
{
    Box::new(move |mask, text| {
        if !quiet.get() {
            info!(target: ENGINE_OUTPUT_TARGET, mask, "{}", text.trim_end());
        }
    })
}

impl Session
{
    /// Attach to a kernel and bring the session up to `Ready`.
    ///
    /// Steps, in order: kernel attach, auxiliary interfaces, symbol options
    /// and path, output callback, active interrupt, wait for the connection,
    /// pointer width, event interest.
    ///
    /// ## Errors
    ///
    /// - `EngineCallFailure`: any step was refused by the engine. If the
    ///   attach itself succeeded, the engine session is ended again before
    ///   returning.
    pub fn attach(engine: Box<dyn DebugEngine>, connection: &str, options: SessionOptions) -> KdResult<Self>
    {
        let mut state = SessionState::Unattached;
        info!("Attaching to kernel: {}", connection);
        advance(&mut state, SessionState::Attaching);
        engine.attach_kernel(options.attach, connection)?;

        let quiet = Rc::new(Cell::new(options.quiet));
        let width = match Self::prepare(engine.as_ref(), &options, &quiet, &mut state) {
            Ok(width) => width,
            Err(error) => {
                warn!("Attach failed while {}: {}", state, error);
                if let Err(status) = engine.end_session(EndSessionMode::ActiveDetach) {
                    warn!("Failed to end half-attached session: {}", status);
                }
                return Err(error);
            }
        };

        advance(&mut state, SessionState::Ready);
        info!("Attached to {}-bit kernel", width.bits());
        Ok(Self {
            engine,
            width,
            registry: BreakpointRegistry::new(),
            dispatcher: EventDispatcher::new(options.exception_policy),
            state,
            quiet,
            connection: connection.to_string(),
        })
    }

    fn prepare(
        engine: &dyn DebugEngine,
        options: &SessionOptions,
        quiet: &Rc<Cell<bool>>,
        state: &mut SessionState,
    ) -> KdResult<&'static dyn AddressWidth>
    {
        engine.acquire_interfaces()?;
        debug!("Acquired auxiliary engine interfaces");

        engine.set_symbol_options(options.symbol_options)?;
        if let Some(path) = &options.symbol_path {
            engine.set_symbol_path(path)?;
            debug!("Symbol path set to {}", path);
        }

        engine.set_output_callbacks(Some(output_sink(Rc::clone(quiet))))?;
        engine.set_interrupt(InterruptKind::Active)?;

        debug!("Waiting for the kernel connection");
        engine.wait_for_event(INFINITE, None)?;
        advance(state, SessionState::BitnessUnresolved);

        let width = width::for_target(engine.is_pointer_64bit()?);
        engine.install_event_callbacks(EventDispatcher::interest_mask())?;
        Ok(width)
    }

    fn ensure_ready(&self) -> KdResult<()>
    {
        if self.state == SessionState::Ready {
            Ok(())
        } else {
            Err(KdError::SessionDetached)
        }
    }

    /// Connection string the session was attached with.
    #[must_use]
    pub fn connection(&self) -> &str
    {
        &self.connection
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState
    {
        self.state
    }

    /// The target's pointer width, fixed at attach.
    #[must_use]
    pub fn width(&self) -> &'static dyn AddressWidth
    {
        self.width
    }

    /// Whether the target uses 64-bit pointers.
    #[must_use]
    pub fn is_64bit(&self) -> bool
    {
        self.width.bits() == 64
    }

    /// Exception policy in effect.
    #[must_use]
    pub fn exception_policy(&self) -> ExceptionPolicy
    {
        self.dispatcher.policy()
    }

    /// Whether engine output is being dropped.
    #[must_use]
    pub fn is_quiet(&self) -> bool
    {
        self.quiet.get()
    }

    /// Start or stop dropping engine output.
    pub fn set_quiet(&self, quiet: bool)
    {
        self.quiet.set(quiet);
    }

    /// Register access.
    pub fn registers(&self) -> KdResult<RegisterBank<'_>>
    {
        self.ensure_ready()?;
        Ok(RegisterBank::new(self.engine.as_ref()))
    }

    /// Breakpoints bound to this session.
    #[must_use]
    pub fn breakpoints(&self) -> &BreakpointRegistry
    {
        &self.registry
    }

    /// Create `breakpoint` in the engine and bind it to this session.
    ///
    /// ## Errors
    ///
    /// See [`BreakpointRegistry::add`].
    pub fn add_breakpoint(&mut self, breakpoint: &Breakpoint) -> KdResult<BreakpointId>
    {
        self.ensure_ready()?;
        self.registry.add(self.engine.as_ref(), breakpoint)
    }

    /// Remove a breakpoint by id.
    ///
    /// ## Errors
    ///
    /// See [`BreakpointRegistry::remove`].
    pub fn remove_breakpoint(&mut self, id: BreakpointId) -> KdResult<Breakpoint>
    {
        self.ensure_ready()?;
        self.registry.remove(self.engine.as_ref(), id)
    }

    /// Optionally change the execution status, then wait for the next
    /// stopping event.
    ///
    /// Breakpoint triggers and the exception policy run inside the wait.
    ///
    /// ## Errors
    ///
    /// - `EngineCallFailure`: setting the status or the wait failed
    /// - `UnhandledException`: the target raised an exception and the policy
    ///   is [`ExceptionPolicy::Surface`]
    /// - `BreakpointRegistryDesync`: the engine reported an unknown breakpoint
    pub fn continue_execution(&mut self, status: Option<ExecutionStatus>) -> KdResult<()>
    {
        self.ensure_ready()?;
        if let Some(status) = status {
            self.engine.set_execution_status(status)?;
        }

        debug!("Waiting for event (status: {:?})", status);
        let engine = self.engine.as_ref();
        let mut context = DispatchContext::new(&mut self.dispatcher, &self.registry, engine, self.width);
        let waited = engine.wait_for_event(INFINITE, Some(&mut context));

        if let Some(error) = self.dispatcher.take_pending() {
            return Err(error);
        }
        Ok(waited?)
    }

    /// Resume the target.
    pub fn go(&mut self) -> KdResult<()>
    {
        self.continue_execution(Some(ExecutionStatus::Go))
    }

    /// Single-step, entering calls.
    pub fn step_into(&mut self) -> KdResult<()>
    {
        self.continue_execution(Some(ExecutionStatus::StepInto))
    }

    /// Single-step over calls.
    pub fn step_over(&mut self) -> KdResult<()>
    {
        self.continue_execution(Some(ExecutionStatus::StepOver))
    }

    /// Current execution status.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: the engine reported a status outside the known set
    pub fn execution_status(&self) -> KdResult<ExecutionStatus>
    {
        self.ensure_ready()?;
        let raw = self.engine.execution_status()?;
        ExecutionStatus::from_raw(raw & EXECUTION_STATUS_MASK)
            .ok_or_else(|| KdError::InvalidArgument(format!("unknown execution status 0x{raw:x}")))
    }

    /// Change the execution status without waiting.
    pub fn set_execution_status(&self, status: ExecutionStatus) -> KdResult<()>
    {
        self.ensure_ready()?;
        Ok(self.engine.set_execution_status(status)?)
    }

    /// The engine's most recent event, decoded.
    ///
    /// ## Errors
    ///
    /// - `BufferSizeMismatch`: sizes changed between the two queries
    /// - `UnknownEventType` / `ExtraInfoSizeMismatch`: see [`events::decode`]
    pub fn last_event(&self) -> KdResult<LastEvent>
    {
        self.ensure_ready()?;
        let sizes = self.engine.last_event_information(None, None)?;
        let mut extra = vec![0u8; sizes.extra_size];
        let mut description = vec![0u8; sizes.description_size];
        let filled = self
            .engine
            .last_event_information(Some(&mut extra), Some(&mut description))?;

        if filled.extra_size != sizes.extra_size {
            return Err(KdError::BufferSizeMismatch {
                query: "last event extra information",
                first: sizes.extra_size,
                second: filled.extra_size,
            });
        }
        if filled.description_size != sizes.description_size {
            return Err(KdError::BufferSizeMismatch {
                query: "last event description",
                first: sizes.description_size,
                second: filled.description_size,
            });
        }

        events::decode(filled.event_type, filled.process_id, filled.thread_id, &extra, &description)
    }

    /// Stack walker bound to this session.
    pub fn stack_walker(&self) -> KdResult<StackWalker<'_>>
    {
        self.ensure_ready()?;
        Ok(StackWalker::new(self.engine.as_ref(), self.width))
    }

    /// Capture the current stack.
    ///
    /// ## Errors
    ///
    /// See [`StackWalker::capture`].
    pub fn stack_trace(&self) -> KdResult<Vec<StackFrame<'_>>>
    {
        self.stack_walker()?.capture()
    }

    /// Have the engine print the current stack to its output.
    pub fn print_stack(&self) -> KdResult<()>
    {
        self.ensure_ready()?;
        Ok(self.engine.output_stack_trace(PRINT_STACK_FRAMES, PRINT_STACK_FLAGS)?)
    }

    /// Truncate a raw engine value to a target address.
    #[must_use]
    pub fn trim(&self, raw: u64) -> Address
    {
        self.width.trim(raw)
    }

    /// Read a dword from target memory.
    pub fn read_dword(&self, address: Address) -> KdResult<u32>
    {
        self.ensure_ready()?;
        memory::read_dword(self.engine.as_ref(), address)
    }

    /// Read a qword from target memory.
    pub fn read_qword(&self, address: Address) -> KdResult<u64>
    {
        self.ensure_ready()?;
        memory::read_qword(self.engine.as_ref(), address)
    }

    /// Read a pointer from target memory.
    pub fn read_ptr(&self, address: Address) -> KdResult<u64>
    {
        self.ensure_ready()?;
        self.width.read_ptr(self.engine.as_ref(), address)
    }

    /// Read `buffer.len()` bytes from target memory.
    pub fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> KdResult<()>
    {
        self.ensure_ready()?;
        memory::read_exact(self.engine.as_ref(), address, buffer)
    }

    /// Write a dword to target memory.
    pub fn write_dword(&self, address: Address, value: u32) -> KdResult<()>
    {
        self.ensure_ready()?;
        memory::write_dword(self.engine.as_ref(), address, value)
    }

    /// Write a qword to target memory.
    pub fn write_qword(&self, address: Address, value: u64) -> KdResult<()>
    {
        self.ensure_ready()?;
        memory::write_qword(self.engine.as_ref(), address, value)
    }

    /// Write a pointer to target memory.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: `value` does not fit the target's pointer width
    pub fn write_ptr(&self, address: Address, value: u64) -> KdResult<()>
    {
        self.ensure_ready()?;
        self.width.write_ptr(self.engine.as_ref(), address, value)
    }

    /// Address of the current kernel thread object.
    pub fn current_thread(&self) -> KdResult<Address>
    {
        self.ensure_ready()?;
        Ok(self.trim(self.engine.current_thread_data_offset()?))
    }

    /// Address of the current kernel process object.
    pub fn current_process(&self) -> KdResult<Address>
    {
        self.ensure_ready()?;
        Ok(self.trim(self.engine.current_process_data_offset()?))
    }

    /// Address of the current process environment block, as reported.
    pub fn current_peb(&self) -> KdResult<Address>
    {
        self.ensure_ready()?;
        Ok(Address::from(self.engine.current_process_peb()?))
    }

    /// Symbol containing `address`.
    pub fn symbol(&self, address: Address) -> KdResult<Option<Symbol>>
    {
        self.ensure_ready()?;
        symbols::lookup(self.engine.as_ref(), address)
    }

    /// End the engine session and let the target run.
    ///
    /// ## Errors
    ///
    /// - `SessionDetached`: already detached
    /// - `EngineCallFailure`: the engine refused; the session stays `Ready`
    pub fn detach(&mut self) -> KdResult<()>
    {
        self.ensure_ready()?;
        self.engine.end_session(EndSessionMode::ActiveDetach)?;
        advance(&mut self.state, SessionState::Detached);
        info!("Detached from {}", self.connection);
        Ok(())
    }
}

impl Drop for Session
{
    fn drop(&mut self)
    {
        if self.state == SessionState::Ready {
            if let Err(error) = self.detach() {
                warn!("Failed to detach on drop: {}", error);
            }
        }
    }
}
