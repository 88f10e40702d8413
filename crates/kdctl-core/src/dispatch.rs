//! # Event Dispatch
//!
//! Routes engine notifications delivered during a wait to breakpoint
//! triggers and the exception policy.
//!
//! The engine calls back into the session from inside
//! [`DebugEngine::wait_for_event`], on the waiting thread, before the wait
//! returns. Nothing raised in a callback can travel back through the engine,
//! so the dispatcher keeps the first error it sees, answers the engine with
//! [`ExecutionStatus::Break`], and the session reports the error once the
//! wait is over.

use std::fmt;

use tracing::{debug, error, warn};

use crate::breakpoints::{BreakpointId, BreakpointRegistry};
use crate::engine::{BreakpointHandle, DebugEngine, EventCallbacks, ExecutionStatus};
use crate::error::{KdError, KdResult};
use crate::events::{EventMask, EventType, ExceptionRecord};
use crate::registers::RegisterBank;
use crate::symbols::{self, Symbol};
use crate::types::{Address, AddressWidth};

/// What to do when the target raises an exception during a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExceptionPolicy
{
    /// Stop the target and return `UnhandledException` from the wait.
    #[default]
    Surface,
    /// Let the target's own handlers see the exception and keep running.
    PassToTarget,
}

/// Session-level event handling state.
#[derive(Debug, Default)]
pub struct EventDispatcher
{
    policy: ExceptionPolicy,
    pending: Option<KdError>,
}

impl EventDispatcher
{
    /// Create a dispatcher with the given exception policy.
    #[must_use]
    pub fn new(policy: ExceptionPolicy) -> Self
    {
        Self { policy, pending: None }
    }

    /// Event categories the session asks the engine to deliver.
    #[must_use]
    pub fn interest_mask() -> EventMask
    {
        EventType::Breakpoint | EventType::Exception
    }

    /// The configured exception policy.
    #[must_use]
    pub fn policy(&self) -> ExceptionPolicy
    {
        self.policy
    }

    /// Whether an error from the current wait is waiting to be reported.
    #[must_use]
    pub fn has_pending(&self) -> bool
    {
        self.pending.is_some()
    }

    /// Take the error recorded during the last wait, if any.
    pub fn take_pending(&mut self) -> Option<KdError>
    {
        self.pending.take()
    }

    fn record(&mut self, failure: KdError) -> ExecutionStatus
    {
        if self.pending.is_none() {
            self.pending = Some(failure);
        } else {
            warn!(%failure, "dropping error raised after an earlier one in the same wait");
        }
        ExecutionStatus::Break
    }

    /// Handle a breakpoint notification.
    ///
    /// Resolves the handle through `registry` and runs the breakpoint's
    /// trigger. A breakpoint without a trigger stops the target.
    pub fn on_breakpoint_hit(
        &mut self,
        engine: &dyn DebugEngine,
        width: &'static dyn AddressWidth,
        registry: &BreakpointRegistry,
        handle: BreakpointHandle,
    ) -> ExecutionStatus
    {
        let id = match engine.breakpoint_id(handle) {
            Ok(raw) => BreakpointId::from_raw(raw),
            Err(status) => return self.record(status.into()),
        };
        let breakpoint = match registry.resolve(id) {
            Ok(breakpoint) => breakpoint,
            Err(failure) => {
                error!(%id, "engine reported a breakpoint the session does not know");
                return self.record(failure);
            }
        };

        let mut context = HitContext {
            id,
            hit_count: breakpoint.hit_count() + 1,
            engine,
            width,
        };
        let status = breakpoint.fire(&mut context).unwrap_or(ExecutionStatus::Break);
        debug!(%id, hits = breakpoint.hit_count(), ?status, "breakpoint hit");
        status
    }

    /// Handle an exception notification according to the policy.
    pub fn on_exception(&mut self, record: &ExceptionRecord) -> ExecutionStatus
    {
        match self.policy {
            ExceptionPolicy::Surface => {
                debug!(%record, "exception stops the target");
                self.record(KdError::UnhandledException(record.clone()))
            }
            ExceptionPolicy::PassToTarget => {
                debug!(%record, "exception passed to the target");
                ExecutionStatus::GoNotHandled
            }
        }
    }
}

/// Everything a wait needs to answer the engine's callbacks.
pub struct DispatchContext<'s>
{
    dispatcher: &'s mut EventDispatcher,
    registry: &'s BreakpointRegistry,
    engine: &'s dyn DebugEngine,
    width: &'static dyn AddressWidth,
}

impl<'s> DispatchContext<'s>
{
    pub(crate) fn new(
        dispatcher: &'s mut EventDispatcher,
        registry: &'s BreakpointRegistry,
        engine: &'s dyn DebugEngine,
        width: &'static dyn AddressWidth,
    ) -> Self
    {
        Self {
            dispatcher,
            registry,
            engine,
            width,
        }
    }
}

impl EventCallbacks for DispatchContext<'_>
{
    fn breakpoint(&mut self, handle: BreakpointHandle) -> ExecutionStatus
    {
        self.dispatcher.on_breakpoint_hit(self.engine, self.width, self.registry, handle)
    }

    fn exception(&mut self, record: &ExceptionRecord) -> ExecutionStatus
    {
        self.dispatcher.on_exception(record)
    }
}

/// View of the session handed to a breakpoint trigger.
pub struct HitContext<'s>
{
    id: BreakpointId,
    hit_count: u64,
    engine: &'s dyn DebugEngine,
    width: &'static dyn AddressWidth,
}

impl fmt::Debug for HitContext<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("HitContext")
            .field("id", &self.id)
            .field("hit_count", &self.hit_count)
            .field("width", &self.width)
            .finish_non_exhaustive()
    }
}

impl<'s> HitContext<'s>
{
    /// Id of the breakpoint that fired.
    #[must_use]
    pub fn id(&self) -> BreakpointId
    {
        self.id
    }

    /// Hits so far, including this one.
    #[must_use]
    pub fn hit_count(&self) -> u64
    {
        self.hit_count
    }

    /// The session's pointer width.
    #[must_use]
    pub fn width(&self) -> &'static dyn AddressWidth
    {
        self.width
    }

    /// Register access while the target is stopped at the breakpoint.
    #[must_use]
    pub fn registers(&self) -> RegisterBank<'s>
    {
        RegisterBank::new(self.engine)
    }

    /// Truncate a raw value to a target address.
    #[must_use]
    pub fn trim(&self, raw: u64) -> Address
    {
        self.width.trim(raw)
    }

    /// Read one pointer from target memory.
    pub fn read_ptr(&self, address: Address) -> KdResult<u64>
    {
        self.width.read_ptr(self.engine, address)
    }

    /// Symbol containing `address`.
    pub fn symbol(&self, address: Address) -> KdResult<Option<Symbol>>
    {
        symbols::lookup(self.engine, address)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn record() -> ExceptionRecord
    {
        ExceptionRecord {
            code: 0xc000_0005,
            flags: 0,
            nested_record: 0,
            address: 0x1000,
            information: Vec::new(),
            first_chance: true,
        }
    }

    #[test]
    fn interest_is_breakpoints_and_exceptions()
    {
        let mask = EventDispatcher::interest_mask();
        assert_eq!(mask.raw(), 0x3);
    }

    #[test]
    fn surfaced_exception_is_recorded_once()
    {
        let mut dispatcher = EventDispatcher::default();
        assert_eq!(dispatcher.on_exception(&record()), ExecutionStatus::Break);
        assert_eq!(dispatcher.on_exception(&record()), ExecutionStatus::Break);
        assert!(matches!(dispatcher.take_pending(), Some(KdError::UnhandledException(_))));
        assert!(dispatcher.take_pending().is_none());
    }

    #[test]
    fn passed_exception_records_nothing()
    {
        let mut dispatcher = EventDispatcher::new(ExceptionPolicy::PassToTarget);
        assert_eq!(dispatcher.on_exception(&record()), ExecutionStatus::GoNotHandled);
        assert!(!dispatcher.has_pending());
    }
}
