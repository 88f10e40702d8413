//! Breakpoint bookkeeping.
//!
//! The engine owns the real breakpoint objects and hands out ids for them;
//! this module tracks which client-side [`Breakpoint`] each id belongs to so
//! that a hit reported by the engine can be routed back to its trigger.
//!
//! A [`Breakpoint`] is a cheap shared handle: clones observe the same id,
//! bound and deleted state, so callers can keep one after handing a clone to
//! a session. Handles are single-threaded, like the session itself.

pub mod builder;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::dispatch::HitContext;
use crate::engine::{BreakpointHandle, BreakpointKind, DebugEngine, ExecutionStatus, ANY_ID, BREAKPOINT_ENABLED};
use crate::error::{KdError, KdResult};
use crate::types::Address;

/// Engine-issued breakpoint identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointId(u32);

impl BreakpointId
{
    /// Create a new identifier from a raw value.
    #[must_use]
    pub const fn from_raw(value: u32) -> Self
    {
        Self(value)
    }

    /// Get the raw numeric representation (useful for logging / errors).
    #[must_use]
    pub const fn raw(self) -> u32
    {
        self.0
    }
}

impl fmt::Display for BreakpointId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Hook run when a breakpoint fires. Its return value tells the engine how to
/// continue.
pub type BreakpointTrigger = Box<dyn FnMut(&mut HitContext<'_>) -> ExecutionStatus>;

struct Shared
{
    kind: BreakpointKind,
    offset: Option<Address>,
    enable: bool,
    trigger: RefCell<Option<BreakpointTrigger>>,
    id: Cell<Option<BreakpointId>>,
    bound: Cell<bool>,
    deleted: Cell<bool>,
    hits: Cell<u64>,
}

/// Client-side breakpoint handle.
#[derive(Clone)]
pub struct Breakpoint
{
    shared: Rc<Shared>,
}

impl fmt::Debug for Breakpoint
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Breakpoint")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("offset", &self.offset())
            .field("bound", &self.is_bound())
            .field("deleted", &self.is_deleted())
            .field("trigger", &self.has_trigger())
            .finish()
    }
}

impl Default for Breakpoint
{
    fn default() -> Self
    {
        Self::new(BreakpointKind::Code)
    }
}

impl Breakpoint
{
    pub(crate) fn from_parts(
        kind: BreakpointKind,
        offset: Option<Address>,
        enable: bool,
        trigger: Option<BreakpointTrigger>,
    ) -> Self
    {
        Self {
            shared: Rc::new(Shared {
                kind,
                offset,
                enable,
                trigger: RefCell::new(trigger),
                id: Cell::new(None),
                bound: Cell::new(false),
                deleted: Cell::new(false),
                hits: Cell::new(0),
            }),
        }
    }

    /// A breakpoint with no offset and no trigger. It stops the target when
    /// hit.
    #[must_use]
    pub fn new(kind: BreakpointKind) -> Self
    {
        Self::from_parts(kind, None, false, None)
    }

    /// An enabled code breakpoint at `address`.
    #[must_use]
    pub fn code(address: Address) -> Self
    {
        Self::from_parts(BreakpointKind::Code, Some(address), true, None)
    }

    /// Engine id, once bound.
    #[must_use]
    pub fn id(&self) -> Option<BreakpointId>
    {
        self.shared.id.get()
    }

    /// Code or data.
    #[must_use]
    pub fn kind(&self) -> BreakpointKind
    {
        self.shared.kind
    }

    /// Address applied when the breakpoint is added.
    #[must_use]
    pub fn offset(&self) -> Option<Address>
    {
        self.shared.offset
    }

    /// Whether adding the breakpoint also arms it.
    #[must_use]
    pub fn enables_on_add(&self) -> bool
    {
        self.shared.enable
    }

    /// Whether a session has taken this breakpoint. Stays set after removal.
    #[must_use]
    pub fn is_bound(&self) -> bool
    {
        self.shared.bound.get()
    }

    /// Whether the breakpoint was removed from its session.
    #[must_use]
    pub fn is_deleted(&self) -> bool
    {
        self.shared.deleted.get()
    }

    /// Whether a trigger hook is installed.
    #[must_use]
    pub fn has_trigger(&self) -> bool
    {
        self.shared.trigger.try_borrow().map_or(true, |trigger| trigger.is_some())
    }

    /// How many times the engine reported this breakpoint.
    #[must_use]
    pub fn hit_count(&self) -> u64
    {
        self.shared.hits.get()
    }

    /// Whether both handles refer to the same breakpoint.
    #[must_use]
    pub fn same_as(&self, other: &Breakpoint) -> bool
    {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    /// Install or replace the trigger hook.
    pub fn set_trigger<F>(&self, trigger: F)
    where
        F: FnMut(&mut HitContext<'_>) -> ExecutionStatus + 'static,
    {
        *self.shared.trigger.borrow_mut() = Some(Box::new(trigger));
    }

    /// Remove the trigger hook. The breakpoint then stops the target when hit.
    pub fn clear_trigger(&self)
    {
        *self.shared.trigger.borrow_mut() = None;
    }

    fn bind(&self, id: BreakpointId)
    {
        self.shared.id.set(Some(id));
        self.shared.bound.set(true);
    }

    /// Count a hit and run the trigger.
    ///
    /// Returns `None` when there is no trigger, or when the trigger is
    /// already running further up the stack.
    pub(crate) fn fire(&self, context: &mut HitContext<'_>) -> Option<ExecutionStatus>
    {
        self.shared.hits.set(self.shared.hits.get() + 1);
        let mut slot = self.shared.trigger.try_borrow_mut().ok()?;
        slot.as_mut().map(|trigger| trigger(context))
    }
}

struct Entry
{
    breakpoint: Breakpoint,
    handle: BreakpointHandle,
}

/// Breakpoints bound to one session, keyed by engine id.
#[derive(Default)]
pub struct BreakpointRegistry
{
    entries: HashMap<BreakpointId, Entry>,
}

impl fmt::Debug for BreakpointRegistry
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("BreakpointRegistry").field("ids", &self.ids()).finish()
    }
}

impl BreakpointRegistry
{
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Create the breakpoint in the engine and bind it here.
    ///
    /// ## Errors
    ///
    /// - `DoubleBindBreakpoint`: `breakpoint` was already taken by a session
    /// - `BreakpointRegistryDesync`: the engine issued an id that is still live
    /// - `EngineCallFailure`: the engine rejected creation, offset or flags
    pub fn add(&mut self, engine: &dyn DebugEngine, breakpoint: &Breakpoint) -> KdResult<BreakpointId>
    {
        if breakpoint.is_bound() {
            return Err(KdError::DoubleBindBreakpoint(breakpoint.id().map_or(ANY_ID, BreakpointId::raw)));
        }

        let handle = engine.add_breakpoint(breakpoint.kind(), ANY_ID)?;
        let id = match self.configure(engine, breakpoint, handle) {
            Ok(id) => id,
            Err(error) => {
                if let Err(status) = engine.remove_breakpoint(handle) {
                    warn!(%status, "failed to discard half-created breakpoint");
                }
                return Err(error);
            }
        };

        breakpoint.bind(id);
        self.entries.insert(
            id,
            Entry {
                breakpoint: breakpoint.clone(),
                handle,
            },
        );
        debug!(%id, kind = ?breakpoint.kind(), offset = ?breakpoint.offset(), "breakpoint added");
        Ok(id)
    }

    fn configure(&self, engine: &dyn DebugEngine, breakpoint: &Breakpoint, handle: BreakpointHandle) -> KdResult<BreakpointId>
    {
        let id = BreakpointId::from_raw(engine.breakpoint_id(handle)?);
        if self.entries.contains_key(&id) {
            return Err(KdError::BreakpointRegistryDesync(id.raw()));
        }
        if let Some(offset) = breakpoint.offset() {
            engine.set_breakpoint_offset(handle, offset.value())?;
        }
        if breakpoint.enables_on_add() {
            engine.add_breakpoint_flags(handle, BREAKPOINT_ENABLED)?;
        }
        Ok(id)
    }

    /// Delete the breakpoint from the engine and forget it.
    ///
    /// The returned handle is marked deleted. It stays bound, so it cannot be
    /// added again.
    ///
    /// ## Errors
    ///
    /// - `BreakpointIdNotFound`: no breakpoint with this id is registered
    /// - `EngineCallFailure`: the engine refused the removal (the breakpoint
    ///   stays registered)
    pub fn remove(&mut self, engine: &dyn DebugEngine, id: BreakpointId) -> KdResult<Breakpoint>
    {
        let handle = self
            .entries
            .get(&id)
            .map(|entry| entry.handle)
            .ok_or(KdError::BreakpointIdNotFound(id.raw()))?;
        engine.remove_breakpoint(handle)?;

        let entry = self.entries.remove(&id).ok_or(KdError::BreakpointIdNotFound(id.raw()))?;
        entry.breakpoint.shared.deleted.set(true);
        debug!(%id, "breakpoint removed");
        Ok(entry.breakpoint)
    }

    /// The breakpoint the engine refers to by `id`.
    ///
    /// ## Errors
    ///
    /// - `BreakpointRegistryDesync`: the engine knows an id this registry
    ///   does not
    pub fn resolve(&self, id: BreakpointId) -> KdResult<&Breakpoint>
    {
        self.get(id).ok_or(KdError::BreakpointRegistryDesync(id.raw()))
    }

    /// Look up a breakpoint without treating a miss as an error.
    #[must_use]
    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint>
    {
        self.entries.get(&id).map(|entry| &entry.breakpoint)
    }

    /// Number of registered breakpoints.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    /// Whether no breakpoints are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    /// Registered ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<BreakpointId>
    {
        let mut ids: Vec<BreakpointId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn clones_share_state()
    {
        let breakpoint = Breakpoint::code(Address::from(0x1000));
        let clone = breakpoint.clone();
        breakpoint.bind(BreakpointId::from_raw(7));
        assert_eq!(clone.id(), Some(BreakpointId::from_raw(7)));
        assert!(clone.is_bound());
        assert!(clone.same_as(&breakpoint));
        assert!(!Breakpoint::default().same_as(&breakpoint));
    }

    #[test]
    fn trigger_can_be_replaced_and_cleared()
    {
        let breakpoint = Breakpoint::new(BreakpointKind::Data);
        assert!(!breakpoint.has_trigger());
        breakpoint.set_trigger(|_| ExecutionStatus::Go);
        assert!(breakpoint.has_trigger());
        breakpoint.clear_trigger();
        assert!(!breakpoint.has_trigger());
    }

    #[test]
    fn resolve_miss_is_desync()
    {
        let registry = BreakpointRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.resolve(BreakpointId::from_raw(3)),
            Err(KdError::BreakpointRegistryDesync(3))
        ));
    }
}
