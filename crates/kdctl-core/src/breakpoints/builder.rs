//! # Breakpoint Builder
//!
//! Fluent configuration of a [`Breakpoint`] before it is added to a session.
//!
//! ## Example
//!
//! ```rust,no_run
//! use kdctl_core::breakpoints::builder::BreakpointBuilder;
//! use kdctl_core::engine::ExecutionStatus;
//! use kdctl_core::types::Address;
//!
//! # fn demo(session: &mut kdctl_core::Session) -> kdctl_core::KdResult<()> {
//! let breakpoint = BreakpointBuilder::code(Address::from(0xfffff800_12345678))
//!     .with_hit_count(3) // ignore the first two hits
//!     .with_trigger(|hit| {
//!         println!("breakpoint {} hit", hit.id());
//!         ExecutionStatus::Break
//!     })
//!     .install(session)?;
//! # Ok(())
//! # }
//! ```

use std::fmt;

use super::{Breakpoint, BreakpointTrigger};
use crate::dispatch::HitContext;
use crate::engine::{BreakpointKind, ExecutionStatus};
use crate::error::KdResult;
use crate::session::Session;
use crate::types::Address;

/// Builder for configuring breakpoints before installation.
pub struct BreakpointBuilder
{
    kind: BreakpointKind,
    offset: Option<Address>,
    enable: bool,
    hit_count: Option<u64>,
    trigger: Option<BreakpointTrigger>,
}

impl fmt::Debug for BreakpointBuilder
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("BreakpointBuilder")
            .field("kind", &self.kind)
            .field("offset", &self.offset)
            .field("enable", &self.enable)
            .field("hit_count", &self.hit_count)
            .field("trigger", &self.trigger.is_some())
            .finish()
    }
}

impl BreakpointBuilder
{
    fn with_kind(kind: BreakpointKind, address: Address) -> Self
    {
        Self {
            kind,
            offset: Some(address),
            enable: true,
            hit_count: None,
            trigger: None,
        }
    }

    /// Create a builder for an instruction breakpoint at `address`.
    #[must_use]
    pub fn code(address: Address) -> Self
    {
        Self::with_kind(BreakpointKind::Code, address)
    }

    /// Create a builder for a processor data breakpoint at `address`.
    ///
    /// The access size and type are left at the engine's defaults.
    #[must_use]
    pub fn data(address: Address) -> Self
    {
        Self::with_kind(BreakpointKind::Data, address)
    }

    /// Add the breakpoint without arming it.
    #[must_use]
    pub fn disabled(mut self) -> Self
    {
        self.enable = false;
        self
    }

    /// Only react from the `count`-th hit on. Earlier hits resume the target.
    #[must_use]
    pub fn with_hit_count(mut self, count: u64) -> Self
    {
        self.hit_count = Some(count);
        self
    }

    /// Run `trigger` when the breakpoint fires. Without one the target stops.
    #[must_use]
    pub fn with_trigger<F>(mut self, trigger: F) -> Self
    where
        F: FnMut(&mut HitContext<'_>) -> ExecutionStatus + 'static,
    {
        self.trigger = Some(Box::new(trigger));
        self
    }

    /// Produce the breakpoint handle without adding it anywhere.
    #[must_use]
    pub fn build(self) -> Breakpoint
    {
        let trigger = match self.hit_count {
            Some(threshold) if threshold > 1 => {
                let mut inner = self.trigger;
                Some(Box::new(move |hit: &mut HitContext<'_>| {
                    if hit.hit_count() < threshold {
                        return ExecutionStatus::Go;
                    }
                    inner.as_mut().map_or(ExecutionStatus::Break, |trigger| trigger(hit))
                }) as BreakpointTrigger)
            }
            _ => self.trigger,
        };
        Breakpoint::from_parts(self.kind, self.offset, self.enable, trigger)
    }

    /// Build the breakpoint and add it to `session`.
    ///
    /// Returns the bound handle; its id is set.
    ///
    /// ## Errors
    ///
    /// Everything [`Session::add_breakpoint`] can return.
    pub fn install(self, session: &mut Session) -> KdResult<Breakpoint>
    {
        let breakpoint = self.build();
        session.add_breakpoint(&breakpoint)?;
        Ok(breakpoint)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn builder_defaults_to_enabled_code_breakpoint()
    {
        let breakpoint = BreakpointBuilder::code(Address::from(0x4000)).build();
        assert_eq!(breakpoint.kind(), BreakpointKind::Code);
        assert_eq!(breakpoint.offset(), Some(Address::from(0x4000)));
        assert!(breakpoint.enables_on_add());
        assert!(!breakpoint.has_trigger());
        assert!(!breakpoint.is_bound());
    }

    #[test]
    fn hit_count_installs_a_gate()
    {
        let breakpoint = BreakpointBuilder::data(Address::from(0x10)).disabled().with_hit_count(2).build();
        assert_eq!(breakpoint.kind(), BreakpointKind::Data);
        assert!(!breakpoint.enables_on_add());
        assert!(breakpoint.has_trigger());
    }
}
