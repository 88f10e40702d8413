//! Breakpoint registry and trigger tests against the simulated engine

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use kdctl_core::breakpoints::builder::BreakpointBuilder;
use kdctl_core::breakpoints::{Breakpoint, BreakpointId};
use kdctl_core::engine::{BreakpointKind, ExecutionStatus, BREAKPOINT_ENABLED};
use kdctl_core::error::EngineStatus;
use kdctl_core::sim::{SimEvent, SimulatedEngine};
use kdctl_core::types::Address;
use kdctl_core::{KdError, Session, SessionOptions};

const TARGET: u64 = 0xffff_f800_0123_4560;

fn attach(engine: &SimulatedEngine) -> Session
{
    Session::attach(Box::new(engine.clone()), "sim", SessionOptions::default()).unwrap()
}

#[test]
fn test_add_configures_engine_breakpoint()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);

    let breakpoint = Breakpoint::code(Address::new(TARGET));
    let id = session.add_breakpoint(&breakpoint).unwrap();

    assert_eq!(id, BreakpointId::from_raw(0));
    assert_eq!(breakpoint.id(), Some(id));
    assert!(breakpoint.is_bound());
    let native = engine.breakpoint(0).unwrap();
    assert_eq!(native.kind, BreakpointKind::Code);
    assert_eq!(native.offset, TARGET);
    assert_eq!(native.flags & BREAKPOINT_ENABLED, BREAKPOINT_ENABLED);
    assert_eq!(session.breakpoints().len(), 1);
}

#[test]
fn test_disabled_data_breakpoint_is_not_armed()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);

    let breakpoint = BreakpointBuilder::data(Address::new(TARGET)).disabled().install(&mut session).unwrap();
    let native = engine.breakpoint(breakpoint.id().unwrap().raw()).unwrap();
    assert_eq!(native.kind, BreakpointKind::Data);
    assert_eq!(native.flags, 0);
}

#[test]
fn test_breakpoint_without_offset_skips_set_offset()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);

    session.add_breakpoint(&Breakpoint::new(BreakpointKind::Code)).unwrap();
    assert_eq!(engine.call_count("set_breakpoint_offset"), 0);
    assert_eq!(engine.call_count("add_breakpoint_flags"), 0);
}

#[test]
fn test_ids_are_assigned_by_engine()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);

    for offset in [0x10, 0x20, 0x30] {
        session.add_breakpoint(&Breakpoint::code(Address::new(TARGET + offset))).unwrap();
    }
    let ids: Vec<u32> = session.breakpoints().ids().into_iter().map(BreakpointId::raw).collect();
    assert_eq!(ids, vec![0, 1, 2]);
}

#[test]
fn test_adding_twice_is_rejected()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);
    let breakpoint = Breakpoint::code(Address::new(TARGET));
    session.add_breakpoint(&breakpoint).unwrap();

    assert!(matches!(
        session.add_breakpoint(&breakpoint),
        Err(KdError::DoubleBindBreakpoint(0))
    ));

    let other_engine = SimulatedEngine::new();
    let mut other = attach(&other_engine);
    assert!(matches!(
        other.add_breakpoint(&breakpoint.clone()),
        Err(KdError::DoubleBindBreakpoint(0))
    ));
    assert_eq!(engine.call_count("add_breakpoint"), 1);
    assert_eq!(other_engine.call_count("add_breakpoint"), 0);
}

#[test]
fn test_reused_live_id_is_a_desync()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);
    session.add_breakpoint(&Breakpoint::code(Address::new(TARGET))).unwrap();

    engine.force_next_breakpoint_id(0);
    let second = Breakpoint::code(Address::new(TARGET + 0x10));
    assert!(matches!(
        session.add_breakpoint(&second),
        Err(KdError::BreakpointRegistryDesync(0))
    ));
    assert!(!second.is_bound());
    assert_eq!(engine.breakpoints().len(), 1);
    assert_eq!(engine.breakpoint(0).map(|bp| bp.offset), Some(TARGET));
}

#[test]
fn test_failed_configuration_discards_engine_breakpoint()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);
    engine.fail_on("set_breakpoint_offset", EngineStatus::INVALID_ARG);

    let breakpoint = Breakpoint::code(Address::new(TARGET));
    assert!(matches!(
        session.add_breakpoint(&breakpoint),
        Err(KdError::EngineCallFailure(EngineStatus::INVALID_ARG))
    ));
    assert!(!breakpoint.is_bound());
    assert!(engine.breakpoints().is_empty());
    assert!(session.breakpoints().is_empty());

    engine.clear_failure("set_breakpoint_offset");
    session.add_breakpoint(&breakpoint).unwrap();
    assert!(breakpoint.is_bound());
}

#[test]
fn test_remove_deletes_and_forgets()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);
    let breakpoint = Breakpoint::code(Address::new(TARGET));
    let id = session.add_breakpoint(&breakpoint).unwrap();

    let removed = session.remove_breakpoint(id).unwrap();
    assert!(removed.same_as(&breakpoint));
    assert!(breakpoint.is_deleted());
    assert!(breakpoint.is_bound());
    assert!(engine.breakpoints().is_empty());
    assert!(session.breakpoints().get(id).is_none());

    assert!(matches!(session.remove_breakpoint(id), Err(KdError::BreakpointIdNotFound(0))));
    assert!(matches!(session.add_breakpoint(&breakpoint), Err(KdError::DoubleBindBreakpoint(0))));
}

#[test]
fn test_failed_remove_keeps_registration()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);
    let id = session.add_breakpoint(&Breakpoint::code(Address::new(TARGET))).unwrap();
    engine.fail_on("remove_breakpoint", EngineStatus::FAIL);

    assert!(matches!(session.remove_breakpoint(id), Err(KdError::EngineCallFailure(_))));
    assert!(session.breakpoints().get(id).is_some());
    assert!(!session.breakpoints().get(id).unwrap().is_deleted());
}

#[test]
fn test_breakpoint_without_trigger_stops_target()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);
    let breakpoint = Breakpoint::code(Address::new(TARGET));
    let id = session.add_breakpoint(&breakpoint).unwrap();

    engine.queue_event(SimEvent::Breakpoint { id: id.raw() });
    engine.queue_event(SimEvent::Breakpoint { id: id.raw() });
    session.go().unwrap();

    assert_eq!(breakpoint.hit_count(), 1);
    assert_eq!(engine.queued_events(), 1);
}

#[test]
fn test_trigger_sees_hit_context_and_resumes()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let log = Rc::clone(&seen);
    let breakpoint = BreakpointBuilder::code(Address::new(TARGET))
        .with_trigger(move |hit| {
            let rip = hit.registers().value_by_name("rip").map(|value| value.as_u64());
            log.borrow_mut().push((hit.id().raw(), hit.hit_count(), rip.ok()));
            ExecutionStatus::Go
        })
        .install(&mut session)
        .unwrap();

    for _ in 0..3 {
        engine.queue_event(SimEvent::Breakpoint { id: 0 });
    }
    session.go().unwrap();

    assert_eq!(breakpoint.hit_count(), 3);
    assert_eq!(engine.queued_events(), 0);
    let rip = Some(0xffff_f800_0000_1000);
    assert_eq!(*seen.borrow(), vec![(0, 1, rip), (0, 2, rip), (0, 3, rip)]);
}

#[test]
fn test_trigger_can_be_replaced_and_cleared()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);
    let breakpoint = Breakpoint::code(Address::new(TARGET));
    session.add_breakpoint(&breakpoint).unwrap();

    breakpoint.set_trigger(|_| ExecutionStatus::Go);
    assert!(breakpoint.has_trigger());
    engine.queue_event(SimEvent::Breakpoint { id: 0 });
    engine.queue_event(SimEvent::Breakpoint { id: 0 });
    session.go().unwrap();
    assert_eq!(engine.queued_events(), 0);

    breakpoint.clear_trigger();
    assert!(!breakpoint.has_trigger());
    engine.queue_event(SimEvent::Breakpoint { id: 0 });
    engine.queue_event(SimEvent::Breakpoint { id: 0 });
    session.go().unwrap();
    assert_eq!(engine.queued_events(), 1);
    assert_eq!(breakpoint.hit_count(), 3);
}

#[test]
fn test_hit_count_gate_skips_early_hits()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);
    let fired = Rc::new(Cell::new(0));

    let counter = Rc::clone(&fired);
    let breakpoint = BreakpointBuilder::code(Address::new(TARGET))
        .with_hit_count(3)
        .with_trigger(move |_| {
            counter.set(counter.get() + 1);
            ExecutionStatus::Break
        })
        .install(&mut session)
        .unwrap();

    for _ in 0..4 {
        engine.queue_event(SimEvent::Breakpoint { id: 0 });
    }
    session.go().unwrap();

    assert_eq!(fired.get(), 1);
    assert_eq!(breakpoint.hit_count(), 3);
    assert_eq!(engine.queued_events(), 1);
}

#[test]
fn test_hit_count_gate_without_trigger_stops()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);
    let breakpoint = BreakpointBuilder::code(Address::new(TARGET))
        .with_hit_count(2)
        .install(&mut session)
        .unwrap();

    for _ in 0..3 {
        engine.queue_event(SimEvent::Breakpoint { id: 0 });
    }
    session.go().unwrap();
    assert_eq!(breakpoint.hit_count(), 2);
    assert_eq!(engine.queued_events(), 1);
}

#[test]
fn test_unknown_breakpoint_is_a_desync()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);

    engine.queue_event(SimEvent::Breakpoint { id: 42 });
    engine.queue_event(SimEvent::Breakpoint { id: 42 });
    assert!(matches!(session.go(), Err(KdError::BreakpointRegistryDesync(42))));
    assert_eq!(engine.queued_events(), 1);
}

#[test]
fn test_wait_error_is_reported_once()
{
    let engine = SimulatedEngine::new();
    let mut session = attach(&engine);

    engine.queue_event(SimEvent::Breakpoint { id: 7 });
    assert!(session.go().is_err());
    session.go().unwrap();
}
