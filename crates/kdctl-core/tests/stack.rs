//! Stack capture tests against the simulated engine

use kdctl_core::error::EngineStatus;
use kdctl_core::sim::{SimulatedEngine, SIM_STACK_BASE};
use kdctl_core::stack::{RawStackFrame, CAPACITY_STEP, MAX_ATTEMPTS};
use kdctl_core::types::Address;
use kdctl_core::{KdError, Session, SessionOptions};

fn attach(engine: &SimulatedEngine) -> Session
{
    Session::attach(Box::new(engine.clone()), "sim", SessionOptions::default()).unwrap()
}

#[test]
fn test_shallow_stack_takes_one_attempt()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);
    engine.set_stack_depth(5);

    let frames = session.stack_trace().unwrap();
    assert_eq!(frames.len(), 5);
    assert_eq!(engine.stack_capacities(), vec![CAPACITY_STEP]);

    assert_eq!(frames[0].frame_number(), 0);
    assert_eq!(frames[0].instruction_offset(), Address::new(SIM_STACK_BASE));
    assert_eq!(frames[0].return_offset(), Address::new(SIM_STACK_BASE + 0x20));
    assert_eq!(frames[4].frame_number(), 4);
    assert!(!frames[4].is_virtual());
}

#[test]
fn test_full_array_triggers_retry()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);
    engine.set_stack_depth(100);

    let frames = session.stack_trace().unwrap();
    assert_eq!(frames.len(), 100);
    assert_eq!(engine.stack_capacities(), vec![100, 200]);
}

#[test]
fn test_deep_stack_grows_capacity_linearly()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);
    engine.set_stack_depth(250);

    assert_eq!(session.stack_trace().unwrap().len(), 250);
    assert_eq!(engine.stack_capacities(), vec![100, 200, 300]);
}

#[test]
fn test_empty_stack_is_not_an_error()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);

    assert!(session.stack_trace().unwrap().is_empty());
}

#[test]
fn test_capture_gives_up_after_last_attempt()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);
    engine.set_stack_depth(MAX_ATTEMPTS * CAPACITY_STEP + 1);

    assert!(matches!(
        session.stack_trace(),
        Err(KdError::StackCaptureTruncated { capacity: 900 })
    ));
    let capacities = engine.stack_capacities();
    assert_eq!(capacities.len(), MAX_ATTEMPTS);
    assert_eq!(capacities.last(), Some(&900));
}

#[test]
fn test_exactly_full_last_attempt_is_truncated()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);
    engine.set_stack_depth(900);

    assert!(matches!(session.stack_trace(), Err(KdError::StackCaptureTruncated { .. })));
}

#[test]
fn test_engine_failure_stops_capture()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);
    engine.set_stack_depth(3);
    engine.fail_on("stack_trace", EngineStatus::FAIL);

    assert!(matches!(
        session.stack_trace(),
        Err(KdError::EngineCallFailure(EngineStatus::FAIL))
    ));
    assert_eq!(engine.call_count("stack_trace"), 1);
}

#[test]
fn test_frames_are_trimmed_on_32bit_targets()
{
    let engine = SimulatedEngine::new_32bit();
    let session = attach(&engine);
    engine.set_stack(vec![RawStackFrame {
        instruction_offset: 0xffff_ffff_8040_1000,
        return_offset: 0xffff_ffff_8040_2000,
        frame_offset: 0xffff_ffff_8000_0f00,
        stack_offset: 0xffff_ffff_8000_0ef0,
        params: [0xffff_ffff_0000_0001, 2, 3, 4],
        ..RawStackFrame::default()
    }]);

    let frames = session.stack_trace().unwrap();
    let frame = &frames[0];
    assert_eq!(frame.instruction_offset(), Address::new(0x8040_1000));
    assert_eq!(frame.return_offset(), Address::new(0x8040_2000));
    assert_eq!(frame.frame_offset(), Address::new(0x8000_0f00));
    assert_eq!(frame.stack_offset(), Address::new(0x8000_0ef0));
    assert_eq!(frame.params()[0], Address::new(1));
    assert_eq!(frame.raw().instruction_offset, 0xffff_ffff_8040_1000);
}

#[test]
fn test_frames_render_with_symbols()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);
    engine.set_stack_depth(2);
    engine.add_symbol(SIM_STACK_BASE, "nt!KeBugCheckEx");

    let frames = session.stack_trace().unwrap();
    assert_eq!(frames[0].to_string(), "<StackFrame 0xfffff80000001000 nt!KeBugCheckEx+0x0>");
    assert_eq!(frames[1].to_string(), "<StackFrame 0xfffff80000001020 nt!KeBugCheckEx+0x20>");
}

#[test]
fn test_frames_without_symbols_render_address_only()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);
    engine.set_stack_depth(1);

    let frames = session.stack_trace().unwrap();
    assert_eq!(frames[0].symbol().unwrap(), None);
    assert_eq!(frames[0].to_string(), "<StackFrame 0xfffff80000001000>");
}

#[test]
fn test_print_stack_goes_through_engine()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);
    engine.set_stack_depth(3);

    session.print_stack().unwrap();
    assert_eq!(engine.output_log().len(), 3);
    assert_eq!(engine.call_count("output_stack_trace"), 1);
}
