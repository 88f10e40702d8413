//! Event dispatch and last-event tests against the simulated engine

use kdctl_core::breakpoints::Breakpoint;
use kdctl_core::dispatch::{EventDispatcher, ExceptionPolicy};
use kdctl_core::events::{self, EventMask, EventType, ExceptionRecord, ExtraInformation, EXCEPTION_INFO_SIZE};
use kdctl_core::sim::{SimEvent, SimulatedEngine};
use kdctl_core::types::Address;
use kdctl_core::{KdError, Session, SessionOptions};

fn access_violation() -> ExceptionRecord
{
    ExceptionRecord {
        code: 0xc000_0005,
        flags: 0,
        nested_record: 0,
        address: 0xffff_f800_0420_1337,
        information: vec![1, 0xdead_0000],
        first_chance: true,
    }
}

fn attach_with(engine: &SimulatedEngine, policy: ExceptionPolicy) -> Session
{
    let options = SessionOptions::default().with_exception_policy(policy);
    Session::attach(Box::new(engine.clone()), "sim", options).unwrap()
}

#[test]
fn test_session_asks_for_breakpoints_and_exceptions()
{
    let engine = SimulatedEngine::new();
    let _session = attach_with(&engine, ExceptionPolicy::default());

    let interest = engine.interest().unwrap();
    assert_eq!(interest, EventDispatcher::interest_mask());
    assert!(interest.contains(EventType::Breakpoint));
    assert!(interest.contains(EventType::Exception));
    assert!(!interest.contains(EventType::LoadModule));
    assert_eq!(interest, EventMask::from_raw(0x3));
}

#[test]
fn test_exception_surfaces_by_default()
{
    let engine = SimulatedEngine::new();
    let mut session = attach_with(&engine, ExceptionPolicy::default());
    assert_eq!(session.exception_policy(), ExceptionPolicy::Surface);

    engine.queue_event(SimEvent::Exception(access_violation()));
    engine.queue_event(SimEvent::Other(EventType::CreateThread));
    match session.go() {
        Err(KdError::UnhandledException(record)) => assert_eq!(record, access_violation()),
        other => panic!("Expected UnhandledException, got {other:?}"),
    }
    assert_eq!(engine.queued_events(), 1);
}

#[test]
fn test_exception_passes_to_target_when_configured()
{
    let engine = SimulatedEngine::new();
    let mut session = attach_with(&engine, ExceptionPolicy::PassToTarget);
    let breakpoint = Breakpoint::code(Address::new(0xffff_f800_0000_1000));
    session.add_breakpoint(&breakpoint).unwrap();

    engine.queue_event(SimEvent::Exception(access_violation()));
    engine.queue_event(SimEvent::Breakpoint { id: 0 });
    session.go().unwrap();

    assert_eq!(breakpoint.hit_count(), 1);
    assert_eq!(session.last_event().unwrap().event_type, EventType::Breakpoint);
}

#[test]
fn test_uninteresting_events_are_not_delivered()
{
    let engine = SimulatedEngine::new();
    let mut session = attach_with(&engine, ExceptionPolicy::Surface);
    let breakpoint = Breakpoint::code(Address::new(0xffff_f800_0000_1000));
    session.add_breakpoint(&breakpoint).unwrap();

    engine.queue_event(SimEvent::Other(EventType::LoadModule));
    engine.queue_event(SimEvent::Other(EventType::CreateProcess));
    engine.queue_event(SimEvent::Breakpoint { id: 0 });
    session.go().unwrap();

    assert_eq!(engine.queued_events(), 0);
    assert_eq!(breakpoint.hit_count(), 1);
}

#[test]
fn test_last_event_after_breakpoint()
{
    let engine = SimulatedEngine::new();
    let mut session = attach_with(&engine, ExceptionPolicy::Surface);
    session.add_breakpoint(&Breakpoint::code(Address::new(0x1000))).unwrap();

    engine.queue_event(SimEvent::Breakpoint { id: 0 });
    session.go().unwrap();

    let event = session.last_event().unwrap();
    assert_eq!(event.event_type, EventType::Breakpoint);
    assert_eq!(event.extra, Some(ExtraInformation::Breakpoint { id: 0 }));
    assert_eq!(event.description, "Hit breakpoint 0");
    assert_eq!(event.to_string(), "<LastEvent DEBUG_EVENT_BREAKPOINT (Hit breakpoint 0)>");
}

#[test]
fn test_last_event_after_exception_keeps_record()
{
    let engine = SimulatedEngine::new();
    let mut session = attach_with(&engine, ExceptionPolicy::Surface);

    engine.queue_event(SimEvent::Exception(access_violation()));
    assert!(session.go().is_err());

    let event = session.last_event().unwrap();
    assert_eq!(event.extra, Some(ExtraInformation::Exception(access_violation())));
    assert_eq!(event.description, "Exception 0xc0000005");
}

#[test]
fn test_decode_every_table_entry()
{
    for event in EventType::ALL {
        let extra = vec![0u8; event.extra_shape().map_or(0, |shape| shape.size())];
        let decoded = events::decode(event.bit(), 1, 2, &extra, b"x\0").unwrap();
        assert_eq!(decoded.event_type, event);
        assert_eq!(decoded.extra.is_some(), event.extra_shape().is_some());
        assert_eq!(decoded.description, "x");
    }
}

#[test]
fn test_decode_rejects_wrong_extra_size()
{
    assert!(matches!(
        events::decode(EventType::LoadModule.bit(), 0, 0, &[0; 4], b""),
        Err(KdError::ExtraInfoSizeMismatch {
            event: "DEBUG_EVENT_LOAD_MODULE",
            expected: 8,
            actual: 4,
        })
    ));
    assert!(matches!(
        events::decode(EventType::Exception.bit(), 0, 0, &[0; 152], b""),
        Err(KdError::ExtraInfoSizeMismatch { expected: EXCEPTION_INFO_SIZE, .. })
    ));
}

#[test]
fn test_decode_rejects_combined_bits()
{
    let combined = EventType::Breakpoint.bit() | EventType::Exception.bit();
    assert!(matches!(
        events::decode(combined, 0, 0, &[], b""),
        Err(KdError::UnknownEventType(3))
    ));
    assert!(matches!(events::decode(0, 0, 0, &[], b""), Err(KdError::UnknownEventType(0))));
}

#[test]
fn test_decode_system_error()
{
    let mut extra = 0x57_u32.to_le_bytes().to_vec();
    extra.extend_from_slice(&2_u32.to_le_bytes());
    let event = events::decode(EventType::SystemError.bit(), 0, 0, &extra, b"").unwrap();
    assert_eq!(event.extra, Some(ExtraInformation::SystemError { error: 0x57, level: 2 }));
    assert_eq!(event.description, "");
}

#[test]
fn test_exception_record_keeps_at_most_fifteen_parameters()
{
    let mut record = access_violation();
    record.information = (0..20).collect();
    let bytes = record.to_info_bytes();
    assert_eq!(bytes.len(), EXCEPTION_INFO_SIZE);

    let decoded = ExceptionRecord::from_record_bytes(&bytes, false);
    assert_eq!(decoded.information, (0..15).collect::<Vec<u64>>());
    assert!(!decoded.first_chance);
    assert_eq!(decoded.to_string(), "0xc0000005 at 0xfffff80004201337 (second chance)");
}
