//! Register access tests against the simulated engine

use kdctl_core::error::EngineStatus;
use kdctl_core::registers::{DebugValue, RegisterKind, RegisterValue};
use kdctl_core::sim::SimulatedEngine;
use kdctl_core::{KdError, Session, SessionOptions};

fn attach(engine: &SimulatedEngine) -> Session
{
    Session::attach(Box::new(engine.clone()), "sim", SessionOptions::default()).unwrap()
}

fn int64(value: u64) -> DebugValue
{
    RegisterValue::Int64(value).into()
}

#[test]
fn test_list_names_in_index_order()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);
    let bank = session.registers().unwrap();

    assert_eq!(bank.count().unwrap(), 12);
    assert_eq!(
        bank.list().unwrap(),
        vec!["rax", "rbx", "rcx", "rdx", "rsp", "rbp", "rip", "efl", "cs", "al", "st0", "xmm0"]
    );
}

#[test]
fn test_names_are_lower_cased()
{
    let engine = SimulatedEngine::new();
    engine.push_register("CR8", int64(0));
    let session = attach(&engine);
    let bank = session.registers().unwrap();

    assert_eq!(bank.name(12).unwrap(), "cr8");
    let descriptors = bank.descriptors().unwrap();
    assert_eq!(descriptors.last().map(|d| (d.index, d.name.as_str())), Some((12, "cr8")));
}

#[test]
fn test_value_by_name_ignores_case()
{
    let session = attach(&SimulatedEngine::new());
    let bank = session.registers().unwrap();

    assert_eq!(bank.value_by_name("RSP").unwrap(), RegisterValue::Int64(0xffff_f800_0000_0f00));
    assert_eq!(bank.value_by_name("efl").unwrap(), RegisterValue::Int32(0x246));
    assert_eq!(bank.value_by_name("Cs").unwrap(), RegisterValue::Int16(0x10));
    assert_eq!(bank.value_by_name("al").unwrap(), RegisterValue::Int8(0));
}

#[test]
fn test_unknown_register_is_reported_by_name()
{
    let session = attach(&SimulatedEngine::new());
    let bank = session.registers().unwrap();

    match bank.value_by_name("r99") {
        Err(KdError::UnknownRegister(name)) => assert_eq!(name, "r99"),
        other => panic!("Expected UnknownRegister, got {other:?}"),
    }
    assert!(matches!(bank.set_value_by_name("r99", 1), Err(KdError::UnknownRegister(_))));
}

#[test]
fn test_non_integer_registers_are_unsupported()
{
    let session = attach(&SimulatedEngine::new());
    let bank = session.registers().unwrap();

    assert!(matches!(
        bank.value_by_name("st0"),
        Err(KdError::UnsupportedRegisterType { index: 10, .. })
    ));
    assert!(matches!(
        bank.value_by_name("xmm0"),
        Err(KdError::UnsupportedRegisterType { index: 11, .. })
    ));
}

#[test]
fn test_invalid_register_value_is_distinct()
{
    let engine = SimulatedEngine::new();
    engine.push_register("dr7", DebugValue::default());
    let session = attach(&engine);

    assert!(matches!(
        session.registers().unwrap().value_by_name("dr7"),
        Err(KdError::InvalidRegisterValue { index: 12 })
    ));
}

#[test]
fn test_set_value_keeps_register_kind()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);
    let bank = session.registers().unwrap();

    bank.set_value_by_name("RAX", 0x4141_4141_4141_4141).unwrap();
    assert_eq!(bank.value_by_name("rax").unwrap(), RegisterValue::Int64(0x4141_4141_4141_4141));

    bank.set_value_by_name("efl", 0x202).unwrap();
    let raw = engine.register(7).unwrap();
    assert_eq!(raw.value_type, RegisterKind::Int32.raw());
    assert_eq!(raw.decode(7).unwrap(), RegisterValue::Int32(0x202));
}

#[test]
fn test_set_value_rejects_oversized_value()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);
    let bank = session.registers().unwrap();

    assert!(matches!(bank.set_value_by_name("cs", 0x1_0000), Err(KdError::InvalidArgument(_))));
    assert_eq!(engine.call_count("set_register_value"), 0);
    assert_eq!(bank.value_by_name("cs").unwrap(), RegisterValue::Int16(0x10));
}

#[test]
fn test_index_of_asks_the_engine()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);
    let bank = session.registers().unwrap();

    assert_eq!(bank.index_of("RIP").unwrap(), 6);
    assert!(matches!(bank.index_of("nope"), Err(KdError::EngineCallFailure(EngineStatus::INVALID_ARG))));
    assert_eq!(engine.call_count("register_index_by_name"), 2);
}

#[test]
fn test_name_size_change_is_rejected()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);
    engine.skew_register_name_size(true);

    assert!(matches!(
        session.registers().unwrap().name(0),
        Err(KdError::BufferSizeMismatch { query: "register name", first: 4, second: 5 })
    ));
}

#[test]
fn test_engine_failures_are_surfaced_unchanged()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);
    engine.fail_on("register_value", EngineStatus::NOT_IMPLEMENTED);

    assert!(matches!(
        session.registers().unwrap().value(0),
        Err(KdError::EngineCallFailure(EngineStatus::NOT_IMPLEMENTED))
    ));
    assert_eq!(engine.call_count("register_value"), 1);
}

#[test]
fn test_output_goes_through_engine()
{
    let engine = SimulatedEngine::new();
    let session = attach(&engine);

    session.registers().unwrap().output().unwrap();
    let log = engine.output_log();
    assert_eq!(log.len(), 1);
    assert!(log[0].contains("rax=0x0000000000000000"));
    assert!(log[0].contains("efl=0x00000246"));
}

#[test]
fn test_32bit_register_file()
{
    let session = attach(&SimulatedEngine::new_32bit());
    let bank = session.registers().unwrap();

    assert_eq!(bank.value_by_name("EIP").unwrap(), RegisterValue::Int32(0x8000_1000));
    assert_eq!(bank.value_by_name("esp").unwrap().as_u64(), 0x8000_0f00);
}
