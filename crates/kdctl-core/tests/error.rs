//! Tests for error handling

use kdctl_core::error::{EngineStatus, KdError, KdResult};
use kdctl_core::events::ExceptionRecord;

#[test]
fn test_engine_call_failure_shows_status()
{
    let error = KdError::EngineCallFailure(EngineStatus::FAIL);
    let message = format!("{}", error);
    assert!(message.contains("0x80004005"));
}

#[test]
fn test_engine_status_converts_into_call_failure()
{
    let error: KdError = EngineStatus::NO_INTERFACE.into();
    match error {
        KdError::EngineCallFailure(status) => assert_eq!(status, EngineStatus::NO_INTERFACE),
        _ => panic!("Expected EngineCallFailure variant"),
    }
}

#[test]
fn test_unknown_register_names_the_register()
{
    let error = KdError::UnknownRegister("r99".to_string());
    assert_eq!(format!("{}", error), "Unknown register <r99>");
}

#[test]
fn test_register_errors_carry_index_and_kind()
{
    let message = format!("{}", KdError::UnsupportedRegisterType { index: 12, kind: 7 });
    assert!(message.contains("12"));
    assert!(message.contains('7'));

    let message = format!("{}", KdError::InvalidRegisterValue { index: 3 });
    assert!(message.contains("Register 3"));
}

#[test]
fn test_buffer_size_mismatch_names_the_query()
{
    let error = KdError::BufferSizeMismatch {
        query: "register name",
        first: 4,
        second: 5,
    };
    let message = format!("{}", error);
    assert!(message.starts_with("register name"));
    assert!(message.contains("4 bytes"));
    assert!(message.contains("5 bytes"));
}

#[test]
fn test_unknown_event_type_is_hex()
{
    assert_eq!(format!("{}", KdError::UnknownEventType(0x3)), "Unknown event type 0x00000003");
}

#[test]
fn test_unhandled_exception_describes_record()
{
    let record = ExceptionRecord {
        code: 0xc000_0005,
        flags: 0,
        nested_record: 0,
        address: 0xffff_f800_1234_5678,
        information: vec![1, 0],
        first_chance: true,
    };
    let message = format!("{}", KdError::UnhandledException(record));
    assert!(message.contains("0xc0000005"));
    assert!(message.contains("0xfffff80012345678"));
    assert!(message.contains("first chance"));
}

#[test]
fn test_stack_capture_truncated_reports_capacity()
{
    let message = format!("{}", KdError::StackCaptureTruncated { capacity: 900 });
    assert!(message.contains("900"));
}

#[test]
fn test_breakpoint_errors_include_id()
{
    assert!(format!("{}", KdError::DoubleBindBreakpoint(4)).contains('4'));
    assert!(format!("{}", KdError::BreakpointIdNotFound(9)).contains('9'));
    assert!(format!("{}", KdError::BreakpointRegistryDesync(17)).contains("17"));
}

#[test]
fn test_result_type_alias()
{
    fn detached() -> KdResult<()>
    {
        Err(KdError::SessionDetached)
    }

    assert!(matches!(detached(), Err(KdError::SessionDetached)));
}
