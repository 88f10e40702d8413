//! Two-phase sized queries.
//!
//! Variable-length engine data is fetched in two calls: one with no buffer
//! to learn the size, one with a buffer of exactly that size. The engine must
//! report the same size both times.

use crate::error::{EngineResult, KdError, KdResult};

/// Run a sized query and return the filled buffer.
///
/// `call` receives `None` for the sizing call and the allocated buffer for the
/// filling call, and returns the size the engine reported each time.
///
/// ## Errors
///
/// - `EngineCallFailure`: either call failed
/// - `BufferSizeMismatch`: the two calls disagreed on the size
pub(crate) fn sized_query<F>(query: &'static str, mut call: F) -> KdResult<Vec<u8>>
where
    F: FnMut(Option<&mut [u8]>) -> EngineResult<usize>,
{
    let first = call(None)?;
    let mut buffer = vec![0u8; first];
    let second = call(Some(&mut buffer))?;
    if second != first {
        return Err(KdError::BufferSizeMismatch { query, first, second });
    }
    Ok(buffer)
}

/// Text from a fixed buffer, with trailing NUL padding removed.
pub(crate) fn trim_padding(bytes: &[u8]) -> String
{
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |last| last + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::error::EngineStatus;

    #[test]
    fn sized_query_allocates_reported_size()
    {
        let result = sized_query("test", |buffer| {
            if let Some(buffer) = buffer {
                buffer.copy_from_slice(b"rip\0");
            }
            Ok(4)
        })
        .unwrap();
        assert_eq!(result, b"rip\0");
    }

    #[test]
    fn sized_query_rejects_changed_size()
    {
        let mut calls = 0;
        let result = sized_query("test", |_| {
            calls += 1;
            Ok(if calls == 1 { 4 } else { 6 })
        });
        assert!(matches!(
            result,
            Err(KdError::BufferSizeMismatch { first: 4, second: 6, .. })
        ));
    }

    #[test]
    fn sized_query_propagates_engine_failure()
    {
        let result = sized_query("test", |_| Err(EngineStatus::FAIL));
        assert!(matches!(result, Err(KdError::EngineCallFailure(EngineStatus::FAIL))));
    }

    #[test]
    fn trim_padding_strips_trailing_nuls_only()
    {
        assert_eq!(trim_padding(b"Break instruction\0\0\0"), "Break instruction");
        assert_eq!(trim_padding(b"\0\0"), "");
        assert_eq!(trim_padding(b""), "");
    }
}
