//! # Platform Backends
//!
//! Native debugging engines behind [`DebugEngine`](crate::engine::DebugEngine).
//!
//! - **Windows**: `dbgeng.dll` through its COM interfaces
//!
//! Other platforms have no kernel debugging engine;
//! [`create_engine`](crate::engine::create_engine) reports them as unsupported.

#[cfg(windows)]
pub mod windows;
