//! # Windows Backend
//!
//! Kernel debugging through the Debugger Engine (`dbgeng.dll`), the engine
//! behind WinDbg and KD.
//!
//! The engine is only reachable through COM, so this backend talks to it at
//! the vtable level: [`com`] holds the pointer plumbing and interface ids,
//! [`callbacks`] the objects the engine calls back into, and [`client`] the
//! [`DebugEngine`](crate::engine::DebugEngine) implementation.
//!
//! ## Requirements
//!
//! - `dbgeng.dll` on the loader path (ships with Windows and with the
//!   Debugging Tools for Windows; the latter is needed for network KDNET)
//! - a target configured for kernel debugging (`bcdedit /debug on`)

mod callbacks;
mod client;
mod com;

pub use client::DbgEngClient;
