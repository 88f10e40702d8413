//! # COM Plumbing
//!
//! Raw interface pointers, vtable calls by ordinal, and the interface ids the
//! engine hands out.
//!
//! DbgEng interfaces are plain COM: the first pointer-sized field of every
//! object is its vtable, and methods are called by their position in it
//! (0-2 are `QueryInterface`, `AddRef`, `Release`). Ordinals are listed next
//! to the call sites.
//!
//! ## Safety Notes
//!
//! A vtable call is only sound if the function type given at the call site
//! matches the engine's declaration exactly. Every such type lives in this
//! module or next to its single caller.

use std::ffi::c_void;
use std::ptr::{self, NonNull};

use windows_sys::core::{GUID, HRESULT};

use crate::error::{EngineResult, EngineStatus};

pub(super) const IID_IUNKNOWN: GUID = GUID::from_u128(0x0000_0000_0000_0000_c000_0000_0000_0046);
pub(super) const IID_IDEBUG_CLIENT: GUID = GUID::from_u128(0x27fe_5639_8407_4f47_8364_ee11_8fb0_8ac8);
pub(super) const IID_IDEBUG_CONTROL: GUID = GUID::from_u128(0x5182_e668_105e_416e_ad92_24ef_8004_24ba);
pub(super) const IID_IDEBUG_REGISTERS: GUID = GUID::from_u128(0xce28_9126_9e84_45a7_937e_67bb_1869_1493);
pub(super) const IID_IDEBUG_SYSTEM_OBJECTS: GUID = GUID::from_u128(0x6b86_fe2c_2c4f_4f0c_9da2_1743_11ac_c327);
pub(super) const IID_IDEBUG_SYMBOLS: GUID = GUID::from_u128(0x8c31_e98c_983a_48a5_9016_6fe5_d667_a950);
pub(super) const IID_IDEBUG_DATA_SPACES: GUID = GUID::from_u128(0x88f7_dfab_3ea7_4c3a_aefb_c4e8_1061_73aa);
pub(super) const IID_IDEBUG_EVENT_CALLBACKS: GUID = GUID::from_u128(0x337b_e28b_5036_4d72_b6bf_c45f_bb9f_2eaa);
pub(super) const IID_IDEBUG_OUTPUT_CALLBACKS: GUID = GUID::from_u128(0x4bf5_8045_d654_4c40_b0af_6830_90f3_56dc);

type QueryInterfaceFn = unsafe extern "system" fn(*mut c_void, *const GUID, *mut *mut c_void) -> HRESULT;
type ReleaseFn = unsafe extern "system" fn(*mut c_void) -> u32;

#[link(name = "dbgeng")]
extern "system" {
    /// Create a new engine client implementing `interface_id`.
    fn DebugCreate(interface_id: *const GUID, interface: *mut *mut c_void) -> HRESULT;
}

pub(super) fn guid_eq(a: &GUID, b: &GUID) -> bool
{
    a.data1 == b.data1 && a.data2 == b.data2 && a.data3 == b.data3 && a.data4 == b.data4
}

/// Owned reference to a COM interface. Released on drop.
#[derive(Debug)]
pub(super) struct ComPtr(NonNull<c_void>);

impl ComPtr
{
    /// Create the root `IDebugClient`.
    pub(super) fn create_client() -> EngineResult<Self>
    {
        let mut raw = ptr::null_mut();
        // SAFETY: `raw` is a valid out pointer for the duration of the call.
        EngineStatus::check(unsafe { DebugCreate(&IID_IDEBUG_CLIENT, &mut raw) })?;
        // SAFETY: on success the engine returned an owned reference.
        unsafe { Self::from_raw(raw) }.ok_or(EngineStatus::FAIL)
    }

    /// Take ownership of a reference returned by the engine.
    ///
    /// ## Safety
    ///
    /// `raw` must be null or an owned COM interface pointer.
    pub(super) unsafe fn from_raw(raw: *mut c_void) -> Option<Self>
    {
        NonNull::new(raw).map(Self)
    }

    pub(super) fn as_raw(&self) -> *mut c_void
    {
        self.0.as_ptr()
    }

    /// Fetch vtable entry `ordinal`.
    ///
    /// ## Safety
    ///
    /// `F` must be the exact function pointer type of that entry, and the
    /// interface must have at least `ordinal + 1` methods.
    pub(super) unsafe fn method<F: Copy>(&self, ordinal: usize) -> F
    {
        // SAFETY: guaranteed by the caller.
        unsafe { vtable_entry(self.as_raw(), ordinal) }
    }

    /// Ask for another interface of the same object.
    pub(super) fn query_interface(&self, iid: &GUID) -> EngineResult<Self>
    {
        let mut raw = ptr::null_mut();
        // SAFETY: ordinal 0 of every COM interface is QueryInterface.
        let query: QueryInterfaceFn = unsafe { self.method(0) };
        // SAFETY: `raw` is a valid out pointer for the duration of the call.
        EngineStatus::check(unsafe { query(self.as_raw(), iid, &mut raw) })?;
        // SAFETY: on success QueryInterface returns an owned reference.
        unsafe { Self::from_raw(raw) }.ok_or(EngineStatus::NO_INTERFACE)
    }
}

impl Drop for ComPtr
{
    fn drop(&mut self)
    {
        // SAFETY: ordinal 2 of every COM interface is Release, and this
        // wrapper holds exactly one reference.
        unsafe {
            let release: ReleaseFn = self.method(2);
            release(self.as_raw());
        }
    }
}

/// Fetch vtable entry `ordinal` of a borrowed interface pointer.
///
/// ## Safety
///
/// `object` must be a live COM interface pointer and `F` the exact type of
/// the entry.
pub(super) unsafe fn vtable_entry<F: Copy>(object: *mut c_void, ordinal: usize) -> F
{
    // SAFETY: guaranteed by the caller.
    unsafe {
        let vtable = *(object as *const *const usize);
        let slot = *vtable.add(ordinal);
        std::mem::transmute_copy::<usize, F>(&slot)
    }
}

/// Convert a raw status, letting `S_FALSE` through as `false`.
pub(super) fn check_bool(raw: HRESULT) -> EngineResult<bool>
{
    match EngineStatus(raw) {
        EngineStatus::OK => Ok(true),
        EngineStatus::FALSE => Ok(false),
        status => Err(status),
    }
}
