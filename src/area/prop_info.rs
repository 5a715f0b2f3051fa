//! The fixed-size property record
//!
//! A record holds one property's name, its inline value, the seqlock
//! serial, and (for long read-only values) the slab offset of the
//! out-of-line value. Records are created once and never move, so their
//! offsets stay valid for the lifetime of the area.

use std::cell::UnsafeCell;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::constants::{PROP_NAME_MAX, PROP_VALUE_MAX};
use crate::serial::Serial;

/// Inline value stored for long read-only properties.
///
/// The real value lives out-of-line; legacy readers that copy the inline
/// buffer see this message instead of a truncated value.
pub const LONG_VALUE_PLACEHOLDER: &str = "use read_callback() to access this property value";

/// One property record inside a mapped area.
///
/// The name, flags, and long-value offset are immutable after creation.
/// The serial word and the inline value mutate under the seqlock
/// protocol; only [`crate::area::PropArea`] touches them directly.
#[repr(C)]
pub struct PropInfo {
    serial: AtomicU32,
    value: UnsafeCell<[u8; PROP_VALUE_MAX]>,
    name: [u8; PROP_NAME_MAX],
    long_offset: u32,
}

// The inline value is only written by the single writer under the
// seqlock protocol; readers copy it through raw pointers and validate
// against the serial.
unsafe impl Sync for PropInfo {}

// Record offsets are computed from this size; it must not drift.
const _: () = assert!(mem::size_of::<PropInfo>() == 132);

impl PropInfo {
    /// Record size in the slab.
    pub(crate) const SIZE: u32 = mem::size_of::<PropInfo>() as u32;

    /// Initialize a record in freshly allocated (zeroed) slab memory.
    ///
    /// # Safety
    /// `base` must point at `SIZE` zeroed bytes, 4-aligned, not yet
    /// published to any reader. `name` and `value` must fit their fields.
    pub(crate) unsafe fn init_at(
        base: *mut u8,
        name: &str,
        value: &[u8],
        long_offset: u32,
        serial: Serial,
    ) {
        debug_assert!(name.len() < PROP_NAME_MAX);
        debug_assert!(value.len() < PROP_VALUE_MAX);

        let info = base as *mut PropInfo;
        let vdst = (*info).value.get() as *mut u8;
        ptr::copy_nonoverlapping(value.as_ptr(), vdst, value.len());
        *vdst.add(value.len()) = 0;

        let ndst = ptr::addr_of_mut!((*info).name) as *mut u8;
        ptr::copy_nonoverlapping(name.as_ptr(), ndst, name.len());
        *ndst.add(name.len()) = 0;

        ptr::addr_of_mut!((*info).long_offset).write(long_offset);
        (*info).serial.store(serial.raw(), Ordering::Relaxed);
    }

    /// The record's serial word.
    #[inline]
    pub fn serial(&self) -> &AtomicU32 {
        &self.serial
    }

    /// Load and decode the serial word.
    #[inline]
    pub fn load_serial(&self, order: Ordering) -> Serial {
        Serial::new(self.serial.load(order))
    }

    /// The property name.
    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PROP_NAME_MAX - 1);
        std::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    /// Whether the value is stored out-of-line.
    ///
    /// The long flag is set at creation and never changes, so a relaxed
    /// load suffices.
    #[inline]
    pub fn is_long(&self) -> bool {
        self.load_serial(Ordering::Relaxed).is_long()
    }

    /// Raw pointer to the inline value buffer.
    #[inline]
    pub(crate) fn value_ptr(&self) -> *mut u8 {
        self.value.get() as *mut u8
    }

    /// Area offset of the out-of-line value, 0 when absent.
    #[inline]
    pub(crate) fn long_offset(&self) -> u32 {
        self.long_offset
    }
}
