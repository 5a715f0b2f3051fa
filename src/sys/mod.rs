//! Thin shims over the OS primitives the store is built on: shared
//! memory mappings, futex wait/wake, extended-attribute labeling, and
//! errno preservation.

mod errno;
mod futex;
mod mapping;

pub(crate) use errno::ErrnoGuard;
pub(crate) use futex::{futex_wait, futex_wake_all};
pub(crate) use mapping::MapHandle;
