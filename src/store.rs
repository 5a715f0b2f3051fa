//! The property store façade
//!
//! [`PropertyStore`] ties the routing layer, the mapped areas, and the
//! wait primitives together behind the public API. A process holds one
//! instance, initialized once during startup; initialization is
//! idempotent and leaves the caller's errno untouched.
//!
//! All entrypoints report failure as values. Routing denials and
//! missing areas are fatal for the call, never for the store.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{error, warn};

use crate::area::{is_read_only, PropArea, PropInfo};
use crate::constants::{PROP_NAME_MAX, PROP_VALUE_MAX};
use crate::contexts::Contexts;
use crate::errors::{InitError, StoreError};
use crate::sys::{futex_wait, futex_wake_all, ErrnoGuard};

/// Report returned by [`PropertyStore::area_init`].
#[derive(Debug, Clone, Copy)]
pub struct AreaInit {
    /// Whether any extended-attribute labeling step failed. Area
    /// creation itself succeeded; the caller decides whether unlabeled
    /// areas are acceptable.
    pub fsetxattr_failed: bool,
}

/// A handle to one property record.
///
/// Keeps the owning area mapped for as long as the handle lives, so it
/// stays valid across an access reset. Obtained from
/// [`PropertyStore::find`] and consumed by the read, update, and wait
/// entrypoints.
#[derive(Clone)]
pub struct PropRef {
    area: Arc<PropArea>,
    offset: u32,
}

impl PropRef {
    fn new(area: Arc<PropArea>, info: &PropInfo) -> Self {
        let offset = area.offset_of(info);
        Self { area, offset }
    }

    #[inline]
    fn info(&self) -> &PropInfo {
        // The offset came from a successful lookup in this same area.
        unsafe { self.area.info_at_unchecked(self.offset) }
    }

    /// The property name.
    pub fn name(&self) -> &str {
        self.info().name()
    }

    /// The record's current raw serial word.
    pub fn serial(&self) -> u32 {
        self.info()
            .serial()
            .load(Ordering::Acquire)
    }

    /// Whether the property is read-only (`ro.`-prefixed).
    pub fn is_read_only(&self) -> bool {
        is_read_only(self.name())
    }
}

impl std::fmt::Debug for PropRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropRef")
            .field("name", &self.name())
            .field("offset", &self.offset)
            .finish()
    }
}

/// The process-local property store.
///
/// Holds the routing layer; all property data lives in the shared
/// mappings. There is exactly one writer process per store directory;
/// the design does not detect concurrent writers.
pub struct PropertyStore {
    contexts: RwLock<Option<Arc<Contexts>>>,
}

impl PropertyStore {
    /// An uninitialized store. Every operation except [`init`] and
    /// [`area_init`] fails until one of them succeeds.
    ///
    /// [`init`]: Self::init
    /// [`area_init`]: Self::area_init
    pub const fn new() -> Self {
        Self {
            contexts: RwLock::new(None),
        }
    }

    fn contexts(&self) -> Option<Arc<Contexts>> {
        self.contexts.read().clone()
    }

    /// Initialize the store for reading from `path`.
    ///
    /// Idempotent: a second call resets cached access grants instead of
    /// re-initializing. The caller's errno is identical on return to
    /// its value on entry, success or failure.
    pub fn init(&self, path: &Path) -> Result<(), InitError> {
        let _errno = ErrnoGuard::new();

        if let Some(contexts) = self.contexts() {
            contexts.reset_access();
            return Ok(());
        }

        let contexts = Contexts::open(path)?;
        let mut guard = self.contexts.write();
        if let Some(existing) = guard.as_ref() {
            // Lost the init race to another thread; defer to it.
            existing.reset_access();
        } else {
            *guard = Some(Arc::new(contexts));
        }
        Ok(())
    }

    /// Writer-side initialization: create and label every area named by
    /// the routing table under `path`.
    ///
    /// Labeling failure is reported via [`AreaInit::fsetxattr_failed`]
    /// rather than an error, so the caller can decide its severity.
    pub fn area_init(&self, path: &Path) -> Result<AreaInit, InitError> {
        let (contexts, fsetxattr_failed) = Contexts::create_serialized(path)?;
        *self.contexts.write() = Some(Arc::new(contexts));
        Ok(AreaInit { fsetxattr_failed })
    }

    /// The global area-serial, used as the baseline for
    /// [`wait_any`](Self::wait_any).
    pub fn area_serial(&self) -> Option<u32> {
        let contexts = self.contexts()?;
        let serial_area = contexts.serial_area()?;
        Some(serial_area.serial().load(Ordering::Acquire))
    }

    /// Look up a property by name.
    pub fn find(&self, name: &str) -> Option<PropRef> {
        let contexts = self.contexts()?;
        let Some(area) = contexts.area_for_name(name) else {
            warn!("access denied finding property \"{name}\"");
            return None;
        };
        let info = area.find(name)?;
        Some(PropRef::new(Arc::clone(&area), info))
    }

    /// Read a property's value by name.
    ///
    /// Returns the empty string when the name is unknown, so callers
    /// can use it unconditionally.
    pub fn get(&self, name: &str) -> String {
        match self.find(name) {
            Some(pr) => self.read(&pr).0,
            None => String::new(),
        }
    }

    /// Read a record's value and the serial identifying its epoch.
    ///
    /// Lock-free: the bytes returned belong to exactly one update
    /// epoch, the one named by the returned serial.
    pub fn read(&self, pr: &PropRef) -> (String, u32) {
        let info = pr.info();
        if is_read_only(info.name()) && info.is_long() {
            error!(
                "the value of property \"{}\" is too large for read()/get(); \
                 use read_callback() instead",
                info.name()
            );
        }
        let mut buf = [0u8; PROP_VALUE_MAX];
        let serial = pr.area.read_value(info, &mut buf);
        let value = String::from_utf8_lossy(&buf[..serial.value_len()]).into_owned();
        (value, serial.raw())
    }

    /// Read a record's value through a callback.
    ///
    /// Read-only properties never change, so their value (inline or
    /// long) is passed to the callback straight from the mapping with
    /// no temporary copy; mutable properties go through the seqlock.
    pub fn read_callback<F>(&self, pr: &PropRef, callback: F)
    where
        F: FnOnce(&str, &str, u32),
    {
        let info = pr.info();
        if is_read_only(info.name()) {
            let serial = info.load_serial(Ordering::Relaxed);
            if info.is_long() {
                if let Some(long) = pr.area.long_value(info) {
                    callback(info.name(), long, serial.raw());
                    return;
                }
            }
            // Quiescent forever; borrow the inline bytes directly.
            let value = unsafe {
                let len = serial.value_len().min(PROP_VALUE_MAX - 1);
                let bytes = std::slice::from_raw_parts(info.value_ptr() as *const u8, len);
                std::str::from_utf8(bytes).unwrap_or("")
            };
            callback(info.name(), value, serial.raw());
            return;
        }

        let mut buf = [0u8; PROP_VALUE_MAX];
        let serial = pr.area.read_value(info, &mut buf);
        let value = std::str::from_utf8(&buf[..serial.value_len()]).unwrap_or("");
        callback(info.name(), value, serial.raw());
    }

    /// Create a new property.
    ///
    /// On success the owning area's serial advances and any-change
    /// waiters wake.
    pub fn add(&self, name: &str, value: &str) -> Result<(), StoreError> {
        if name.is_empty() || name.len() >= PROP_NAME_MAX {
            return Err(StoreError::InvalidName);
        }
        if value.len() >= PROP_VALUE_MAX && !is_read_only(name) {
            return Err(StoreError::ValueTooLong);
        }
        let contexts = self.contexts().ok_or(StoreError::Uninitialized)?;
        let serial_area = contexts.serial_area().ok_or(StoreError::Uninitialized)?;
        let area = contexts.area_for_name(name).ok_or_else(|| {
            error!("access denied adding property \"{name}\"");
            StoreError::AccessDenied
        })?;

        area.add(name, value)?;

        // The single mutator still publishes with release ordering so a
        // waiter observing the new area-serial also observes the add.
        Self::bump_area_serial(&serial_area);
        Ok(())
    }

    /// Update an existing mutable property through the writer protocol.
    pub fn update(&self, pr: &PropRef, value: &str) -> Result<(), StoreError> {
        if value.len() >= PROP_VALUE_MAX {
            return Err(StoreError::ValueTooLong);
        }
        if pr.is_read_only() {
            return Err(StoreError::ReadOnly);
        }
        let contexts = self.contexts().ok_or(StoreError::Uninitialized)?;
        let serial_area = contexts.serial_area().ok_or(StoreError::Uninitialized)?;

        pr.area.update_value(pr.info(), value)?;
        futex_wake_all(pr.info().serial());
        Self::bump_area_serial(&serial_area);
        Ok(())
    }

    fn bump_area_serial(serial_area: &PropArea) {
        let serial = serial_area.serial();
        serial.store(
            serial.load(Ordering::Relaxed).wrapping_add(1),
            Ordering::Release,
        );
        futex_wake_all(serial);
    }

    /// Block until a serial advances past `old_serial`.
    ///
    /// With a record handle, waits on that record's serial; with
    /// `None`, waits on the global area-serial. Returns the new serial,
    /// or `None` when the relative `timeout` expires. Spurious wakes
    /// are absorbed by rechecking the serial.
    pub fn wait(
        &self,
        pr: Option<&PropRef>,
        old_serial: u32,
        timeout: Option<Duration>,
    ) -> Option<u32> {
        let serial_area = match pr {
            Some(_) => None,
            None => {
                let contexts = self.contexts()?;
                Some(contexts.serial_area()?)
            }
        };
        let word = match (pr, serial_area.as_ref()) {
            (Some(pr), _) => pr.info().serial(),
            (None, Some(area)) => area.serial(),
            (None, None) => return None,
        };

        loop {
            if !futex_wait(word, old_serial, timeout) {
                return None;
            }
            let new_serial = word.load(Ordering::Acquire);
            if new_serial != old_serial {
                return Some(new_serial);
            }
        }
    }

    /// Block until any property in the store changes.
    pub fn wait_any(&self, old_serial: u32) -> Option<u32> {
        self.wait(None, old_serial, None)
    }

    /// The `n`-th property in enumeration order.
    ///
    /// Order is the areas' DFS order: stable for a given store state
    /// but not across adds. Linear cost; intended for inspection tools.
    pub fn find_nth(&self, n: usize) -> Option<PropRef> {
        let mut result = None;
        let mut index = 0;
        self.foreach(|pr| {
            if index == n && result.is_none() {
                result = Some(pr.clone());
            }
            index += 1;
        })
        .ok()?;
        result
    }

    /// Visit every property in every reachable area exactly once.
    pub fn foreach<F: FnMut(&PropRef)>(&self, mut f: F) -> Result<(), StoreError> {
        let contexts = self.contexts().ok_or(StoreError::Uninitialized)?;
        contexts.for_each(&mut |area, info| {
            let pr = PropRef::new(Arc::clone(area), info);
            f(&pr);
        });
        Ok(())
    }
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::new()
    }
}
