//! oxiprops - a shared-memory system property store
//!
//! A process-wide registry of short `(name, value)` strings backed by
//! memory-mapped files, providing:
//! - **Lock-free reads**: readers observe torn-free value snapshots under a
//!   concurrent writer via a per-record seqlock, without ever taking a lock
//! - **Change notification**: kernel-assisted futex waits that block until a
//!   named property (or the store as a whole) changes
//! - **Context routing**: property names dispatch by longest prefix match
//!   to per-security-context mappings with distinct access controls
//!
//! There is exactly one writer process; readers are unbounded. The store
//! relies on filesystem permissions on the backing files for access control.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use oxiprops::PropertyStore;
//!
//! // Writer process: create and label the property areas
//! let store = PropertyStore::new();
//! store.area_init(Path::new("/dev/__properties__"))?;
//! store.add("net.dns1", "8.8.8.8")?;
//!
//! // Any process: read without locking
//! let store = PropertyStore::new();
//! store.init(Path::new("/dev/__properties__"))?;
//! assert_eq!(store.get("net.dns1"), "8.8.8.8");
//! ```

#![warn(missing_docs)]

pub mod area;
pub mod contexts;
pub mod errors;
pub mod serial;
pub mod store;
mod sys;

// Re-exports for convenience
pub use errors::{InitError, StoreError};
pub use serial::Serial;
pub use store::{AreaInit, PropRef, PropertyStore};

/// Constants used throughout the library
pub mod constants {
    /// Maximum property name length, including the NUL terminator
    pub const PROP_NAME_MAX: usize = 32;

    /// Maximum mutable property value length, including the NUL terminator
    pub const PROP_VALUE_MAX: usize = 92;

    /// Size of one property area backing file (128 KB)
    pub const PROP_AREA_SIZE: usize = 128 * 1024;

    /// Magic word at the head of every property area
    pub const PROP_AREA_MAGIC: u32 = 0x504f_5250;

    /// Property area layout version
    pub const PROP_AREA_VERSION: u32 = 1;

    /// Name of the prefix-routing table inside the property directory
    pub const PROPERTY_INFO_FILE: &str = "property_info";

    /// Name of the legacy per-prefix context listing
    pub const PROPERTY_CONTEXTS_FILE: &str = "property_contexts";

    /// Name of the dedicated serial area backing file
    pub const PROPERTIES_SERIAL_FILE: &str = "properties_serial";
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::errors::{InitError, StoreError};
    pub use crate::serial::Serial;
    pub use crate::store::{PropRef, PropertyStore};
}
