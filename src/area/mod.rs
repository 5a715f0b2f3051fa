//! Memory-mapped property areas
//!
//! A property area is one shared mapping holding a header, a radix index
//! over property names, and an append-only slab of records. Areas are
//! created once by the writer and then mapped read-only by every other
//! process; records are never relocated or freed.

mod prop_area;
mod prop_info;
mod trie;

pub use prop_area::PropArea;
pub use prop_info::{PropInfo, LONG_VALUE_PLACEHOLDER};

/// Whether a property name is read-only.
///
/// `ro.`-prefixed properties are set once and never updated; their values
/// may exceed the inline cap.
#[inline]
pub fn is_read_only(name: &str) -> bool {
    name.starts_with("ro.")
}
