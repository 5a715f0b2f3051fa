//! Shared setup for the integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::Path;

use oxiprops::PropertyStore;

/// Routing table used by most tests: a few specific prefixes plus a
/// catch-all.
pub const DEFAULT_INFO: &str = r#"
[[prefixes]]
prefix = "net."
context = "net_prop"

[[prefixes]]
prefix = "persist.sys.usb."
context = "usb_prop"

[[prefixes]]
prefix = "persist."
context = "persist_prop"

[[prefixes]]
prefix = "ro."
context = "build_prop"

[[prefixes]]
prefix = ""
context = "default_prop"
"#;

pub fn write_info_table(dir: &Path) {
    fs::write(dir.join("property_info"), DEFAULT_INFO).unwrap();
}

/// Create the writer-side store: routing table plus freshly created,
/// writable areas.
pub fn writer_store(dir: &Path) -> PropertyStore {
    write_info_table(dir);
    let store = PropertyStore::new();
    store.area_init(dir).unwrap();
    store
}

/// Create a reader-side store over areas some writer already created.
pub fn reader_store(dir: &Path) -> PropertyStore {
    let store = PropertyStore::new();
    store.init(dir).unwrap();
    store
}
