//! Routing of property names to the areas that own them
//!
//! Three variants share one capability set: resolve the area for a
//! name, expose the distinguished serial area, enumerate every area,
//! and drop cached access. The variant is chosen from the shape of the
//! property path at initialization:
//! - a directory containing `property_info` selects [`ContextsSerialized`]
//! - a directory without it selects [`ContextsSplit`]
//! - a regular file selects [`ContextsPreSplit`]

mod pre_split;
mod prefix_map;
mod serialized;
mod split;

pub use pre_split::ContextsPreSplit;
pub use serialized::ContextsSerialized;
pub use split::ContextsSplit;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::area::{PropArea, PropInfo};
use crate::constants::PROPERTY_INFO_FILE;
use crate::errors::InitError;

/// One security context and its lazily mapped area.
///
/// The handle cache is process-local; dropping it (via an access reset)
/// forces the next access to re-open the backing file and thereby
/// re-evaluate filesystem permissions.
pub(crate) struct ContextNode {
    context: String,
    path: PathBuf,
    writable: bool,
    area: RwLock<Option<Arc<PropArea>>>,
}

impl ContextNode {
    pub(crate) fn new(context: String, path: PathBuf, writable: bool) -> Self {
        Self {
            context,
            path,
            writable,
            area: RwLock::new(None),
        }
    }

    /// A node whose area was just created by the writer; the handle is
    /// pre-cached so the writer does not re-open its own file.
    pub(crate) fn with_area(context: String, path: PathBuf, area: Arc<PropArea>) -> Self {
        Self {
            context,
            path,
            writable: true,
            area: RwLock::new(Some(area)),
        }
    }

    pub(crate) fn context(&self) -> &str {
        &self.context
    }

    /// The mapped area, opening it on first access.
    pub(crate) fn area(&self) -> Option<Arc<PropArea>> {
        if let Some(area) = self.area.read().as_ref() {
            return Some(Arc::clone(area));
        }
        let mut guard = self.area.write();
        if guard.is_none() {
            let opened = if self.writable {
                PropArea::open_rw(&self.path)
            } else {
                PropArea::open_ro(&self.path)
            };
            match opened {
                Ok(pa) => *guard = Some(Arc::new(pa)),
                Err(err) => {
                    warn!(
                        "unable to map property area {}: {err}",
                        self.path.display()
                    );
                    return None;
                }
            }
        }
        guard.as_ref().map(Arc::clone)
    }

    pub(crate) fn reset(&self) {
        *self.area.write() = None;
    }
}

/// The routing layer owned by the store: one of the three variants.
pub enum Contexts {
    /// Modern table-driven routing from the `property_info` side-table.
    Serialized(ContextsSerialized),
    /// One area per prefix, discovered from `property_contexts`.
    Split(ContextsSplit),
    /// A single legacy area for every name.
    PreSplit(ContextsPreSplit),
}

impl Contexts {
    /// Choose and initialize a variant from the shape of `path`.
    pub fn open(path: &Path) -> Result<Self, InitError> {
        if path.is_dir() {
            if path.join(PROPERTY_INFO_FILE).is_file() {
                Ok(Self::Serialized(ContextsSerialized::open(path)?))
            } else {
                Ok(Self::Split(ContextsSplit::open(path)?))
            }
        } else {
            Ok(Self::PreSplit(ContextsPreSplit::open(path)?))
        }
    }

    /// Writer-side initialization: create, size, and label every area
    /// named by the `property_info` table under `dir`.
    ///
    /// Returns the contexts and whether any labeling step failed.
    pub fn create_serialized(dir: &Path) -> Result<(Self, bool), InitError> {
        let (contexts, fsetxattr_failed) = ContextsSerialized::create(dir)?;
        Ok((Self::Serialized(contexts), fsetxattr_failed))
    }

    /// The area owning `name`, or `None` when routing denies it.
    pub fn area_for_name(&self, name: &str) -> Option<Arc<PropArea>> {
        match self {
            Self::Serialized(c) => c.area_for_name(name),
            Self::Split(c) => c.area_for_name(name),
            Self::PreSplit(c) => c.area_for_name(name),
        }
    }

    /// The distinguished area whose serial backs any-change waits.
    pub fn serial_area(&self) -> Option<Arc<PropArea>> {
        match self {
            Self::Serialized(c) => c.serial_area(),
            Self::Split(c) => c.serial_area(),
            Self::PreSplit(c) => c.serial_area(),
        }
    }

    /// Visit every record in every reachable area exactly once.
    pub fn for_each(&self, f: &mut dyn FnMut(&Arc<PropArea>, &PropInfo)) {
        match self {
            Self::Serialized(c) => c.for_each(f),
            Self::Split(c) => c.for_each(f),
            Self::PreSplit(c) => c.for_each(f),
        }
    }

    /// Drop every cached mapping handle so the next access re-evaluates
    /// permissions.
    pub fn reset_access(&self) {
        match self {
            Self::Serialized(c) => c.reset_access(),
            Self::Split(c) => c.reset_access(),
            Self::PreSplit(c) => c.reset_access(),
        }
    }
}

/// Enumerate every record of every openable node.
fn for_each_node(nodes: &[ContextNode], f: &mut dyn FnMut(&Arc<PropArea>, &PropInfo)) {
    for node in nodes {
        if let Some(area) = node.area() {
            area.foreach(&mut |info| f(&area, info));
        }
    }
}
