//! The single-file legacy contexts variant
//!
//! Taken when the property path is a regular file rather than a
//! directory: one area holds every name, and that same area carries the
//! global serial.

use std::path::Path;
use std::sync::Arc;

use crate::area::{PropArea, PropInfo};
use crate::contexts::ContextNode;
use crate::errors::InitError;

/// One legacy area for every property name.
pub struct ContextsPreSplit {
    node: ContextNode,
}

impl ContextsPreSplit {
    pub(crate) fn open(file: &Path) -> Result<Self, InitError> {
        let node = ContextNode::new("legacy".to_string(), file.to_path_buf(), false);
        node.area()
            .ok_or(InitError::InvalidArea("property area unavailable"))?;
        Ok(Self { node })
    }

    pub(crate) fn area_for_name(&self, _name: &str) -> Option<Arc<PropArea>> {
        self.node.area()
    }

    pub(crate) fn serial_area(&self) -> Option<Arc<PropArea>> {
        self.node.area()
    }

    pub(crate) fn for_each(&self, f: &mut dyn FnMut(&Arc<PropArea>, &PropInfo)) {
        if let Some(area) = self.node.area() {
            area.foreach(&mut |info| f(&area, info));
        }
    }

    pub(crate) fn reset_access(&self) {
        self.node.reset();
    }
}
