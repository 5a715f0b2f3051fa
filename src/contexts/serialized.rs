//! The modern, table-driven contexts variant
//!
//! The property directory carries a `property_info` side-table mapping
//! name prefixes to context identifiers. One area file per context
//! lives next to it, plus a dedicated `properties_serial` area backing
//! any-change waits.
//!
//! Table format (TOML):
//!
//! ```toml
//! [[prefixes]]
//! prefix = "net."
//! context = "net_prop"
//!
//! [[prefixes]]
//! prefix = ""            # catch-all
//! context = "default_prop"
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::area::{PropArea, PropInfo};
use crate::constants::{PROPERTIES_SERIAL_FILE, PROPERTY_INFO_FILE, PROP_AREA_SIZE};
use crate::contexts::prefix_map::{PrefixEntry, PrefixMap};
use crate::contexts::{for_each_node, ContextNode};
use crate::errors::InitError;

#[derive(Debug, Deserialize)]
struct InfoFile {
    #[serde(default)]
    prefixes: Vec<InfoEntry>,
}

#[derive(Debug, Deserialize)]
struct InfoEntry {
    prefix: String,
    context: String,
}

/// Table-driven routing over per-context areas.
pub struct ContextsSerialized {
    nodes: Vec<ContextNode>,
    map: PrefixMap,
    serial_node: ContextNode,
}

impl ContextsSerialized {
    /// Parse the side-table; returns the router and the distinct
    /// contexts in listed order.
    fn load_table(dir: &Path) -> Result<(PrefixMap, Vec<String>), InitError> {
        let contents = fs::read_to_string(dir.join(PROPERTY_INFO_FILE))?;
        let info: InfoFile = toml::from_str(&contents)
            .map_err(|e| InitError::InvalidContextTable(e.to_string()))?;
        if info.prefixes.is_empty() {
            return Err(InitError::InvalidContextTable(
                "no prefixes defined".to_string(),
            ));
        }

        let mut contexts = Vec::new();
        for entry in &info.prefixes {
            if !contexts.contains(&entry.context) {
                contexts.push(entry.context.clone());
            }
        }
        let map = PrefixMap::new(
            info.prefixes
                .into_iter()
                .map(|e| PrefixEntry {
                    prefix: e.prefix,
                    context: e.context,
                })
                .collect(),
        );
        Ok((map, contexts))
    }

    /// Reader-side initialization: build nodes for lazy read-only
    /// mapping. Fails if the serial area cannot be mapped.
    pub(crate) fn open(dir: &Path) -> Result<Self, InitError> {
        let (map, contexts) = Self::load_table(dir)?;
        let nodes = contexts
            .into_iter()
            .map(|context| {
                let path = dir.join(&context);
                ContextNode::new(context, path, false)
            })
            .collect();
        let serial_node = ContextNode::new(
            PROPERTIES_SERIAL_FILE.to_string(),
            dir.join(PROPERTIES_SERIAL_FILE),
            false,
        );
        serial_node
            .area()
            .ok_or(InitError::InvalidArea("serial area unavailable"))?;
        Ok(Self {
            nodes,
            map,
            serial_node,
        })
    }

    /// Writer-side initialization: create and label one area per
    /// context plus the serial area. Returns whether any labeling step
    /// failed.
    pub(crate) fn create(dir: &Path) -> Result<(Self, bool), InitError> {
        fs::create_dir_all(dir)?;
        let (map, contexts) = Self::load_table(dir)?;

        let mut fsetxattr_failed = false;
        let mut nodes = Vec::with_capacity(contexts.len());
        for context in contexts {
            let path = dir.join(&context);
            let (area, failed) = PropArea::create(&path, PROP_AREA_SIZE, Some(&context))?;
            fsetxattr_failed |= failed;
            nodes.push(ContextNode::with_area(context, path, Arc::new(area)));
        }

        let serial_path = dir.join(PROPERTIES_SERIAL_FILE);
        let (serial_area, failed) =
            PropArea::create(&serial_path, PROP_AREA_SIZE, Some(PROPERTIES_SERIAL_FILE))?;
        fsetxattr_failed |= failed;
        let serial_node = ContextNode::with_area(
            PROPERTIES_SERIAL_FILE.to_string(),
            serial_path,
            Arc::new(serial_area),
        );

        Ok((
            Self {
                nodes,
                map,
                serial_node,
            },
            fsetxattr_failed,
        ))
    }

    pub(crate) fn area_for_name(&self, name: &str) -> Option<Arc<PropArea>> {
        let context = self.map.context_for(name)?;
        let node = self.nodes.iter().find(|n| n.context() == context)?;
        node.area()
    }

    pub(crate) fn serial_area(&self) -> Option<Arc<PropArea>> {
        self.serial_node.area()
    }

    pub(crate) fn for_each(&self, f: &mut dyn FnMut(&Arc<PropArea>, &PropInfo)) {
        for_each_node(&self.nodes, f);
    }

    pub(crate) fn reset_access(&self) {
        for node in &self.nodes {
            node.reset();
        }
        self.serial_node.reset();
    }
}
