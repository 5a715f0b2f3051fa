//! The per-prefix contexts variant
//!
//! Taken when the property directory lacks a `property_info` table.
//! Prefixes are discovered from a `property_contexts` listing inside
//! the directory: one `<prefix> <context>` pair per line, `#` comments,
//! `*` as the catch-all prefix. One area file per context, named after
//! it. The first listed context's area doubles as the serial area.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::area::{PropArea, PropInfo};
use crate::constants::PROPERTY_CONTEXTS_FILE;
use crate::contexts::prefix_map::{PrefixEntry, PrefixMap};
use crate::contexts::{for_each_node, ContextNode};
use crate::errors::InitError;

/// Per-prefix routing discovered from the legacy listing.
pub struct ContextsSplit {
    nodes: Vec<ContextNode>,
    map: PrefixMap,
}

impl ContextsSplit {
    pub(crate) fn open(dir: &Path) -> Result<Self, InitError> {
        let path = dir.join(PROPERTY_CONTEXTS_FILE);
        let contents = fs::read_to_string(&path)?;

        let mut entries = Vec::new();
        let mut contexts: Vec<String> = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(prefix), Some(context), None) =
                (fields.next(), fields.next(), fields.next())
            else {
                return Err(InitError::InvalidContextTable(format!(
                    "line {}: expected \"<prefix> <context>\"",
                    lineno + 1
                )));
            };
            let prefix = if prefix == "*" { "" } else { prefix };
            if !contexts.iter().any(|c| c == context) {
                contexts.push(context.to_string());
            }
            entries.push(PrefixEntry {
                prefix: prefix.to_string(),
                context: context.to_string(),
            });
        }
        if entries.is_empty() {
            return Err(InitError::InvalidContextTable(
                "no prefixes defined".to_string(),
            ));
        }

        let nodes: Vec<ContextNode> = contexts
            .into_iter()
            .map(|context| {
                let path = dir.join(&context);
                ContextNode::new(context, path, false)
            })
            .collect();
        nodes
            .first()
            .and_then(|n| n.area())
            .ok_or(InitError::InvalidArea("serial area unavailable"))?;

        Ok(Self {
            nodes,
            map: PrefixMap::new(entries),
        })
    }

    pub(crate) fn area_for_name(&self, name: &str) -> Option<Arc<PropArea>> {
        let context = self.map.context_for(name)?;
        let node = self.nodes.iter().find(|n| n.context() == context)?;
        node.area()
    }

    /// The first listed context's area carries the global serial.
    pub(crate) fn serial_area(&self) -> Option<Arc<PropArea>> {
        self.nodes.first()?.area()
    }

    pub(crate) fn for_each(&self, f: &mut dyn FnMut(&Arc<PropArea>, &PropInfo)) {
        for_each_node(&self.nodes, f);
    }

    pub(crate) fn reset_access(&self) {
        for node in &self.nodes {
            node.reset();
        }
    }
}
