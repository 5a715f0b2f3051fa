//! Longest-prefix routing table
//!
//! Maps a property name to the security context that owns it. Entries
//! are matched most-specific first: `persist.sys.usb.config` routes to
//! the longest prefix that matches it. An empty prefix acts as the
//! catch-all; names matching no entry are denied.

/// One `(prefix, context)` routing entry.
#[derive(Debug, Clone)]
pub(crate) struct PrefixEntry {
    pub(crate) prefix: String,
    pub(crate) context: String,
}

/// The longest-match router shared by the table-driven contexts
/// variants.
#[derive(Debug)]
pub(crate) struct PrefixMap {
    // Sorted by descending prefix length so the first hit is the
    // longest match.
    entries: Vec<PrefixEntry>,
}

impl PrefixMap {
    pub(crate) fn new(mut entries: Vec<PrefixEntry>) -> Self {
        entries.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { entries }
    }

    /// The context owning `name`, or `None` when no prefix claims it.
    pub(crate) fn context_for(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| name.starts_with(&e.prefix))
            .map(|e| e.context.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> PrefixMap {
        PrefixMap::new(
            entries
                .iter()
                .map(|(p, c)| PrefixEntry {
                    prefix: p.to_string(),
                    context: c.to_string(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_longest_prefix_wins() {
        let map = map(&[
            ("persist.", "persist_prop"),
            ("persist.sys.usb.", "usb_prop"),
            ("persist.sys.", "system_prop"),
        ]);
        assert_eq!(map.context_for("persist.sys.usb.config"), Some("usb_prop"));
        assert_eq!(map.context_for("persist.sys.locale"), Some("system_prop"));
        assert_eq!(map.context_for("persist.radio.foo"), Some("persist_prop"));
    }

    #[test]
    fn test_unmatched_name_is_denied() {
        let map = map(&[("net.", "net_prop")]);
        assert_eq!(map.context_for("vendor.audio"), None);
    }

    #[test]
    fn test_empty_prefix_catches_all() {
        let map = map(&[("net.", "net_prop"), ("", "default_prop")]);
        assert_eq!(map.context_for("net.dns1"), Some("net_prop"));
        assert_eq!(map.context_for("anything.else"), Some("default_prop"));
    }
}
