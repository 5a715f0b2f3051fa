//! Error types for store initialization and operations

/// Errors returned while opening or creating property areas and routing
/// tables.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// I/O error while opening, creating, or mapping a backing file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A backing file is not a valid property area.
    #[error("invalid property area: {0}")]
    InvalidArea(&'static str),
    /// The prefix-routing table could not be parsed.
    #[error("invalid context table: {0}")]
    InvalidContextTable(String),
}

/// Errors returned by store operations.
///
/// All store entrypoints report failure locally; none panic. An error
/// leaves the store state unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store has not been initialized.
    #[error("property store is not initialized")]
    Uninitialized,
    /// The name is empty or exceeds the name cap.
    #[error("invalid property name")]
    InvalidName,
    /// The value exceeds the mutable value cap.
    #[error("property value too long")]
    ValueTooLong,
    /// No context claims the name, or its area could not be opened.
    #[error("access denied")]
    AccessDenied,
    /// The target area cannot accommodate a new record.
    #[error("property area is full")]
    AreaFull,
    /// A property with this name already exists.
    #[error("property already exists")]
    AlreadyExists,
    /// Read-only properties are never updated after creation.
    #[error("property is read-only")]
    ReadOnly,
    /// The area is mapped read-only in this process.
    #[error("property area is not writable in this process")]
    NotWritable,
}
