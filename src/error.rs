//! Error types of the carousel engine.
//!
//! Stream input never surfaces these to callers of the demuxer: section and
//! module errors are logged and the offending data is skipped. Lock and
//! handler errors are returned to the document layer.

use thiserror::Error;

use crate::resource::LockKind;

/// Reasons a private section is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SectionError {
    #[error("section too short: {0} bytes")]
    TooShort(usize),

    #[error("invalid section_length {0}")]
    InvalidLength(usize),

    #[error("truncated section: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("CRC-32 mismatch (calculated 0x{calculated:08X}, carried 0x{carried:08X})")]
    CrcMismatch { calculated: u32, carried: u32 },

    #[error("unexpected table_id 0x{0:02X}")]
    UnexpectedTable(u8),

    #[error("malformed {0}")]
    Malformed(&'static str),
}

/// Reasons a fully downloaded module cannot be turned into files.
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("zlib inflate failed: {0}")]
    Inflate(#[from] std::io::Error),

    #[error("inflated size {actual} does not match original_size {expected}")]
    SizeMismatch { expected: u32, actual: usize },

    #[error("failed to parse multipart module body")]
    Multipart,
}

/// Failure of a module lock request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    #[error("module {component_id:02x}/{module_id:04x} is not cached")]
    NotCached { component_id: u8, module_id: u16 },

    #[error("module {component_id:02x}/{module_id:04x} is held by {held_by}")]
    HeldByOtherRegime {
        component_id: u8,
        module_id: u16,
        held_by: LockKind,
    },
}

/// Errors out of the event scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Handler attribute text is not a bare `name()` call. Broadcast content
    /// violating the handler grammar is fatal.
    #[error("invalid event handler attribute {0:?}")]
    InvalidHandler(String),

    #[error("event queue lock count dropped below zero")]
    LockUnderflow,
}
