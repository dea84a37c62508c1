use alloc::{borrow::Cow, string::String};
use core::fmt::Display;

/// Error types used throughout the `xip_loader` library.
///
/// Every failure during loading is surfaced to the caller synchronously.
/// Nothing is retried internally.
#[derive(Debug)]
pub enum Error {
    /// Reading the module source failed.
    Io {
        /// A descriptive message about the I/O error.
        msg: Cow<'static, str>,
    },

    /// The object header or section table is malformed or unsupported.
    ///
    /// Nothing has been committed to flash when this is returned.
    Parse {
        /// A descriptive message about the parse error.
        msg: Cow<'static, str>,
    },

    /// An undefined symbol is not present in the host export table.
    UnresolvedSymbol {
        /// The name the module asked for.
        name: String,
    },

    /// A symbol index or its name offset is out of bounds.
    InvalidSymbol {
        /// Index into the module's symbol table.
        index: usize,
        /// What was wrong with it.
        msg: Cow<'static, str>,
    },

    /// A symbol refers to a section that has no runtime placement.
    InvalidSection {
        /// The section header index.
        index: usize,
    },

    /// A flash region cannot satisfy an allocation.
    ///
    /// The region's bump offset is left where it was; only a full reset
    /// reclaims space.
    OutOfFlash {
        /// The region that ran out.
        region: &'static str,
        /// Bytes requested after sector rounding.
        requested: usize,
        /// Bytes still free in the region.
        available: usize,
    },

    /// The RAM data pool cannot satisfy an allocation.
    OutOfMemory {
        /// Bytes requested.
        requested: usize,
        /// Bytes still free in the pool.
        available: usize,
    },

    /// A flash erase, write or read failed.
    FlashIo {
        /// A descriptive message about the flash error.
        msg: Cow<'static, str>,
    },

    /// A relative call cannot reach its target.
    RelocationRange {
        /// Offset of the call instruction within its section.
        offset: usize,
        /// The displacement that did not fit.
        displacement: i32,
    },

    /// A relocation type outside the supported set, in strict mode.
    UnsupportedRelocation {
        /// The raw `ELF32_R_TYPE` value.
        r_type: u32,
        /// Offset of the relocated field within its section.
        offset: usize,
    },

    /// The entry symbol is missing or not placed.
    EntryNotFound {
        /// The entry symbol name that was looked up.
        name: String,
    },

    /// The entry point returned a null descriptor.
    EntryFailed {
        /// Identifier of the extension whose entry failed.
        name: String,
    },

    /// An extension identifier is empty, too long or not a plain
    /// directory name.
    InvalidId {
        /// The rejected identifier.
        id: String,
    },

    /// An extension with this identifier is already resident.
    AlreadyLoaded {
        /// The extension identifier.
        id: String,
    },

    /// The manager already holds its maximum number of extensions.
    TooManyExtensions {
        /// The configured maximum.
        limit: usize,
    },

    /// An extension manifest could not be parsed.
    Manifest {
        /// A descriptive message about the manifest error.
        msg: Cow<'static, str>,
    },

    /// Module code faulted or touched memory it has no access to.
    Execution {
        /// A descriptive message about the fault.
        msg: Cow<'static, str>,
    },

    /// An error occurred in a user-provided implementation.
    Custom {
        /// A descriptive message about the custom error.
        msg: Cow<'static, str>,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Io { msg } => write!(f, "I/O error: {msg}"),
            Error::Parse { msg } => write!(f, "Object parsing error: {msg}"),
            Error::UnresolvedSymbol { name } => write!(f, "Unresolved symbol: {name}"),
            Error::InvalidSymbol { index, msg } => write!(f, "Invalid symbol {index}: {msg}"),
            Error::InvalidSection { index } => {
                write!(f, "Symbol refers to unplaced section {index}")
            }
            Error::OutOfFlash {
                region,
                requested,
                available,
            } => write!(
                f,
                "Out of flash in {region}: requested {requested:#x} bytes, {available:#x} available"
            ),
            Error::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "Out of data pool memory: requested {requested:#x} bytes, {available:#x} available"
            ),
            Error::FlashIo { msg } => write!(f, "Flash I/O error: {msg}"),
            Error::RelocationRange {
                offset,
                displacement,
            } => write!(
                f,
                "Relocation range error: call at {offset:#x} needs displacement {displacement:#x}"
            ),
            Error::UnsupportedRelocation { r_type, offset } => write!(
                f,
                "Unsupported relocation {} at {offset:#x}",
                crate::arch::rel_type_to_str(*r_type)
            ),
            Error::EntryNotFound { name } => write!(f, "Entry symbol not found: {name}"),
            Error::EntryFailed { name } => write!(f, "Entry point of {name} returned null"),
            Error::InvalidId { id } => write!(f, "Invalid extension identifier: {id:?}"),
            Error::AlreadyLoaded { id } => write!(f, "Extension already loaded: {id}"),
            Error::TooManyExtensions { limit } => {
                write!(f, "Extension limit of {limit} reached")
            }
            Error::Manifest { msg } => write!(f, "Manifest error: {msg}"),
            Error::Execution { msg } => write!(f, "Execution error: {msg}"),
            Error::Custom { msg } => write!(f, "Custom error: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

#[cold]
#[inline(never)]
pub(crate) fn io_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Io { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn parse_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Parse { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn invalid_symbol(index: usize, msg: impl Into<Cow<'static, str>>) -> Error {
    Error::InvalidSymbol {
        index,
        msg: msg.into(),
    }
}

/// Creates a flash I/O error with the specified message.
///
/// Meant for [`FlashDevice`](crate::flash::FlashDevice) implementations
/// reporting hardware failures.
#[cold]
#[inline(never)]
pub fn flash_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::FlashIo { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn manifest_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Manifest { msg: msg.into() }
}

/// Creates an execution error with the specified message.
#[cold]
#[inline(never)]
pub fn execution_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Execution { msg: msg.into() }
}

/// Creates a custom error with the specified message.
///
/// This is a convenience function for creating `Error::Custom` variants.
#[cold]
#[inline(never)]
pub fn custom_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Custom { msg: msg.into() }
}
