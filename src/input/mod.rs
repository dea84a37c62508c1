//! Object sources.
//!
//! The loader reads modules through [`ElfReader`], so a module can come from
//! memory, a host file or any device filesystem that supports positioned
//! reads.

#[cfg(feature = "std")]
pub use backend::ElfFile;
pub use backend::ElfBinary;
pub use traits::{ElfReader, IntoElfReader};

mod backend;
mod traits;
