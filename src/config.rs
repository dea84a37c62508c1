//! Tunables for the loader and the extension manager.
//!
//! Nothing here is read from disk; hosts build these values directly and
//! hand them to [`StreamLoader`](crate::StreamLoader) and
//! [`ExtensionManager`](crate::manager::ExtensionManager).

use crate::{Result, TargetAddr, error::custom_error, flash::WRITE_ALIGN};
use alloc::string::{String, ToString};

/// Default streaming chunk size, one XIP sector.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
/// Default number of relocation entries read per batch.
pub const DEFAULT_REL_BATCH: usize = 64;
/// Default number of symbol cache slots.
pub const DEFAULT_SYM_CACHE_SLOTS: usize = 16;
/// Default upper bound on the section count of one module.
pub const DEFAULT_MAX_SECTIONS: usize = 32;
/// Default upper bound on the buffered symbol string table.
pub const DEFAULT_MAX_STRTAB: usize = 4096;
/// Default upper bound on the buffered section-name table.
pub const DEFAULT_MAX_SHSTRTAB: usize = 512;
/// Default longest extension identifier.
pub const DEFAULT_MAX_ID_LEN: usize = 32;

const MIN_CHUNK_SIZE: usize = 16;

/// Placement of one flash region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionConfig {
    /// Byte offset of the partition within its flash device.
    pub offset: usize,
    /// Size of the partition in bytes.
    pub size: usize,
    /// Address at which the CPU sees the first byte of the partition.
    pub cpu_base: TargetAddr,
}

impl PartitionConfig {
    pub const fn new(offset: usize, size: usize, cpu_base: TargetAddr) -> Self {
        Self {
            offset,
            size,
            cpu_base,
        }
    }
}

/// Configuration of a [`StreamLoader`](crate::StreamLoader).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoaderConfig {
    pub(crate) chunk_size: usize,
    pub(crate) rel_batch: usize,
    pub(crate) sym_cache_slots: usize,
    pub(crate) max_sections: usize,
    pub(crate) max_strtab: usize,
    pub(crate) max_shstrtab: usize,
    pub(crate) strict_relocations: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LoaderConfig {
    pub const fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            rel_batch: DEFAULT_REL_BATCH,
            sym_cache_slots: DEFAULT_SYM_CACHE_SLOTS,
            max_sections: DEFAULT_MAX_SECTIONS,
            max_strtab: DEFAULT_MAX_STRTAB,
            max_shstrtab: DEFAULT_MAX_SHSTRTAB,
            strict_relocations: false,
        }
    }

    /// Bytes of section data staged in RAM at a time.
    ///
    /// Must be a multiple of the flash write block and at least 16 bytes.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Relocation entries read from the source per batch.
    pub fn with_rel_batch(mut self, entries: usize) -> Self {
        self.rel_batch = entries;
        self
    }

    pub fn with_symbol_cache_slots(mut self, slots: usize) -> Self {
        self.sym_cache_slots = slots;
        self
    }

    pub fn with_max_sections(mut self, max: usize) -> Self {
        self.max_sections = max;
        self
    }

    /// Caps the buffered symbol string table. Names past the cap fail to
    /// resolve with [`Error::InvalidSymbol`](crate::Error::InvalidSymbol).
    pub fn with_max_strtab(mut self, max: usize) -> Self {
        self.max_strtab = max;
        self
    }

    pub fn with_max_shstrtab(mut self, max: usize) -> Self {
        self.max_shstrtab = max;
        self
    }

    /// Turns relocation types outside `R_ARM_ABS32`/`R_ARM_THM_CALL` into
    /// [`Error::UnsupportedRelocation`](crate::Error::UnsupportedRelocation)
    /// instead of a warning.
    pub fn with_strict_relocations(mut self, strict: bool) -> Self {
        self.strict_relocations = strict;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn rel_batch(&self) -> usize {
        self.rel_batch
    }

    pub fn symbol_cache_slots(&self) -> usize {
        self.sym_cache_slots
    }

    pub fn strict_relocations(&self) -> bool {
        self.strict_relocations
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.chunk_size < MIN_CHUNK_SIZE || self.chunk_size % WRITE_ALIGN != 0 {
            return Err(custom_error(alloc::format!(
                "chunk size {} must be a multiple of {WRITE_ALIGN} and at least {MIN_CHUNK_SIZE}",
                self.chunk_size
            )));
        }
        if self.rel_batch == 0 || self.sym_cache_slots == 0 {
            return Err(custom_error(
                "relocation batch and symbol cache must hold at least one entry",
            ));
        }
        if self.max_sections == 0 {
            return Err(custom_error("section limit must be non-zero"));
        }
        Ok(())
    }
}

/// Configuration of an [`ExtensionManager`](crate::manager::ExtensionManager).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Directory holding one subdirectory per extension.
    pub base_dir: String,
    /// Name of the module object inside each extension directory.
    pub module_file: String,
    /// Name of the optional manifest inside each extension directory.
    pub manifest_file: String,
    /// Entry symbol used when the manifest does not name one.
    pub entry_symbol: String,
    /// Maximum number of resident extensions.
    pub max_extensions: usize,
    /// Maximum length of an extension identifier.
    pub max_id_len: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            base_dir: "/lvgl_lfs/apps".to_string(),
            module_file: "app.llext".to_string(),
            manifest_file: "manifest.json".to_string(),
            entry_symbol: "app_entry".to_string(),
            max_extensions: 10,
            max_id_len: DEFAULT_MAX_ID_LEN,
        }
    }
}

impl ManagerConfig {
    pub fn with_base_dir(mut self, dir: impl Into<String>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn with_entry_symbol(mut self, name: impl Into<String>) -> Self {
        self.entry_symbol = name.into();
        self
    }

    pub fn with_max_extensions(mut self, max: usize) -> Self {
        self.max_extensions = max;
        self
    }

    pub fn with_max_id_len(mut self, max: usize) -> Self {
        self.max_id_len = max;
        self
    }
}
