//! The result of a successful load.

use crate::TargetAddr;
use alloc::{string::String, vec::Vec};

/// Where a section of a module ends up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionClass {
    /// Executable code, streamed to XIP flash.
    Text,
    /// Read-only data, streamed to XIP flash.
    ReadOnly,
    /// Mutable initialized data, copied into the RAM data region.
    Data,
    /// Zero-initialized data, carved from the RAM BSS region.
    Bss,
}

impl SectionClass {
    /// Whether sections of this class live in flash.
    #[inline]
    pub fn is_flash(self) -> bool {
        matches!(self, SectionClass::Text | SectionClass::ReadOnly)
    }
}

/// One placed section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlacedSection {
    /// Section header index in the object.
    pub index: usize,
    pub name: String,
    pub class: SectionClass,
    pub size: usize,
    /// Runtime address of the first byte.
    pub addr: TargetAddr,
}

impl PlacedSection {
    /// Whether `addr` falls inside the section.
    pub fn contains(&self, addr: TargetAddr) -> bool {
        addr >= self.addr && ((addr - self.addr) as usize) < self.size
    }
}

/// A block of the RAM data pool owned by one module.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RamRegion {
    /// Offset within the pool.
    pub offset: usize,
    /// Runtime address of the first byte.
    pub addr: TargetAddr,
    pub len: usize,
}

impl RamRegion {
    pub fn contains(&self, addr: TargetAddr) -> bool {
        addr >= self.addr && ((addr - self.addr) as usize) < self.len
    }
}

/// A loaded, linked and executable module.
///
/// Modules stay resident for the lifetime of the process, so an image is
/// a description of memory that has already been committed rather than an
/// owner of it.
#[derive(Clone, Debug)]
pub struct ModuleImage {
    pub(crate) name: String,
    pub(crate) sections: Vec<PlacedSection>,
    pub(crate) data: Option<RamRegion>,
    pub(crate) bss: Option<RamRegion>,
    pub(crate) entry: TargetAddr,
    pub(crate) got_base: TargetAddr,
}

impl ModuleImage {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every placed section, in section header order.
    #[inline]
    pub fn sections(&self) -> &[PlacedSection] {
        &self.sections
    }

    /// The first placed section called `name`.
    pub fn section(&self, name: &str) -> Option<&PlacedSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// The RAM block holding all mutable initialized sections.
    #[inline]
    pub fn data(&self) -> Option<RamRegion> {
        self.data
    }

    /// The RAM block holding all zero-initialized sections.
    #[inline]
    pub fn bss(&self) -> Option<RamRegion> {
        self.bss
    }

    /// Entry point address, Thumb bit included.
    #[inline]
    pub fn entry(&self) -> TargetAddr {
        self.entry
    }

    /// Value the PIC base register must hold while module code runs.
    ///
    /// This is the address of `.got`. A module without `.got` gets the base
    /// of its data block instead of 0, and 0 only when it has no data at
    /// all. Such modules never read `r9`.
    #[inline]
    pub fn got_base(&self) -> TargetAddr {
        self.got_base
    }

    /// Bytes of XIP flash the module's sections occupy.
    pub fn flash_bytes(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| s.class.is_flash())
            .map(|s| s.size)
            .sum()
    }
}
