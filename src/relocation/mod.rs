//! Symbol resolution and relocation of module sections.
//!
//! Two relocation types are supported: `R_ARM_ABS32`, which adds the symbol
//! address to the addend stored in the field, and `R_ARM_THM_CALL`, which
//! re-targets a Thumb `BL`. Both are applied to bytes in a buffer before
//! they are committed, so the same code serves streamed chunks and RAM
//! data.

mod apply;
mod resolver;

pub use apply::{Applied, RelocStats, apply_chunk, apply_rel};
pub use resolver::{CacheStats, SectionPlacement, SymbolCache, SymbolResolver};
