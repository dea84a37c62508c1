use crate::{
    Error, Result, TargetAddr,
    arch::{
        rel_type_to_str,
        thumb::{branch_in_range, decode_branch, encode_branch},
    },
    elf::{ElfRel, R_ARM_ABS32, R_ARM_NONE, R_ARM_THM_CALL},
    error::parse_error,
};

/// Outcome of a single relocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The field was rewritten.
    Patched,
    /// `R_ARM_NONE`, nothing to do.
    Ignored,
    /// An unsupported type that was logged and left alone.
    Skipped,
}

/// Counters for one batch of relocations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelocStats {
    pub patched: usize,
    pub skipped: usize,
}

impl RelocStats {
    pub(crate) fn record(&mut self, applied: Applied) {
        match applied {
            Applied::Patched => self.patched += 1,
            Applied::Skipped => self.skipped += 1,
            Applied::Ignored => {}
        }
    }

    pub(crate) fn merge(&mut self, other: RelocStats) {
        self.patched += other.patched;
        self.skipped += other.skipped;
    }
}

/// Applies one relocation to `buf`, which holds the section bytes starting
/// at section offset `buf_start`. The whole 4-byte field must lie in `buf`.
///
/// `place_base` is the runtime address of the section's first byte and
/// `resolve` maps the relocation's symbol to its address. It is only called
/// for supported types. On error the field is left untouched.
pub fn apply_rel<F>(
    buf: &mut [u8],
    buf_start: usize,
    place_base: TargetAddr,
    rel: &ElfRel,
    strict: bool,
    resolve: F,
) -> Result<Applied>
where
    F: FnOnce(usize) -> Result<TargetAddr>,
{
    let offset = rel.r_offset();
    let field: &mut [u8; 4] = offset
        .checked_sub(buf_start)
        .and_then(|at| buf.get_mut(at..at.checked_add(4)?))
        .and_then(|field| field.try_into().ok())
        .ok_or_else(|| parse_error(alloc::format!("relocation field {offset:#x} outside buffer")))?;
    match rel.r_type() {
        R_ARM_NONE => Ok(Applied::Ignored),
        R_ARM_ABS32 => {
            let s = resolve(rel.r_symbol())?;
            let addend = u32::from_le_bytes(*field);
            *field = addend.wrapping_add(s).to_le_bytes();
            Ok(Applied::Patched)
        }
        R_ARM_THM_CALL => {
            let s = resolve(rel.r_symbol())?;
            let place = place_base.wrapping_add(offset as u32);
            let hi = u16::from_le_bytes([field[0], field[1]]);
            let lo = u16::from_le_bytes([field[2], field[3]]);
            let addend = decode_branch(hi, lo);
            let disp = s as i64 + addend as i64 - place as i64;
            if !branch_in_range(disp) {
                return Err(Error::RelocationRange {
                    offset,
                    displacement: disp as i32,
                });
            }
            let (hi, lo) = encode_branch(hi, lo, disp as i32);
            field[..2].copy_from_slice(&hi.to_le_bytes());
            field[2..].copy_from_slice(&lo.to_le_bytes());
            Ok(Applied::Patched)
        }
        r_type if strict => Err(Error::UnsupportedRelocation { r_type, offset }),
        r_type => {
            warn!(
                "[reloc] skipping {} ({r_type}) at offset {offset:#x}",
                rel_type_to_str(r_type)
            );
            Ok(Applied::Skipped)
        }
    }
}

/// Applies every relocation in `rels` whose field lies inside
/// `[buf_start, buf_start + buf.len())`. Others are left for the chunk that
/// holds them.
pub fn apply_chunk<F>(
    buf: &mut [u8],
    buf_start: usize,
    place_base: TargetAddr,
    rels: &[ElfRel],
    strict: bool,
    mut resolve: F,
) -> Result<RelocStats>
where
    F: FnMut(usize) -> Result<TargetAddr>,
{
    let end = buf_start + buf.len();
    let mut stats = RelocStats::default();
    for rel in rels {
        let inside = rel.r_offset() >= buf_start && rel.field_end().is_some_and(|e| e <= end);
        if !inside {
            continue;
        }
        stats.record(apply_rel(buf, buf_start, place_base, rel, strict, &mut resolve)?);
    }
    Ok(stats)
}
