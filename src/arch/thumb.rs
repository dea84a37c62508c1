//! Thumb-2 instruction encodings the loader patches or emits.

use crate::TargetAddr;

/// `BL` reaches ±16 MiB from the instruction address plus four.
pub const BRANCH_RANGE: i64 = 1 << 24;

/// Size of one trampoline record.
pub const TRAMPOLINE_SIZE: usize = 16;

/// `ldr.w r9, [pc, #4]`, both halfwords.
pub const LDR_R9_PC4: [u16; 2] = [0xF8DF, 0x9004];
/// `ldr.w pc, [pc, #4]`, both halfwords.
pub const LDR_PC_PC4: [u16; 2] = [0xF8DF, 0xF004];

/// Whether the two halfwords form a `BL` instruction.
#[inline]
pub fn is_bl(hi: u16, lo: u16) -> bool {
    hi & 0xF800 == 0xF000 && lo & 0xD000 == 0xD000
}

/// Signed byte displacement held by a `BL`/`B.W` instruction.
///
/// ```text
///   hi: 11110 S imm10      lo: 11 J1 1 J2 imm11
///   I1 = !(J1 ^ S), I2 = !(J2 ^ S)
///   disp = sign_extend(S:I1:I2:imm10:imm11:0, 25)
/// ```
pub fn decode_branch(hi: u16, lo: u16) -> i32 {
    let (hi, lo) = (hi as u32, lo as u32);
    let s = (hi >> 10) & 1;
    let j1 = (lo >> 13) & 1;
    let j2 = (lo >> 11) & 1;
    let i1 = !(j1 ^ s) & 1;
    let i2 = !(j2 ^ s) & 1;
    let imm = (s << 24) | (i1 << 23) | (i2 << 22) | ((hi & 0x3ff) << 12) | ((lo & 0x7ff) << 1);
    ((imm << 7) as i32) >> 7
}

/// Replaces the displacement of a `BL`/`B.W` instruction, keeping the
/// opcode bits. `disp` must already be range checked.
pub fn encode_branch(hi: u16, lo: u16, disp: i32) -> (u16, u16) {
    let v = disp as u32;
    let s = (v >> 24) & 1;
    let i1 = (v >> 23) & 1;
    let i2 = (v >> 22) & 1;
    let j1 = !(i1 ^ s) & 1;
    let j2 = !(i2 ^ s) & 1;
    let hi = (hi as u32 & 0xF800) | (s << 10) | ((v >> 12) & 0x3ff);
    let lo = (lo as u32 & 0xD000) | (j1 << 13) | (j2 << 11) | ((v >> 1) & 0x7ff);
    (hi as u16, lo as u16)
}

/// Whether a branch displacement is encodable.
#[inline]
pub fn branch_in_range(disp: i64) -> bool {
    (-BRANCH_RANGE..BRANCH_RANGE).contains(&disp)
}

/// Builds a trampoline record.
///
/// ```text
///   +0   ldr.w r9, [pc, #4]     ; pc reads as +4, loads the word at +8
///   +4   ldr.w pc, [pc, #4]     ; pc reads as +8, loads the word at +12
///   +8   .word base
///   +12  .word target
/// ```
///
/// Loading `pc` interworks, so `target` must carry the Thumb bit.
pub fn emit_trampoline(target: TargetAddr, base: TargetAddr) -> [u8; TRAMPOLINE_SIZE] {
    let mut record = [0u8; TRAMPOLINE_SIZE];
    let halfwords = [LDR_R9_PC4[0], LDR_R9_PC4[1], LDR_PC_PC4[0], LDR_PC_PC4[1]];
    for (slot, hw) in record.chunks_exact_mut(2).zip(halfwords) {
        slot.copy_from_slice(&hw.to_le_bytes());
    }
    record[8..12].copy_from_slice(&base.to_le_bytes());
    record[12..16].copy_from_slice(&target.to_le_bytes());
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn placeholder_bl_has_addend_minus_four() {
        assert!(is_bl(0xF7FF, 0xFFFE));
        assert_eq!(decode_branch(0xF7FF, 0xFFFE), -4);
    }

    #[rstest]
    #[case(0)]
    #[case(-4)]
    #[case(0x1234)]
    #[case(-0x0010_0000)]
    #[case((1 << 24) - 2)]
    #[case(-(1 << 24))]
    fn branch_encoding_holds_displacement(#[case] disp: i32) {
        let (hi, lo) = encode_branch(0xF000, 0xF800, disp);
        assert!(is_bl(hi, lo));
        assert_eq!(decode_branch(hi, lo), disp);
    }

    #[test]
    fn known_encoding() {
        // bl .+0x1000 from the instruction, displacement 0x1000 - 4
        assert_eq!(encode_branch(0xF000, 0xF800, 0xFFC), (0xF000, 0xFFFE));
    }

    #[test]
    fn range_limits() {
        assert!(branch_in_range((1 << 24) - 2));
        assert!(branch_in_range(-(1 << 24)));
        assert!(!branch_in_range(1 << 24));
        assert!(!branch_in_range(-(1 << 24) - 2));
    }

    fn disassemble_ldr_w(hw1: u16, hw2: u16) -> Option<(u32, u32, i32)> {
        if hw1 & 0xFF7F != 0xF85F {
            return None;
        }
        let rt = (hw2 >> 12) as u32;
        let imm = (hw2 & 0xfff) as i32;
        let up = hw1 & 0x0080 != 0;
        Some((rt, 15, if up { imm } else { -imm }))
    }

    #[test]
    fn trampoline_disassembles() {
        let record = emit_trampoline(0x0008_2001, 0x2000_0040);
        let hw = |i: usize| u16::from_le_bytes([record[i], record[i + 1]]);
        assert_eq!(&record[..8], &[0xDF, 0xF8, 0x04, 0x90, 0xDF, 0xF8, 0x04, 0xF0]);

        // first load: r9 <- [align4(0 + 4) + 4] = word at +8
        let (rt, rn, imm) = disassemble_ldr_w(hw(0), hw(2)).unwrap();
        assert_eq!((rt, rn), (9, 15));
        assert_eq!(4 + imm, 8);
        // second load: pc <- [align4(4 + 4) + 4] = word at +12
        let (rt, rn, imm) = disassemble_ldr_w(hw(4), hw(6)).unwrap();
        assert_eq!((rt, rn), (15, 15));
        assert_eq!(8 + imm, 12);

        assert_eq!(u32::from_le_bytes(record[8..12].try_into().unwrap()), 0x2000_0040);
        assert_eq!(u32::from_le_bytes(record[12..16].try_into().unwrap()), 0x0008_2001);
    }
}
