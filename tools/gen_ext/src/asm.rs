/// Output of [`Asm::finish`].
pub struct Assembled {
    /// Code followed by the literal pool, padded to a word.
    pub code: Vec<u8>,
    /// Offset of each literal in `code`, in the order they were requested.
    pub literals: Vec<usize>,
}

/// Emits the handful of Thumb-2 instructions the test modules use.
///
/// `ldr rt, =value` is supported through a literal pool placed after the
/// last instruction.
#[derive(Default)]
pub struct Asm {
    code: Vec<u8>,
    literals: Vec<(usize, u32)>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of the next instruction.
    pub fn here(&self) -> usize {
        self.code.len()
    }

    fn hw(&mut self, hw: u16) -> usize {
        let at = self.code.len();
        self.code.extend_from_slice(&hw.to_le_bytes());
        at
    }

    /// `movs rd, #imm`
    pub fn movs(&mut self, rd: u8, imm: u8) -> &mut Self {
        self.hw(0x2000 | (rd as u16) << 8 | imm as u16);
        self
    }

    /// `adds rd, #imm`
    pub fn adds(&mut self, rd: u8, imm: u8) -> &mut Self {
        self.hw(0x3000 | (rd as u16) << 8 | imm as u16);
        self
    }

    /// `movs rd, rm` for low registers.
    pub fn movs_reg(&mut self, rd: u8, rm: u8) -> &mut Self {
        self.hw((rm as u16) << 3 | rd as u16);
        self
    }

    /// `mov rd, rm`, any registers.
    pub fn mov(&mut self, rd: u8, rm: u8) -> &mut Self {
        self.hw(0x4600 | ((rd as u16 & 8) << 4) | (rm as u16) << 3 | (rd as u16 & 7));
        self
    }

    /// `str rt, [rn, #words * 4]`
    pub fn str(&mut self, rt: u8, rn: u8, words: u8) -> &mut Self {
        self.hw(0x6000 | (words as u16) << 6 | (rn as u16) << 3 | rt as u16);
        self
    }

    /// `ldr rt, [rn, #words * 4]`
    pub fn ldr(&mut self, rt: u8, rn: u8, words: u8) -> &mut Self {
        self.hw(0x6800 | (words as u16) << 6 | (rn as u16) << 3 | rt as u16);
        self
    }

    /// `ldr.w rt, [rn, #imm12]`
    pub fn ldr_w(&mut self, rt: u8, rn: u8, imm12: u16) -> &mut Self {
        self.hw(0xF8D0 | rn as u16);
        self.hw((rt as u16) << 12 | (imm12 & 0xfff));
        self
    }

    /// `push {lr}`
    pub fn push_lr(&mut self) -> &mut Self {
        self.hw(0xB500);
        self
    }

    /// `pop {pc}`
    pub fn pop_pc(&mut self) -> &mut Self {
        self.hw(0xBD00);
        self
    }

    /// `bx lr`
    pub fn bx_lr(&mut self) -> &mut Self {
        self.hw(0x4770);
        self
    }

    /// `blx rm`
    pub fn blx(&mut self, rm: u8) -> &mut Self {
        self.hw(0x4780 | (rm as u16) << 3);
        self
    }

    pub fn nop(&mut self) -> &mut Self {
        self.hw(0xBF00);
        self
    }

    /// `bl` with the conventional `R_ARM_THM_CALL` placeholder, returning
    /// the offset the relocation goes at.
    pub fn bl(&mut self) -> usize {
        let at = self.hw(0xF7FF);
        self.hw(0xFFFE);
        at
    }

    /// Pads with `nop` to a word boundary.
    pub fn align4(&mut self) -> &mut Self {
        if self.code.len() % 4 != 0 {
            self.nop();
        }
        self
    }

    /// `ldr rt, =value`, returning the literal's index.
    pub fn ldr_literal(&mut self, rt: u8, value: u32) -> usize {
        let at = self.hw(0x4800 | (rt as u16) << 8);
        self.literals.push((at, value));
        self.literals.len() - 1
    }

    /// Appends the literal pool and fills in every `ldr rt, =value`.
    pub fn finish(mut self) -> Assembled {
        self.align4();
        let mut offsets = Vec::with_capacity(self.literals.len());
        for (insn, value) in std::mem::take(&mut self.literals) {
            let at = self.code.len();
            self.code.extend_from_slice(&value.to_le_bytes());
            let words = (at - ((insn + 4) & !3)) / 4;
            assert!(words <= 0xff, "literal pool out of reach");
            self.code[insn] |= words as u8;
            offsets.push(at);
        }
        Assembled {
            code: self.code,
            literals: offsets,
        }
    }
}
