/// Minimal Z80 code emitter for the injected sequences.
///
/// Each method emits one instruction with its operands in bus order
/// (16-bit immediates little-endian), so callers name registers instead of
/// patching byte offsets.
#[derive(Clone, Debug, Default)]
pub struct Z80Asm {
    code: Vec<u8>,
}

impl Z80Asm {
    pub fn new() -> Self {
        Self { code: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.code
    }

    fn byte(&mut self, b: u8) -> &mut Self {
        self.code.push(b);
        self
    }

    /// Raw little-endian data word (e.g. values for POP to read).
    pub fn word(&mut self, w: u16) -> &mut Self {
        self.code.extend_from_slice(&w.to_le_bytes());
        self
    }

    pub fn nop(&mut self) -> &mut Self {
        self.byte(0x00)
    }

    pub fn ld_ix(&mut self, nn: u16) -> &mut Self {
        self.byte(0xDD).byte(0x21).word(nn)
    }

    pub fn ld_iy(&mut self, nn: u16) -> &mut Self {
        self.byte(0xFD).byte(0x21).word(nn)
    }

    pub fn ld_hl(&mut self, nn: u16) -> &mut Self {
        self.byte(0x21).word(nn)
    }

    pub fn ld_de(&mut self, nn: u16) -> &mut Self {
        self.byte(0x11).word(nn)
    }

    pub fn ld_bc(&mut self, nn: u16) -> &mut Self {
        self.byte(0x01).word(nn)
    }

    pub fn ld_sp(&mut self, nn: u16) -> &mut Self {
        self.byte(0x31).word(nn)
    }

    pub fn exx(&mut self) -> &mut Self {
        self.byte(0xD9)
    }

    pub fn ex_af(&mut self) -> &mut Self {
        self.byte(0x08)
    }

    pub fn pop_af(&mut self) -> &mut Self {
        self.byte(0xF1)
    }

    pub fn ld_a(&mut self, n: u8) -> &mut Self {
        self.byte(0x3E).byte(n)
    }

    pub fn ld_i_a(&mut self) -> &mut Self {
        self.byte(0xED).byte(0x47)
    }

    pub fn ld_r_a(&mut self) -> &mut Self {
        self.byte(0xED).byte(0x4F)
    }

    /// IM 0/1/2. Anything above 2 is treated as 2.
    pub fn im(&mut self, mode: u8) -> &mut Self {
        let op = match mode {
            0 => 0x46,
            1 => 0x56,
            _ => 0x5E,
        };
        self.byte(0xED).byte(op)
    }

    pub fn ei(&mut self) -> &mut Self {
        self.byte(0xFB)
    }

    pub fn di(&mut self) -> &mut Self {
        self.byte(0xF3)
    }

    pub fn jp(&mut self, nn: u16) -> &mut Self {
        self.byte(0xC3).word(nn)
    }

    pub fn jr(&mut self, offset: i8) -> &mut Self {
        self.byte(0x18).byte(offset as u8)
    }
}
