use super::InjectionProgress;
use super::asm::Z80Asm;
use crate::cpu::regs::Z80Registers;

/// M1 cycles between `LD R,A` and the first real fetch:
/// `LD A,n`, `IM n` (two), `EI`/`DI` and `JP`.
const R_SET_OFFSET: u8 = 5;

/// Emit the register loads shared by the injected sequence and the
/// start-of-program snippet, from IX through to the interrupt state.
fn emit_register_loads(asm: &mut Z80Asm, regs: &Z80Registers) {
    asm.ld_ix(regs.ix).ld_iy(regs.iy);
    asm.ld_hl(regs.hl_alt).ld_de(regs.de_alt).ld_bc(regs.bc_alt).exx();
    asm.ld_hl(regs.hl).ld_de(regs.de).ld_bc(regs.bc);
}

fn emit_tail(asm: &mut Z80Asm, regs: &Z80Registers) {
    asm.ld_sp(regs.sp);
    asm.ld_a(regs.i).ld_i_a();
    asm.ld_a(regs.r.wrapping_sub(R_SET_OFFSET)).ld_r_a();
    asm.ld_a(regs.a());
    asm.im(regs.int_mode.unwrap_or(0));
    if regs.int_enabled.unwrap_or(false) {
        asm.ei();
    } else {
        asm.di();
    }
    asm.jp(regs.pc);
}

/// The 54-byte register-set stream, specialised for one register file.
///
/// The two POP AF instructions read their operands from the stream itself,
/// so AF' and AF follow their POPs directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetSequence {
    bytes: Vec<u8>,
}

impl SetSequence {
    pub fn build(regs: &Z80Registers) -> Self {
        let mut asm = Z80Asm::new();
        asm.nop();
        emit_register_loads(&mut asm, regs);
        asm.pop_af().word(regs.af_alt).ex_af();
        asm.pop_af().word(regs.af);
        emit_tail(&mut asm, regs);
        Self {
            bytes: asm.finish(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Code written into target RAM to set registers when a program starts.
///
/// Unlike the injected stream this really executes from memory, so the
/// AF' and AF words sit in a small stack area that the snippet jumps over.
pub fn register_snippet(code_addr: u16, regs: &Z80Registers) -> Vec<u8> {
    const STACK_OFFSET: u16 = 6;
    let mut asm = Z80Asm::new();
    asm.ld_sp(code_addr.wrapping_add(STACK_OFFSET));
    asm.nop();
    asm.jr(4);
    asm.word(regs.af_alt).word(regs.af);
    emit_register_loads(&mut asm, regs);
    asm.pop_af().ex_af().pop_af();
    emit_tail(&mut asm, regs);
    asm.finish()
}

/// Register-set state machine: feeds the stream, expects no writes.
#[derive(Clone, Debug)]
pub struct SetRegisters {
    sequence: SetSequence,
    cursor: usize,
}

impl SetRegisters {
    pub fn new(regs: &Z80Registers) -> Self {
        Self {
            sequence: SetSequence::build(regs),
            cursor: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn on_read(&mut self, _addr: u16) -> (u8, InjectionProgress) {
        let bytes = self.sequence.as_bytes();
        let value = bytes.get(self.cursor).copied().unwrap_or(0);
        self.cursor += 1;
        let progress = if self.cursor >= bytes.len() {
            InjectionProgress::Done
        } else {
            InjectionProgress::Running
        };
        (value, progress)
    }

    pub fn on_write(&mut self, addr: u16, data: u8) -> InjectionProgress {
        log::debug!("unexpected write {addr:04x}={data:02x} during register set");
        InjectionProgress::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_regs() -> Z80Registers {
        Z80Registers {
            pc: 0x8000,
            sp: 0xFFFF,
            af: 0x1234,
            bc: 0x5678,
            de: 0x9ABC,
            hl: 0xDEF0,
            af_alt: 0x1111,
            bc_alt: 0x2222,
            de_alt: 0x3333,
            hl_alt: 0x4444,
            ix: 0x5555,
            iy: 0x6666,
            i: 0x77,
            r: 0x10,
            int_mode: Some(1),
            int_enabled: Some(true),
        }
    }

    #[test]
    fn set_sequence_layout() {
        let seq = SetSequence::build(&sample_regs());
        let b = seq.as_bytes();
        assert_eq!(b.len(), 54);
        assert_eq!(b[0], 0x00);
        assert_eq!(&b[1..5], &[0xDD, 0x21, 0x55, 0x55]);
        assert_eq!(&b[9..12], &[0x21, 0x44, 0x44]);
        assert_eq!(b[18], 0xD9);
        assert_eq!(&b[28..32], &[0xF1, 0x11, 0x11, 0x08]);
        assert_eq!(&b[32..35], &[0xF1, 0x34, 0x12]);
        assert_eq!(&b[35..38], &[0x31, 0xFF, 0xFF]);
        assert_eq!(b[39], 0x77);
        assert_eq!(b[43], 0x0B);
        assert_eq!(&b[48..50], &[0xED, 0x56]);
        assert_eq!(b[50], 0xFB);
        assert_eq!(&b[50..], &[0xFB, 0xC3, 0x00, 0x80]);
    }

    #[test]
    fn unknown_interrupt_state_sets_im0_di() {
        let mut regs = sample_regs();
        regs.int_mode = None;
        regs.int_enabled = None;
        let b = SetSequence::build(&regs).as_bytes().to_vec();
        assert_eq!(&b[48..51], &[0xED, 0x46, 0xF3]);
    }

    #[test]
    fn snippet_layout() {
        let snippet = register_snippet(0x4000, &sample_regs());
        assert_eq!(snippet.len(), 59);
        assert_eq!(&snippet[0..3], &[0x31, 0x06, 0x40]);
        assert_eq!(&snippet[4..6], &[0x18, 0x04]);
        assert_eq!(&snippet[6..10], &[0x11, 0x11, 0x34, 0x12]);
        assert_eq!(&snippet[10..12], &[0xDD, 0x21]);
        assert_eq!(&snippet[37..40], &[0xF1, 0x08, 0xF1]);
        assert_eq!(&snippet[56..], &[0xC3, 0x00, 0x80]);
    }

    #[test]
    fn set_stream_finishes_at_length() {
        let mut set = SetRegisters::new(&sample_regs());
        let mut last = InjectionProgress::Running;
        let mut count = 0;
        while last != InjectionProgress::Done {
            last = set.on_read(0).1;
            count += 1;
        }
        assert_eq!(count, 54);
    }
}
