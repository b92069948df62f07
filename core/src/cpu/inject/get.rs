use super::InjectionProgress;
use crate::cpu::regs::Z80Registers;

/// Instruction stream fed to the processor to read its registers.
///
/// Every push lands on paged-out RAM; the values are recovered from the
/// write cycles instead. The two POP AF operand bytes (32, 33) and the
/// `LD A,n` operand used to restore R (28) are patched while it runs.
pub const GET_REGISTERS_SEQUENCE: [u8; 36] = [
    0xF5, // push af
    0xED, 0x5F, // ld a,r
    0x77, // ld (hl),a
    0xED, 0x57, // ld a,i
    0x77, // ld (hl),a
    0x33, 0x33, // inc sp; inc sp
    0x12, // ld (de),a
    0x02, // ld (bc),a
    0xD9, // exx
    0x77, // ld (hl),a
    0x12, // ld (de),a
    0x02, // ld (bc),a
    0xD9, // exx
    0x08, // ex af,af'
    0xF5, // push af
    0x33, 0x33, // inc sp; inc sp
    0x08, // ex af,af'
    0xDD, 0xE5, // push ix
    0x33, 0x33, // inc sp; inc sp
    0xFD, 0xE5, // push iy
    0x3E, 0x00, // ld a,n (R restore)
    0xED, 0x4F, // ld r,a
    0xF1, // pop af
    0x00, 0x00, // AF value read by pop af
    0x18, 0xDE, // jr back to the interrupted PC
];

const R_RESTORE_POS: usize = 28;
const AF_LOW_POS: usize = 32;
const AF_HIGH_POS: usize = 33;
/// Cursor after which every remaining read is the restore tail.
pub const GRAB_MEMORY_POS: usize = 34;

/// M1 cycles between the true R value and the `LD A,R` result.
const R_SAMPLE_OFFSET: u8 = 3;
/// M1 cycles from `LD R,A` to the first real fetch.
const R_RESTORE_OFFSET: u8 = 2;

/// Register-get state machine.
#[derive(Clone, Debug)]
pub struct GetRegisters {
    code: [u8; 36],
    cursor: usize,
    write_index: u8,
    regs: Z80Registers,
}

impl GetRegisters {
    pub fn new() -> Self {
        Self {
            code: GET_REGISTERS_SEQUENCE,
            cursor: 0,
            write_index: 0,
            regs: Z80Registers::default(),
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn registers(&self) -> Z80Registers {
        self.regs
    }

    /// Answer a read. Every read, fetch or stack, takes the next byte.
    pub fn on_read(&mut self, addr: u16) -> (u8, InjectionProgress) {
        if self.cursor == 0 {
            self.regs.pc = addr;
        }
        self.write_index = 0;
        let value = self.code.get(self.cursor).copied().unwrap_or(0);
        self.cursor += 1;
        let progress = match self.cursor {
            c if c >= self.code.len() => InjectionProgress::Done,
            GRAB_MEMORY_POS => InjectionProgress::GrabMemory,
            _ => InjectionProgress::Running,
        };
        (value, progress)
    }

    /// Capture a write. Writes do not advance the cursor.
    pub fn on_write(&mut self, addr: u16, data: u8) -> InjectionProgress {
        let first = self.write_index == 0;
        self.write_index = self.write_index.saturating_add(1);
        match self.cursor {
            1 => {
                if first {
                    self.regs.sp = addr.wrapping_add(1);
                    set_high(&mut self.regs.af, data);
                    self.code[AF_HIGH_POS] = data;
                } else {
                    set_low(&mut self.regs.af, data);
                    self.code[AF_LOW_POS] = data;
                }
            }
            4 => {
                self.regs.hl = addr;
                self.regs.r = data.wrapping_sub(R_SAMPLE_OFFSET);
                self.code[R_RESTORE_POS] = self.regs.r.wrapping_sub(R_RESTORE_OFFSET);
            }
            7 => self.regs.i = data,
            10 => self.regs.de = addr,
            11 => self.regs.bc = addr,
            13 => self.regs.hl_alt = addr,
            14 => self.regs.de_alt = addr,
            15 => self.regs.bc_alt = addr,
            18 => capture_word(&mut self.regs.af_alt, first, data),
            23 => capture_word(&mut self.regs.ix, first, data),
            27 => capture_word(&mut self.regs.iy, first, data),
            other => log::debug!("unexpected write {addr:04x}={data:02x} at get cursor {other}"),
        }
        InjectionProgress::Running
    }
}

impl Default for GetRegisters {
    fn default() -> Self {
        Self::new()
    }
}

fn set_high(reg: &mut u16, value: u8) {
    *reg = (*reg & 0x00FF) | ((value as u16) << 8);
}

fn set_low(reg: &mut u16, value: u8) {
    *reg = (*reg & 0xFF00) | value as u16;
}

/// PUSH writes the high byte first.
fn capture_word(reg: &mut u16, first: bool, data: u8) {
    if first {
        set_high(reg, data);
    } else {
        set_low(reg, data);
    }
}
