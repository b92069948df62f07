//! Z80 register file as seen from outside the processor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Full external-processor register file.
///
/// Copied between components, never shared. `int_mode` and `int_enabled`
/// are `None` when they could not be observed (a register get cannot read
/// them back from the bus).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Z80Registers {
    pub pc: u16,
    pub sp: u16,
    pub af: u16,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub af_alt: u16, // AF'
    pub bc_alt: u16, // BC'
    pub de_alt: u16, // DE'
    pub hl_alt: u16, // HL'
    pub ix: u16,
    pub iy: u16,
    pub i: u8,
    pub r: u8,
    pub int_mode: Option<u8>,
    pub int_enabled: Option<bool>,
}

impl Z80Registers {
    pub fn a(&self) -> u8 {
        (self.af >> 8) as u8
    }

    pub fn f(&self) -> u8 {
        self.af as u8
    }

    /// Same register file with the fields a register get cannot observe cleared.
    pub fn observable(&self) -> Self {
        Self {
            int_mode: None,
            int_enabled: None,
            ..*self
        }
    }
}

fn flag_letters(f: u8) -> String {
    const LETTERS: [(u8, char); 8] = [
        (0x80, 'S'),
        (0x40, 'Z'),
        (0x20, '-'),
        (0x10, 'H'),
        (0x08, '-'),
        (0x04, 'P'),
        (0x02, 'N'),
        (0x01, 'C'),
    ];
    LETTERS
        .iter()
        .map(|&(mask, c)| if c != '-' && f & mask != 0 { c } else { '-' })
        .collect()
}

impl fmt::Display for Z80Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PC={:04x} SP={:04x} BC={:04x} AF={:04x} HL={:04x} DE={:04x} IX={:04x} IY={:04x}",
            self.pc, self.sp, self.bc, self.af, self.hl, self.de, self.ix, self.iy
        )?;
        write!(
            f,
            " AF'={:04x} BC'={:04x} HL'={:04x} DE'={:04x} I={:02x} R={:02x}",
            self.af_alt, self.bc_alt, self.hl_alt, self.de_alt, self.i, self.r
        )?;
        write!(
            f,
            "  F={} F'={}",
            flag_letters(self.f()),
            flag_letters(self.af_alt as u8)
        )?;
        match self.int_mode {
            Some(im) => write!(f, " IM{im}")?,
            None => write!(f, " IM?")?,
        }
        match self.int_enabled {
            Some(true) => write!(f, " IFF12"),
            Some(false) => write!(f, " IFF  "),
            None => write!(f, " IFF??"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_register_dump_layout() {
        let regs = Z80Registers {
            pc: 0x8000,
            sp: 0xFFFF,
            af: 0x12C1,
            bc: 0x5678,
            int_mode: Some(1),
            int_enabled: Some(true),
            ..Default::default()
        };
        let text = regs.to_string();
        assert!(text.starts_with("PC=8000 SP=ffff BC=5678 AF=12c1"));
        assert!(text.contains("F=SZ-----C"));
        assert!(text.ends_with("IM1 IFF12"));
    }

    #[test]
    fn observable_drops_interrupt_state() {
        let regs = Z80Registers {
            int_mode: Some(2),
            int_enabled: Some(false),
            r: 0x10,
            ..Default::default()
        };
        let seen = regs.observable();
        assert_eq!(seen.int_mode, None);
        assert_eq!(seen.int_enabled, None);
        assert_eq!(seen.r, 0x10);
    }
}
