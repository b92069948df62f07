//! Pin assignment for the V2.0 interface board.
//!
//! All bus control lines are active low. The PIB is the 8-bit parallel
//! interface used for both address read-back and data.

pub const MREQ_BAR: u32 = 0;
pub const IORQ_BAR: u32 = 1;
pub const BUSACK_BAR: u32 = 2;
pub const M1_BAR: u32 = 3;
pub const WAIT_BAR: u32 = 5;
pub const DATA_DIR_IN: u32 = 6;
pub const HADDR_CK: u32 = 7;
pub const PAGING_RAM: u32 = 8; // high = target RAM paged in
pub const MUX_SEL_LOW: u32 = 9;
pub const IORQ_WAIT_EN: u32 = 12;
pub const MREQ_WAIT_EN: u32 = 13;
pub const MUX_EN_BAR: u32 = 16;
pub const WR_BAR: u32 = 17;
pub const RD_BAR: u32 = 18;
pub const BUSRQ_BAR: u32 = 19;
pub const PIB_LOW: u32 = 20;

pub const fn bit(pin: u32) -> u32 {
    1 << pin
}

pub const MUX_SEL_MASK: u32 = 0x07 << MUX_SEL_LOW;
pub const PIB_MASK: u32 = 0xFF << PIB_LOW;

/// Control lines the firmware drives while it masters the bus.
pub const MASTER_CONTROL_MASK: u32 = bit(MREQ_BAR) | bit(IORQ_BAR) | bit(RD_BAR) | bit(WR_BAR);

pub const WAIT_EN_MASK: u32 = bit(IORQ_WAIT_EN) | bit(MREQ_WAIT_EN);
