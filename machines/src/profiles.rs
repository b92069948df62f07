//! Shipped target profiles.

use crate::registry::TargetProfile;

inventory::submit! {
    TargetProfile::new("generic", "Bare Z80 with RAM only", 1_000_000, 0x0000)
}

inventory::submit! {
    TargetProfile::new("robs-z80", "Rob's Z80 single-board computer", 12_000_000, 0x0000)
}

// Snippets land in display RAM, which the program overwrites anyway
inventory::submit! {
    TargetProfile::new("trs80", "TRS-80 Model 1", 1_770_000, 0x3C00)
}

inventory::submit! {
    TargetProfile::new("zx-spectrum", "ZX Spectrum 48K", 3_500_000, 0x4000)
}

inventory::submit! {
    TargetProfile::new("serial-terminal", "Serial terminal", 7_000_000, 0x0000)
}
