//! Target profile registry.
//!
//! Each profile self-registers via [`inventory::submit!`] with a
//! [`TargetProfile`]. The front-end discovers the available targets at
//! runtime without any central list.

use busraider_core::core::ClockSource;

/// Describes one target machine the board can be plugged into.
#[derive(Debug)]
pub struct TargetProfile {
    /// CLI name used to select this target (e.g., "trs80").
    pub name: &'static str,
    pub description: &'static str,
    pub clock_hz: u32,
    /// Where the start-of-program register snippet is written.
    pub set_regs_code_addr: u16,
}

impl TargetProfile {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        clock_hz: u32,
        set_regs_code_addr: u16,
    ) -> Self {
        Self {
            name,
            description,
            clock_hz,
            set_regs_code_addr,
        }
    }
}

impl ClockSource for TargetProfile {
    fn frequency_hz(&self) -> u32 {
        self.clock_hz
    }
}

impl ClockSource for &'static TargetProfile {
    fn frequency_hz(&self) -> u32 {
        self.clock_hz
    }
}

inventory::collect!(TargetProfile);

/// Return all registered profiles, sorted by name.
pub fn all() -> Vec<&'static TargetProfile> {
    let mut entries: Vec<_> = inventory::iter::<TargetProfile>.into_iter().collect();
    entries.sort_by_key(|e| e.name);
    entries
}

/// Look up a profile by its CLI name.
pub fn find(name: &str) -> Option<&'static TargetProfile> {
    inventory::iter::<TargetProfile>
        .into_iter()
        .find(|e| e.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_sorted_and_complete() {
        let names: Vec<_> = all().iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            ["generic", "robs-z80", "serial-terminal", "trs80", "zx-spectrum"]
        );
    }

    #[test]
    fn find_by_name() {
        let trs80 = find("trs80").unwrap();
        assert_eq!(trs80.set_regs_code_addr, 0x3C00);
        assert_eq!(trs80.frequency_hz(), 1_770_000);
        assert!(find("pdp11").is_none());
    }
}
