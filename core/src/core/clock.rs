/// Provider of the target processor's clock frequency.
///
/// Pulse widths are specified in target T-states and converted to
/// wall-clock microseconds at the current frequency.
pub trait ClockSource {
    fn frequency_hz(&self) -> u32;
}

/// A clock that never changes frequency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedClock(pub u32);

impl ClockSource for FixedClock {
    fn frequency_hz(&self) -> u32 {
        self.0
    }
}

impl<T: ClockSource + ?Sized> ClockSource for Box<T> {
    fn frequency_hz(&self) -> u32 {
        (**self).frequency_hz()
    }
}

/// Convert a T-state count into microseconds at `clock_hz`, never less than 1.
pub fn us_from_t_states(t_states: u32, clock_hz: u32) -> u32 {
    if clock_hz == 0 {
        return 1;
    }
    let us = 1_000_000u64 * t_states as u64 / clock_hz as u64;
    us.clamp(1, u32::MAX as u64) as u32
}
