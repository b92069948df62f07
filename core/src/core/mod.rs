pub mod bus;
pub mod clock;

pub use bus::{AccessSpace, BusSignals, ControlSignals, MuxSelect, WaitFlags};
pub use clock::{ClockSource, FixedClock};
