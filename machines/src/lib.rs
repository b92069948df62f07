pub mod profiles;
pub mod registry;
pub mod sim_target;
pub mod sim_z80;

pub use registry::TargetProfile;
pub use sim_target::{SimStats, SimTarget};
pub use sim_z80::{BusCycle, CycleKind, SimZ80};
