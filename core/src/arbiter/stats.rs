use serde::Serialize;

/// Running counters kept by the arbiter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub waits_seen: u64,
    pub fast_path_releases: u64,
    pub full_decodes: u64,
    /// Later decoders that disagreed with the first response.
    pub decode_conflicts: u64,
    pub holds: u64,
    /// Reads whose MREQ/IORQ never cleared within `max_end_of_read_us`.
    pub read_timeouts: u64,
    pub service_degradations: u64,
    pub actions_started: u64,
    pub actions_completed: u64,
    pub actions_failed: u64,
    pub busack_failures: u64,
    pub longest_wait_us: u64,
}
