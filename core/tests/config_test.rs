use busraider_core::config::{MAX_BUS_SOCKETS, TimingConfig};
use busraider_core::prelude::*;
use busraider_machines::registry;
mod common;
use common::{SPIN, arbiter_with, attach, load, wait_for_report};

// ---- Timing tables ----

#[test]
fn test_timing_from_toml_keeps_unset_defaults() {
    let timing: TimingConfig = toml::from_str(
        r#"
        reset_t_states = 250
        max_service_us = 500
        "#,
    )
    .unwrap();
    assert_eq!(timing.reset_t_states, 250);
    assert_eq!(timing.max_service_us, 500);
    assert_eq!(timing.nmi_t_states, 32);
    assert_eq!(timing.busack_timeout_us, 500_000);
}

#[test]
fn test_timing_round_trips_through_toml() {
    let timing = TimingConfig {
        irq_t_states: 64,
        service_loops: 10,
        ..Default::default()
    };
    let text = toml::to_string(&timing).unwrap();
    let back: TimingConfig = toml::from_str(&text).unwrap();
    assert_eq!(back, timing);
}

#[test]
fn test_pulse_width_scales_with_clock() {
    let timing = TimingConfig {
        reset_t_states: 400,
        ..Default::default()
    };
    // 400 T-states at 4 MHz is 100us; at 1 MHz it would be 400us
    let mut arb = BusArbiter::new(
        busraider_machines::SimTarget::new(4_000_000),
        FixedClock(4_000_000),
        timing,
    );
    load(&mut arb, 0, &SPIN);
    let (id, rec) = attach(&mut arb, SocketConfig::new());
    let start = arb.bus().micros();
    arb.request_reset(id, None).unwrap();
    wait_for_report(&mut arb, &rec, id, 5_000).unwrap();
    let width = arb.bus().micros() - start;
    assert!((100..400).contains(&width), "pulse took {width}us");
}

#[test]
fn test_socket_table_is_bounded() {
    let mut arb = arbiter_with(TimingConfig::default());
    for _ in 0..MAX_BUS_SOCKETS {
        attach(&mut arb, SocketConfig::new());
    }
    let extra = arb.register(SocketConfig::new(), busraider_core::socket::NullHandler);
    assert_eq!(extra, Err(BusError::TooManySockets(MAX_BUS_SOCKETS)));
}

// ---- Target profiles ----

#[test]
fn test_profile_drives_pulse_timing() {
    let profile = registry::find("zx-spectrum").unwrap();
    let mut arb = BusArbiter::new(
        busraider_machines::SimTarget::new(profile.clock_hz),
        profile,
        TimingConfig::default(),
    );
    load(&mut arb, 0, &SPIN);
    let (id, rec) = attach(&mut arb, SocketConfig::new());
    arb.request_nmi(id, None).unwrap();
    let report = wait_for_report(&mut arb, &rec, id, 5_000).unwrap();
    assert_eq!(report.outcome, ActionOutcome::Completed);
    assert_eq!(profile.set_regs_code_addr, 0x4000);
}

#[test]
fn test_unknown_profile_is_none() {
    assert!(registry::find("pdp-11").is_none());
    assert!(registry::all().len() >= 5);
}
