use pmusim::outputs::{fault, DEFAULT_CURRENT_LIMIT_MA};
use pmusim::{OutputId, OutputState, PmuEmulator, SimError};

fn output(n: usize) -> OutputId {
    OutputId::new(n).unwrap()
}

fn run(emulator: &mut PmuEmulator, ticks: u32) {
    for _ in 0..ticks {
        emulator.tick(1);
    }
}

#[test]
fn test_steady_state_current_matches_ohms_law() {
    // 12 V battery, 4.7 ohm load, 100 % duty, no soft-start/inrush:
    // expect about 2553 mA.
    let mut emulator = PmuEmulator::new();
    emulator.set_battery_voltage(12_000);
    emulator.set_output_load(output(5), 4.7).unwrap();
    emulator.set_output_duty(output(5), 1000).unwrap();

    run(&mut emulator, 50);
    let current = emulator.output(output(5)).current_ma;
    assert!((current - 2553.0).abs() < 5.0, "current {current} mA");

    // Deterministic: repeated ticks keep the same value.
    run(&mut emulator, 500);
    assert!((emulator.output(output(5)).current_ma - current).abs() < 0.1);
}

#[test]
fn test_current_scales_with_duty() {
    let mut emulator = PmuEmulator::new();
    emulator.set_output_load(output(0), 10.0).unwrap();
    emulator.set_output_duty(output(0), 250).unwrap();
    run(&mut emulator, 10);
    let quarter = emulator.output(output(0)).current_ma;
    assert!((quarter - 300.0).abs() < 2.0, "quarter duty {quarter} mA");
    assert_eq!(emulator.output(output(0)).state, OutputState::Pwm);
}

#[test]
fn test_injected_fault_zeroes_current_until_cleared() {
    let mut emulator = PmuEmulator::new();
    emulator.set_output_load(output(0), 6.0).unwrap();
    emulator.set_output_duty(output(0), 1000).unwrap();
    run(&mut emulator, 10);
    assert!(emulator.output(output(0)).current_ma > 1000.0);

    emulator.inject_output_fault(output(0), fault::OVER_CURRENT);
    assert_eq!(emulator.output(output(0)).state, OutputState::OverCurrent);

    emulator.tick(1);
    assert_eq!(emulator.output(output(0)).current_ma, 0.0);

    // Persists across any number of ticks.
    run(&mut emulator, 1000);
    assert_eq!(emulator.output(output(0)).state, OutputState::OverCurrent);
    assert_eq!(emulator.output(output(0)).fault_flags, fault::OVER_CURRENT);
    assert_eq!(emulator.output(output(0)).current_ma, 0.0);

    emulator.clear_output_fault(output(0));
    assert_eq!(emulator.output(output(0)).state, OutputState::Off);
    assert_eq!(emulator.output(output(0)).fault_flags, 0);
}

#[test]
fn test_soft_start_limits_initial_current() {
    let mut emulator = PmuEmulator::new();
    emulator.configure_output_soft_start(output(1), 200);
    emulator.set_output_load(output(1), 5.0).unwrap();
    emulator.set_output_duty(output(1), 1000).unwrap();

    run(&mut emulator, 10);
    let ramping = emulator.output(output(1)).current_ma;
    run(&mut emulator, 250);
    let settled = emulator.output(output(1)).current_ma;

    assert!(ramping < settled / 2.0, "ramping {ramping}, settled {settled}");
    assert!((settled - 2400.0).abs() < 5.0);
}

#[test]
fn test_inrush_models_energization_surge() {
    let mut emulator = PmuEmulator::new();
    emulator.configure_output_inrush(output(2), 4.0, 50);
    emulator.set_output_load(output(2), 12.0).unwrap();
    emulator.set_output_duty(output(2), 1000).unwrap();

    emulator.tick(1);
    let surge = emulator.output(output(2)).current_ma;
    assert!((surge - 4000.0).abs() < 10.0, "surge {surge}");

    run(&mut emulator, 100);
    let settled = emulator.output(output(2)).current_ma;
    assert!((settled - 1000.0).abs() < 5.0, "settled {settled}");

    // Turning off and on re-arms the surge window.
    emulator.set_output_duty(output(2), 0).unwrap();
    run(&mut emulator, 10);
    emulator.set_output_duty(output(2), 1000).unwrap();
    emulator.tick(1);
    assert!((emulator.output(output(2)).current_ma - 4000.0).abs() < 10.0);
}

#[test]
fn test_auto_over_current_within_bounded_ticks() {
    let mut emulator = PmuEmulator::new();
    emulator.set_auto_faults(true);
    emulator.set_output_load(output(0), 0.4).unwrap();
    emulator.set_output_duty(output(0), 1000).unwrap();

    run(&mut emulator, 5);
    assert_eq!(emulator.output(output(0)).state, OutputState::OverCurrent);
    assert_eq!(emulator.output(output(0)).current_ma, 0.0);
}

#[test]
fn test_auto_over_temp_within_bounded_ticks() {
    let mut emulator = PmuEmulator::new();
    emulator.set_auto_faults(true);
    // Raise the current limit out of the way so heating, not
    // over-current, trips the channel.
    emulator.configure_output_limits(output(0), 1_000_000.0, 150.0);
    emulator.set_output_load(output(0), 0.1).unwrap();
    emulator.set_output_duty(output(0), 1000).unwrap();

    let mut tripped_at = None;
    for tick in 0..20_000u32 {
        emulator.tick(1);
        if emulator.output(output(0)).state == OutputState::OverTemp {
            tripped_at = Some(tick);
            break;
        }
        // Temperature must never drop below ambient on the way up.
        assert!(emulator.output(output(0)).temperature_c >= 25.0);
    }
    assert!(tripped_at.is_some(), "never reached over-temperature");
}

#[test]
fn test_thermal_decay_after_fault_trips() {
    let mut emulator = PmuEmulator::new();
    emulator.set_output_load(output(0), 0.1).unwrap();
    emulator.configure_output_limits(output(0), 1_000_000.0, 150.0);
    emulator.set_output_duty(output(0), 1000).unwrap();
    run(&mut emulator, 2000);
    let hot = emulator.output(output(0)).temperature_c;
    assert!(hot > 30.0);

    emulator.set_output_duty(output(0), 0).unwrap();
    run(&mut emulator, 20_000);
    let cooled = emulator.output(output(0)).temperature_c;
    assert!(cooled < hot);
    assert!(cooled >= 25.0);
}

#[test]
fn test_auto_short_circuit_detection() {
    let mut emulator = PmuEmulator::new();
    emulator.set_auto_faults(true);
    emulator.set_output_load(output(7), 0.01).unwrap();
    emulator.set_output_duty(output(7), 1000).unwrap();
    run(&mut emulator, 3);
    assert_eq!(emulator.output(output(7)).state, OutputState::ShortCircuit);
}

#[test]
fn test_auto_open_load_detection() {
    let mut emulator = PmuEmulator::new();
    emulator.set_auto_faults(true);
    emulator.set_output_load(output(8), 80_000.0).unwrap();
    emulator.set_output_duty(output(8), 1000).unwrap();
    run(&mut emulator, 3);
    assert_eq!(emulator.output(output(8)).state, OutputState::OpenLoad);
}

#[test]
fn test_thresholds_inactive_without_auto_faults() {
    let mut emulator = PmuEmulator::new();
    emulator.set_output_load(output(0), 0.4).unwrap();
    emulator.set_output_duty(output(0), 1000).unwrap();
    run(&mut emulator, 100);
    // 30 A flows but nothing trips.
    assert_eq!(emulator.output(output(0)).state, OutputState::On);
    assert!(emulator.output(output(0)).current_ma > DEFAULT_CURRENT_LIMIT_MA);
}

#[test]
fn test_load_validation() {
    let mut emulator = PmuEmulator::new();
    assert_eq!(
        emulator.set_output_load(output(0), -1.0),
        Err(SimError::NonPositiveLoad(-1.0))
    );
    assert_eq!(
        emulator.set_output_load(output(0), 0.0),
        Err(SimError::NonPositiveLoad(0.0))
    );
    assert!(emulator.set_output_load(output(0), 4.7).is_ok());
}

#[test]
fn test_duty_validation() {
    let mut emulator = PmuEmulator::new();
    assert_eq!(
        emulator.set_output_duty(output(0), 1500),
        Err(SimError::InvalidDuty(1500))
    );
}

#[test]
fn test_battery_voltage_feeds_current_model() {
    let mut emulator = PmuEmulator::new();
    emulator.set_output_load(output(0), 10.0).unwrap();
    emulator.set_output_duty(output(0), 1000).unwrap();

    emulator.set_battery_voltage(12_000);
    run(&mut emulator, 5);
    let at_12v = emulator.output(output(0)).current_ma;

    emulator.set_battery_voltage(14_400);
    run(&mut emulator, 5);
    let at_14v4 = emulator.output(output(0)).current_ma;

    assert!((at_12v - 1200.0).abs() < 2.0);
    assert!((at_14v4 - 1440.0).abs() < 2.0);
}
