use pmusim::outputs::fault as output_fault;
use pmusim::protection::TempSensor;
use pmusim::{
    BusId, InputId, MotorId, MotorMode, MotorPreset, OutputId, OutputState, PmuEmulator,
    PmuHardware, SimEvent,
};

fn input(n: usize) -> InputId {
    InputId::new(n).unwrap()
}

fn output(n: usize) -> OutputId {
    OutputId::new(n).unwrap()
}

fn motor(n: usize) -> MotorId {
    MotorId::new(n).unwrap()
}

#[test]
fn test_documented_defaults_at_init() {
    let emulator = PmuEmulator::new();

    assert_eq!(emulator.protection().battery_mv, 12_000);
    assert_eq!(emulator.protection().board_temp_c, [25.0, 25.0]);
    assert_eq!(emulator.protection().mcu_temp_c, 25.0);
    assert!(!emulator.protection().auto_faults);

    for id in OutputId::all() {
        assert_eq!(emulator.output(id).state, OutputState::Off);
        assert_eq!(emulator.output(id).duty, 0);
        assert_eq!(emulator.output(id).current_ma, 0.0);
    }
    for id in MotorId::all() {
        assert_eq!(emulator.motor(id).mode, MotorMode::Coast);
    }
    for id in BusId::all() {
        assert!(emulator.can_controller(id).online);
    }
    assert_eq!(emulator.clock().now_ms(), 0);
}

#[test]
fn test_reset_restores_defaults() {
    let mut emulator = PmuEmulator::new();
    emulator.set_battery_voltage(9_000);
    emulator.set_output_load(output(3), 2.0).unwrap();
    emulator.set_output_duty(output(3), 1000).unwrap();
    emulator.set_motor_target(motor(0), 700).unwrap();
    emulator.set_input_raw(input(0), 1000);
    for _ in 0..500 {
        emulator.tick(1);
    }
    assert!(emulator.clock().now_ms() > 0);

    emulator.reset();

    assert_eq!(emulator.clock().now_ms(), 0);
    assert_eq!(emulator.clock().uptime_s(), 0);
    assert_eq!(emulator.protection().battery_mv, 12_000);
    assert_eq!(emulator.output(output(3)).state, OutputState::Off);
    assert_eq!(emulator.output(output(3)).load_ohm, 100.0);
    assert_eq!(emulator.motor(motor(0)).target, None);
    assert_eq!(emulator.inputs().raw(input(0)), 0);
    assert_eq!(emulator.tick_count(), 0);
}

#[test]
fn test_pause_freezes_all_dynamics() {
    let mut emulator = PmuEmulator::new();
    emulator.set_output_load(output(0), 5.0).unwrap();
    emulator.set_output_duty(output(0), 1000).unwrap();
    emulator.tick(1);
    let current = emulator.output(output(0)).current_ma;

    emulator.set_paused(true);
    emulator.set_output_load(output(0), 1.0).unwrap();
    for _ in 0..100 {
        assert_eq!(emulator.tick(1), 0);
    }
    // Setter took effect but no tick recomputed the current.
    assert_eq!(emulator.output(output(0)).current_ma, current);
    assert_eq!(emulator.clock().now_ms(), 1);

    emulator.set_paused(false);
    emulator.tick(1);
    assert!((emulator.output(output(0)).current_ma - 12_000.0).abs() < 20.0);
}

#[test]
fn test_time_scale_accelerates_simulated_time() {
    let mut emulator = PmuEmulator::new();
    emulator.set_time_scale(10.0).unwrap();
    for _ in 0..100 {
        emulator.tick(1);
    }
    assert_eq!(emulator.clock().now_ms(), 1000);
    assert_eq!(emulator.clock().uptime_s(), 1);
}

#[test]
fn test_uptime_counts_simulated_seconds() {
    let mut emulator = PmuEmulator::new();
    for _ in 0..2500 {
        emulator.tick(1);
    }
    assert_eq!(emulator.clock().uptime_s(), 2);
    assert_eq!(emulator.clock().now_ms(), 2500);
}

#[test]
fn test_total_current_aggregates_outputs_and_motors() {
    let mut emulator = PmuEmulator::new();
    emulator.set_output_load(output(0), 12.0).unwrap();
    emulator.set_output_duty(output(0), 1000).unwrap();
    emulator.set_output_load(output(1), 12.0).unwrap();
    emulator.set_output_duty(output(1), 1000).unwrap();
    emulator
        .set_motor_mode(motor(0), MotorMode::Forward, 1000)
        .unwrap();

    for _ in 0..5 {
        emulator.tick(1);
    }
    let total = emulator.protection().total_current_ma;
    // Two 1 A outputs plus whatever the motor draws.
    assert!(total > 2000.0, "total {total}");
    let motor_current = emulator.motor_state(motor(0)).current_a * 1000.0;
    assert!((total - 2000.0 - motor_current).abs() < 20.0);
}

#[test]
fn test_output_events_report_state_changes() {
    let mut emulator = PmuEmulator::new();
    emulator.set_output_duty(output(9), 500).unwrap();
    emulator.inject_output_fault(output(9), output_fault::SHORT_CIRCUIT);

    let events = emulator.drain_events();
    let mut saw_pwm = false;
    let mut saw_fault = false;
    let mut saw_short = false;
    for event in &events {
        match event {
            SimEvent::OutputStateChanged { channel: 9, state } => match state {
                OutputState::Pwm => saw_pwm = true,
                OutputState::ShortCircuit => saw_short = true,
                _ => {}
            },
            SimEvent::FaultRaised { .. } => saw_fault = true,
            _ => {}
        }
    }
    assert!(saw_pwm && saw_fault && saw_short);
    // Read-and-clear.
    assert!(emulator.drain_events().is_empty());
}

#[test]
fn test_scenario_round_trip_preserves_field_set() {
    let mut emulator = PmuEmulator::new();
    emulator.set_input_raw(input(0), 512);
    emulator.set_input_raw(input(7), 1023);
    emulator.set_digital_state(input(3), true);
    emulator.set_battery_voltage(13_200);
    emulator.set_temperature(TempSensor::Board1, 44.0);
    emulator.set_output_load(output(5), 4.7).unwrap();
    emulator.set_output_duty(output(5), 750).unwrap();
    emulator.set_motor_preset(motor(1), MotorPreset::Seat);
    emulator.set_motor_target(motor(1), 333).unwrap();
    emulator
        .add_periodic_can_message(BusId::new(2).unwrap(), 0x18FF_50E5, &[1, 2], true, 100)
        .unwrap();

    let scenario = emulator.capture_scenario();

    let mut rebuilt = PmuEmulator::new();
    rebuilt.apply_scenario(&scenario).unwrap();

    assert_eq!(rebuilt.inputs().raw(input(0)), 512);
    assert_eq!(rebuilt.inputs().raw(input(7)), 1023);
    assert!(rebuilt.inputs().digital_input(input(3)).state);
    assert_eq!(rebuilt.protection().battery_mv, 13_200);
    assert_eq!(rebuilt.protection().board_temp_c[1], 44.0);
    assert_eq!(rebuilt.output(output(5)).duty, 750);
    assert_eq!(rebuilt.output(output(5)).load_ohm, 4.7);
    assert_eq!(rebuilt.motor(motor(1)).preset, Some(MotorPreset::Seat));
    assert_eq!(rebuilt.motor(motor(1)).target, Some(333));

    // And the capture of the rebuilt emulator matches the original.
    assert_eq!(rebuilt.capture_scenario(), scenario);
}

#[test]
fn test_scenario_json_round_trip() {
    let mut emulator = PmuEmulator::new();
    emulator.set_battery_voltage(14_000);
    emulator
        .add_periodic_can_message(BusId::new(0).unwrap(), 0x321, &[9, 8, 7], false, 250)
        .unwrap();

    let scenario = emulator.capture_scenario();
    let json = serde_json::to_string_pretty(&scenario).unwrap();
    let parsed: pmusim::Scenario = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, scenario);
}

#[test]
fn test_snapshot_serializes() {
    let mut emulator = PmuEmulator::new();
    emulator.set_output_duty(output(0), 1000).unwrap();
    for _ in 0..10 {
        emulator.tick(1);
    }
    let snapshot = emulator.snapshot();
    let json = serde_json::to_string(&snapshot).unwrap();
    assert!(json.contains("\"now_ms\":10"));
    assert!(json.contains("\"battery_mv\":12000"));
}

#[test]
fn test_hardware_trait_drives_the_emulator() {
    let mut emulator = PmuEmulator::new();

    // The firmware-facing capability surface works against the simulation.
    emulator.set_input_voltage(input(2), 1.65);
    let hal: &mut dyn PmuHardware = &mut emulator;

    assert_eq!(hal.battery_mv(), 12_000);
    assert!((hal.adc_voltage(input(2)) - 1.65).abs() < 0.01);

    hal.set_output_duty(output(4), 1000).unwrap();
    hal.set_motor(motor(0), MotorMode::Forward, 800).unwrap();

    emulator.tick(5);
    assert_eq!(emulator.output(output(4)).state, OutputState::On);
    assert!(emulator.motor_state(motor(0)).current_a > 0.0);
}

#[test]
fn test_protection_fault_bitmask_is_plain_data() {
    let mut emulator = PmuEmulator::new();
    emulator.inject_protection_fault(0x0005);
    for _ in 0..100 {
        emulator.tick(1);
    }
    assert_eq!(emulator.protection().fault_flags, 0x0005);
    emulator.inject_protection_fault(0x0002);
    assert_eq!(emulator.protection().fault_flags, 0x0007);
    emulator.clear_protection_faults();
    assert_eq!(emulator.protection().fault_flags, 0);
}

#[test]
fn test_status_bits_reflect_output_activity() {
    let mut emulator = PmuEmulator::new();
    emulator.tick(1);
    assert_eq!(
        emulator.protection().status_bits & pmusim::protection::status::OUTPUTS_ACTIVE,
        0
    );

    emulator.set_output_duty(output(0), 1000).unwrap();
    emulator.tick(1);
    assert_ne!(
        emulator.protection().status_bits & pmusim::protection::status::OUTPUTS_ACTIVE,
        0
    );

    emulator.inject_output_fault(output(0), output_fault::OVER_TEMP);
    emulator.tick(1);
    assert_ne!(
        emulator.protection().status_bits & pmusim::protection::status::OUTPUT_FAULT,
        0
    );
}
