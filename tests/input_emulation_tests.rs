use pmusim::inputs::{ADC_MAX, ADC_VREF};
use pmusim::{InputId, PmuEmulator};

fn input(n: usize) -> InputId {
    InputId::new(n).unwrap()
}

#[cfg(test)]
mod analog_tests {
    use super::*;

    #[test]
    fn test_voltage_round_trip_within_one_lsb() {
        let mut emulator = PmuEmulator::new();
        let lsb = ADC_VREF / ADC_MAX as f32;

        for millivolts in (0..=3300).step_by(37) {
            let volts = millivolts as f32 / 1000.0;
            emulator.set_input_voltage(input(0), volts);
            let read_back = emulator.inputs().voltage(input(0));
            assert!(
                (read_back - volts).abs() <= lsb,
                "set {volts} read {read_back}"
            );
        }
    }

    #[test]
    fn test_raw_and_voltage_views_agree() {
        let mut emulator = PmuEmulator::new();
        emulator.set_input_raw(input(4), 512);
        let voltage = emulator.inputs().voltage(input(4));
        emulator.set_input_voltage(input(4), voltage);
        assert_eq!(emulator.inputs().raw(input(4)), 512);
    }

    #[test]
    fn test_frequency_does_not_touch_voltage() {
        let mut emulator = PmuEmulator::new();
        emulator.set_input_raw(input(2), 300);
        emulator.set_input_frequency(input(2), 4500.0);
        assert_eq!(emulator.inputs().raw(input(2)), 300);
        assert_eq!(emulator.inputs().frequency(input(2)), 4500.0);
    }

    #[test]
    fn test_set_all_updates_every_channel() {
        let mut emulator = PmuEmulator::new();
        let mut raw = [0u16; pmusim::channel::INPUT_COUNT];
        for (index, value) in raw.iter_mut().enumerate() {
            *value = (index as u16) * 50;
        }
        emulator.set_all_inputs(&raw);
        assert_eq!(emulator.inputs().raw(input(10)), 500);
        assert_eq!(emulator.inputs().raw(input(19)), 950);
    }

    #[test]
    fn test_out_of_range_channel_is_error_not_panic() {
        assert!(InputId::new(20).is_err());
        assert!(InputId::new(usize::MAX).is_err());
    }
}

#[cfg(test)]
mod debounce_tests {
    use super::*;

    #[test]
    fn test_glitch_shorter_than_window_filtered() {
        let mut emulator = PmuEmulator::new();
        emulator.configure_digital(input(0), false, pmusim::inputs::PullConfig::None, 50);

        emulator.set_digital_state(input(0), true);
        for _ in 0..30 {
            emulator.tick(1);
        }
        // Drops back before the 50 ms window expires.
        emulator.set_digital_state(input(0), false);
        for _ in 0..100 {
            emulator.tick(1);
        }

        assert!(!emulator.inputs().digital_state(input(0)));
        assert!(!emulator.rising_edge(input(0)));
        assert_eq!(emulator.inputs().digital_input(input(0)).pulse_count, 0);
    }

    #[test]
    fn test_stable_change_debounces_exactly_once() {
        let mut emulator = PmuEmulator::new();
        emulator.configure_digital(input(0), false, pmusim::inputs::PullConfig::None, 50);

        emulator.set_digital_state(input(0), true);
        for _ in 0..49 {
            emulator.tick(1);
        }
        assert!(!emulator.inputs().digital_state(input(0)));
        emulator.tick(1);
        emulator.tick(1);
        assert!(emulator.inputs().digital_state(input(0)));

        // Exactly one rising edge, no falling edge.
        assert!(emulator.rising_edge(input(0)));
        assert!(!emulator.rising_edge(input(0)));
        assert!(!emulator.falling_edge(input(0)));
        assert_eq!(emulator.inputs().digital_input(input(0)).pulse_count, 1);
    }

    #[test]
    fn test_edge_latches_are_read_and_clear() {
        let mut emulator = PmuEmulator::new();
        emulator.set_digital_state(input(3), true);
        emulator.tick(1);
        emulator.set_digital_state(input(3), false);
        emulator.tick(1);

        assert!(emulator.rising_edge(input(3)));
        assert!(emulator.falling_edge(input(3)));
        assert!(!emulator.rising_edge(input(3)));
        assert!(!emulator.falling_edge(input(3)));
    }

    #[test]
    fn test_pulse_returns_to_prior_state_without_calls() {
        let mut emulator = PmuEmulator::new();
        emulator.pulse_digital(input(5), 25);
        for _ in 0..10 {
            emulator.tick(1);
        }
        assert!(emulator.inputs().digital_input(input(5)).state);
        for _ in 0..20 {
            emulator.tick(1);
        }
        assert!(!emulator.inputs().digital_input(input(5)).state);
    }

    #[test]
    fn test_pulse_survives_pause() {
        let mut emulator = PmuEmulator::new();
        emulator.pulse_digital(input(5), 25);
        emulator.set_paused(true);
        for _ in 0..100 {
            emulator.tick(1);
        }
        // Simulated time did not move, so the pulse is still armed.
        assert!(emulator.inputs().digital_input(input(5)).state);
        emulator.set_paused(false);
        for _ in 0..30 {
            emulator.tick(1);
        }
        assert!(!emulator.inputs().digital_input(input(5)).state);
    }

    #[test]
    fn test_bitmask_views() {
        let mut emulator = PmuEmulator::new();
        emulator.set_digital_all(0b1010_0001);
        emulator.tick(1);
        assert_eq!(emulator.digital_all(), 0b1010_0001);

        emulator.toggle_digital(input(0));
        emulator.tick(1);
        assert_eq!(emulator.digital_all(), 0b1010_0000);
    }
}
