//! Power-output simulation: 30 PROFET-style high-side switch channels.
//!
//! Each channel carries the 8-value state convention of the real silicon
//! (off, on, over-current, over-temperature, short-circuit, open-load,
//! PWM, disabled), an ohmic current model shaped by soft-start and inrush,
//! and a first-order RC thermal accumulator. Fault states are terminal
//! until explicitly cleared; fault bits persist across ticks.

use crate::channel::{OutputId, OUTPUT_COUNT};
use crate::error::SimError;
use crate::events::{EventQueue, FaultSource, SimEvent};
use serde::{Deserialize, Serialize};

pub const DUTY_MAX: u16 = 1000;

/// Fault bits in [`PowerOutput::fault_flags`].
pub mod fault {
    pub const OVER_CURRENT: u8 = 1 << 0;
    pub const OVER_TEMP: u8 = 1 << 1;
    pub const SHORT_CIRCUIT: u8 = 1 << 2;
    pub const OPEN_LOAD: u8 = 1 << 3;
}

pub const DEFAULT_LOAD_OHM: f32 = 100.0;
pub const DEFAULT_CURRENT_LIMIT_MA: f32 = 25_000.0;
pub const DEFAULT_TEMP_LIMIT_C: f32 = 150.0;

/// Below this load resistance the channel reads as a dead short.
pub const SHORT_CIRCUIT_OHM: f32 = 0.05;
/// Above this load resistance a commanded-on channel reads as open load.
pub const OPEN_LOAD_OHM: f32 = 50_000.0;

// High-side switch die model: on-resistance heats the die, a fixed
// time constant bleeds the energy to the board.
const INTERNAL_RESISTANCE_OHM: f32 = 0.004;
const THERMAL_CAPACITY_J_PER_C: f32 = 0.5;
const COOLING_TAU_S: f32 = 5.0;
const MIN_LOAD_EPSILON_OHM: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputState {
    Off,
    On,
    OverCurrent,
    OverTemp,
    ShortCircuit,
    OpenLoad,
    Pwm,
    Disabled,
}

impl OutputState {
    pub const fn is_fault(self) -> bool {
        matches!(
            self,
            Self::OverCurrent | Self::OverTemp | Self::ShortCircuit | Self::OpenLoad
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerOutput {
    pub state: OutputState,
    /// Commanded PWM duty, 0-1000.
    pub duty: u16,
    pub current_ma: f32,
    pub temperature_c: f32,
    pub fault_flags: u8,
    pub load_ohm: f32,
    pub inrush_multiplier: f32,
    pub inrush_remaining_ms: u32,
    /// Inrush window re-armed on every off-to-on transition.
    pub inrush_duration_ms: u32,
    pub soft_start_ms: u32,
    pub soft_start_elapsed_ms: u32,
    pub thermal_energy_j: f32,
    pub current_limit_ma: f32,
    pub temp_limit_c: f32,
}

impl PowerOutput {
    fn new() -> Self {
        Self {
            state: OutputState::Off,
            duty: 0,
            current_ma: 0.0,
            temperature_c: 25.0,
            fault_flags: 0,
            load_ohm: DEFAULT_LOAD_OHM,
            inrush_multiplier: 1.0,
            inrush_remaining_ms: 0,
            inrush_duration_ms: 0,
            soft_start_ms: 0,
            soft_start_elapsed_ms: 0,
            thermal_energy_j: 0.0,
            current_limit_ma: DEFAULT_CURRENT_LIMIT_MA,
            temp_limit_c: DEFAULT_TEMP_LIMIT_C,
        }
    }

    /// Linearly ramped duty while the soft-start window runs.
    fn effective_duty(&self) -> f32 {
        if self.soft_start_ms > 0 && self.soft_start_elapsed_ms < self.soft_start_ms {
            self.duty as f32 * self.soft_start_elapsed_ms as f32 / self.soft_start_ms as f32
        } else {
            self.duty as f32
        }
    }

    fn arm_turn_on_shaping(&mut self) {
        self.soft_start_elapsed_ms = 0;
        self.inrush_remaining_ms = self.inrush_duration_ms;
    }

    /// Fault state matching the highest-priority set bit.
    fn fault_state_for(flags: u8) -> OutputState {
        if flags & fault::SHORT_CIRCUIT != 0 {
            OutputState::ShortCircuit
        } else if flags & fault::OVER_CURRENT != 0 {
            OutputState::OverCurrent
        } else if flags & fault::OVER_TEMP != 0 {
            OutputState::OverTemp
        } else {
            OutputState::OpenLoad
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OutputBank {
    pub channels: [PowerOutput; OUTPUT_COUNT],
}

impl OutputBank {
    pub fn new() -> Self {
        Self {
            channels: core::array::from_fn(|_| PowerOutput::new()),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn transition(
        channel: &mut PowerOutput,
        index: usize,
        state: OutputState,
        events: &mut EventQueue,
    ) {
        if channel.state != state {
            channel.state = state;
            events.push(SimEvent::OutputStateChanged {
                channel: index as u8,
                state,
            });
        }
    }

    fn raise_fault(
        channel: &mut PowerOutput,
        index: usize,
        flags: u8,
        events: &mut EventQueue,
    ) {
        channel.fault_flags |= flags;
        channel.current_ma = 0.0;
        events.push(SimEvent::FaultRaised {
            source: FaultSource::Output(index as u8),
            flags: flags as u16,
        });
        Self::transition(
            channel,
            index,
            PowerOutput::fault_state_for(channel.fault_flags),
            events,
        );
    }

    pub fn tick(
        &mut self,
        delta_ms: u64,
        battery_mv: u16,
        ambient_c: f32,
        auto_faults: bool,
        events: &mut EventQueue,
    ) {
        let dt_s = delta_ms as f32 / 1000.0;

        for (index, channel) in self.channels.iter_mut().enumerate() {
            // Thermal decay runs in every state so a tripped channel cools
            // back toward ambient.
            let conducting = matches!(channel.state, OutputState::On | OutputState::Pwm);

            if channel.state.is_fault() {
                channel.current_ma = 0.0;
            } else if !conducting {
                channel.current_ma = 0.0;
            } else {
                if channel.soft_start_elapsed_ms < channel.soft_start_ms {
                    channel.soft_start_elapsed_ms = (channel.soft_start_elapsed_ms as u64
                        + delta_ms)
                        .min(channel.soft_start_ms as u64)
                        as u32;
                }

                let load = channel.load_ohm.max(MIN_LOAD_EPSILON_OHM);
                let mut current_ma =
                    battery_mv as f32 / load * (channel.effective_duty() / DUTY_MAX as f32);

                if channel.inrush_remaining_ms > 0 {
                    current_ma *= channel.inrush_multiplier;
                    channel.inrush_remaining_ms =
                        channel.inrush_remaining_ms.saturating_sub(delta_ms as u32);
                }

                channel.current_ma = current_ma;
            }

            let current_a = channel.current_ma / 1000.0;
            let power_w = current_a * current_a * INTERNAL_RESISTANCE_OHM;
            channel.thermal_energy_j +=
                (power_w - channel.thermal_energy_j / COOLING_TAU_S) * dt_s;
            channel.thermal_energy_j = channel.thermal_energy_j.max(0.0);
            channel.temperature_c = ambient_c + channel.thermal_energy_j / THERMAL_CAPACITY_J_PER_C;

            if auto_faults && !channel.state.is_fault() {
                if conducting && channel.load_ohm < SHORT_CIRCUIT_OHM {
                    Self::raise_fault(channel, index, fault::SHORT_CIRCUIT, events);
                } else if channel.current_ma > channel.current_limit_ma {
                    Self::raise_fault(channel, index, fault::OVER_CURRENT, events);
                } else if channel.temperature_c > channel.temp_limit_c {
                    Self::raise_fault(channel, index, fault::OVER_TEMP, events);
                } else if conducting && channel.load_ohm > OPEN_LOAD_OHM {
                    Self::raise_fault(channel, index, fault::OPEN_LOAD, events);
                }
            }
        }
    }

    /// Commands a duty cycle. 0 turns the channel off, 1000 fully on,
    /// anything between selects PWM. Stored but not applied while the
    /// channel is disabled or latched in a fault state.
    pub fn set_duty(
        &mut self,
        id: OutputId,
        duty: u16,
        events: &mut EventQueue,
    ) -> Result<(), SimError> {
        if duty > DUTY_MAX {
            return Err(SimError::InvalidDuty(duty));
        }
        let index = id.index();
        let channel = &mut self.channels[index];
        channel.duty = duty;

        if channel.state.is_fault() || channel.state == OutputState::Disabled {
            return Ok(());
        }

        let was_off = channel.state == OutputState::Off;
        let next = match duty {
            0 => OutputState::Off,
            DUTY_MAX => OutputState::On,
            _ => OutputState::Pwm,
        };
        if was_off && next != OutputState::Off {
            channel.arm_turn_on_shaping();
        }
        Self::transition(channel, index, next, events);
        Ok(())
    }

    /// Rejects non-positive or non-finite resistance.
    pub fn set_load(&mut self, id: OutputId, ohms: f32) -> Result<(), SimError> {
        if !ohms.is_finite() || ohms <= 0.0 {
            return Err(SimError::NonPositiveLoad(ohms));
        }
        self.channels[id.index()].load_ohm = ohms;
        Ok(())
    }

    /// ORs fault bits in and forces the matching fault state immediately,
    /// bypassing the threshold checks.
    pub fn inject_fault(&mut self, id: OutputId, flags: u8, events: &mut EventQueue) {
        let index = id.index();
        let channel = &mut self.channels[index];
        Self::raise_fault(channel, index, flags & 0x0F, events);
    }

    /// Clears the fault mask and returns the channel to off. The stored
    /// duty is not re-applied; the host must re-command the channel.
    pub fn clear_fault(&mut self, id: OutputId, events: &mut EventQueue) {
        let index = id.index();
        let channel = &mut self.channels[index];
        channel.fault_flags = 0;
        channel.duty = 0;
        channel.current_ma = 0.0;
        if channel.state != OutputState::Disabled {
            Self::transition(channel, index, OutputState::Off, events);
        }
    }

    /// External disable, orthogonal to the fault latches.
    pub fn set_enabled(&mut self, id: OutputId, enabled: bool, events: &mut EventQueue) {
        let index = id.index();
        let channel = &mut self.channels[index];
        if enabled {
            if channel.state == OutputState::Disabled {
                let next = if channel.fault_flags != 0 {
                    PowerOutput::fault_state_for(channel.fault_flags)
                } else {
                    OutputState::Off
                };
                Self::transition(channel, index, next, events);
            }
        } else {
            channel.current_ma = 0.0;
            Self::transition(channel, index, OutputState::Disabled, events);
        }
    }

    pub fn configure_soft_start(&mut self, id: OutputId, soft_start_ms: u32) {
        self.channels[id.index()].soft_start_ms = soft_start_ms;
    }

    pub fn configure_inrush(&mut self, id: OutputId, multiplier: f32, duration_ms: u32) {
        let channel = &mut self.channels[id.index()];
        channel.inrush_multiplier = multiplier.max(1.0);
        channel.inrush_duration_ms = duration_ms;
    }

    pub fn configure_limits(&mut self, id: OutputId, current_limit_ma: f32, temp_limit_c: f32) {
        let channel = &mut self.channels[id.index()];
        channel.current_limit_ma = current_limit_ma.max(0.0);
        channel.temp_limit_c = temp_limit_c;
    }

    pub fn channel(&self, id: OutputId) -> &PowerOutput {
        &self.channels[id.index()]
    }

    pub fn total_current_ma(&self) -> f32 {
        self.channels.iter().map(|c| c.current_ma).sum()
    }

    pub fn any_fault(&self) -> bool {
        self.channels.iter().any(|c| c.state.is_fault())
    }

    pub fn any_active(&self) -> bool {
        self.channels
            .iter()
            .any(|c| matches!(c.state, OutputState::On | OutputState::Pwm))
    }
}

impl Default for OutputBank {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> OutputId {
        OutputId::new(n).unwrap()
    }

    fn run(bank: &mut OutputBank, ticks: u32, battery_mv: u16, auto: bool) {
        let mut events = EventQueue::new();
        for _ in 0..ticks {
            bank.tick(1, battery_mv, 25.0, auto, &mut events);
        }
    }

    #[test]
    fn duty_selects_state() {
        let mut bank = OutputBank::new();
        let mut events = EventQueue::new();
        bank.set_duty(id(0), 500, &mut events).unwrap();
        assert_eq!(bank.channel(id(0)).state, OutputState::Pwm);
        bank.set_duty(id(0), 1000, &mut events).unwrap();
        assert_eq!(bank.channel(id(0)).state, OutputState::On);
        bank.set_duty(id(0), 0, &mut events).unwrap();
        assert_eq!(bank.channel(id(0)).state, OutputState::Off);
        assert!(bank.set_duty(id(0), 1001, &mut events).is_err());
    }

    #[test]
    fn ohms_law_current_at_full_duty() {
        let mut bank = OutputBank::new();
        let mut events = EventQueue::new();
        bank.set_load(id(5), 4.7).unwrap();
        bank.set_duty(id(5), 1000, &mut events).unwrap();
        run(&mut bank, 10, 12_000, false);
        let current = bank.channel(id(5)).current_ma;
        assert!((current - 12_000.0 / 4.7).abs() < 1.0, "got {current}");
    }

    #[test]
    fn soft_start_ramps_linearly() {
        let mut bank = OutputBank::new();
        let mut events = EventQueue::new();
        bank.configure_soft_start(id(0), 100);
        bank.set_load(id(0), 10.0).unwrap();
        bank.set_duty(id(0), 1000, &mut events).unwrap();

        bank.tick(1, 12_000, 25.0, false, &mut events);
        let early = bank.channel(id(0)).current_ma;
        for _ in 0..49 {
            bank.tick(1, 12_000, 25.0, false, &mut events);
        }
        let mid = bank.channel(id(0)).current_ma;
        for _ in 0..60 {
            bank.tick(1, 12_000, 25.0, false, &mut events);
        }
        let done = bank.channel(id(0)).current_ma;

        assert!(early < mid && mid < done);
        assert!((done - 1200.0).abs() < 1.0);
        assert!((mid - 600.0).abs() < 30.0, "midpoint {mid}");
    }

    #[test]
    fn inrush_multiplier_decays_to_unity() {
        let mut bank = OutputBank::new();
        let mut events = EventQueue::new();
        bank.configure_inrush(id(0), 3.0, 20);
        bank.set_load(id(0), 12.0).unwrap();
        bank.set_duty(id(0), 1000, &mut events).unwrap();

        bank.tick(1, 12_000, 25.0, false, &mut events);
        assert!((bank.channel(id(0)).current_ma - 3000.0).abs() < 1.0);
        run(&mut bank, 30, 12_000, false);
        assert!((bank.channel(id(0)).current_ma - 1000.0).abs() < 1.0);
    }

    #[test]
    fn injected_fault_persists_until_cleared() {
        let mut bank = OutputBank::new();
        let mut events = EventQueue::new();
        bank.set_duty(id(0), 1000, &mut events).unwrap();
        bank.inject_fault(id(0), fault::OVER_CURRENT, &mut events);
        assert_eq!(bank.channel(id(0)).state, OutputState::OverCurrent);

        run(&mut bank, 100, 12_000, false);
        assert_eq!(bank.channel(id(0)).state, OutputState::OverCurrent);
        assert_eq!(bank.channel(id(0)).current_ma, 0.0);
        assert_eq!(bank.channel(id(0)).fault_flags, fault::OVER_CURRENT);

        bank.clear_fault(id(0), &mut events);
        assert_eq!(bank.channel(id(0)).state, OutputState::Off);
        assert_eq!(bank.channel(id(0)).fault_flags, 0);
    }

    #[test]
    fn short_circuit_priority_over_other_bits() {
        let mut bank = OutputBank::new();
        let mut events = EventQueue::new();
        bank.inject_fault(
            id(1),
            fault::OVER_CURRENT | fault::SHORT_CIRCUIT,
            &mut events,
        );
        assert_eq!(bank.channel(id(1)).state, OutputState::ShortCircuit);
    }

    #[test]
    fn auto_over_current_trips() {
        let mut bank = OutputBank::new();
        let mut events = EventQueue::new();
        bank.set_load(id(0), 0.4).unwrap();
        bank.set_duty(id(0), 1000, &mut events).unwrap();
        // 12 V / 0.4 ohm = 30 A, above the 25 A default limit.
        run(&mut bank, 2, 12_000, true);
        assert_eq!(bank.channel(id(0)).state, OutputState::OverCurrent);
    }

    #[test]
    fn auto_faults_gated_by_flag() {
        let mut bank = OutputBank::new();
        let mut events = EventQueue::new();
        bank.set_load(id(0), 0.4).unwrap();
        bank.set_duty(id(0), 1000, &mut events).unwrap();
        run(&mut bank, 10, 12_000, false);
        assert_eq!(bank.channel(id(0)).state, OutputState::On);
    }

    #[test]
    fn open_load_requires_commanded_on() {
        let mut bank = OutputBank::new();
        let mut events = EventQueue::new();
        bank.set_load(id(0), 80_000.0).unwrap();
        run(&mut bank, 5, 12_000, true);
        assert_eq!(bank.channel(id(0)).state, OutputState::Off);
        bank.set_duty(id(0), 1000, &mut events).unwrap();
        run(&mut bank, 2, 12_000, true);
        assert_eq!(bank.channel(id(0)).state, OutputState::OpenLoad);
    }

    #[test]
    fn temperature_floors_at_ambient() {
        let mut bank = OutputBank::new();
        run(&mut bank, 1000, 12_000, false);
        assert!((bank.channel(id(0)).temperature_c - 25.0).abs() < 1e-3);
    }

    #[test]
    fn disabled_channel_ignores_duty() {
        let mut bank = OutputBank::new();
        let mut events = EventQueue::new();
        bank.set_enabled(id(0), false, &mut events);
        bank.set_duty(id(0), 1000, &mut events).unwrap();
        run(&mut bank, 5, 12_000, false);
        assert_eq!(bank.channel(id(0)).state, OutputState::Disabled);
        assert_eq!(bank.channel(id(0)).current_ma, 0.0);
    }

    #[test]
    fn set_load_rejects_bad_values() {
        let mut bank = OutputBank::new();
        assert!(bank.set_load(id(0), 0.0).is_err());
        assert!(bank.set_load(id(0), -5.0).is_err());
        assert!(bank.set_load(id(0), f32::NAN).is_err());
        assert!(bank.set_load(id(0), 4.7).is_ok());
    }
}
