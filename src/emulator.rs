//! The emulator aggregate: the single unit of shared mutable state.
//!
//! [`PmuEmulator`] owns every bank plus the simulation clock. External
//! collaborators (protocol servers, dashboards, consoles, the firmware's
//! decision logic) mutate it only through the narrow setter/injector API;
//! `tick` is the sole place simulated state advances.
//!
//! # Concurrency contract
//!
//! Exactly one thread is the tick owner. Any number of other threads may
//! call the setter API concurrently with `tick` *provided the whole
//! aggregate sits behind one exclusive lock* — many derived quantities
//! (current from duty, load and battery voltage) read several fields that
//! must be consistent within a tick boundary, so per-field locking is not
//! sound. The bundled simulator binary wraps the emulator in
//! `Arc<Mutex<_>>`; `tick` itself is bounded, allocation-free and does no
//! I/O, so it sustains kilohertz cadences under that lock.

use crate::canbus::{CanBank, CanController, CanErrorSeverity, CanErrorState, CanFrame};
use crate::channel::{BusId, InputId, MotorId, OutputId, INPUT_COUNT, MOTOR_COUNT, OUTPUT_COUNT};
use crate::clock::SimClock;
use crate::error::SimError;
use crate::events::{EventQueue, SimEvent, MAX_EVENTS};
use crate::hal::PmuHardware;
use crate::inputs::{InputBank, PullConfig};
use crate::motors::{
    MotorBank, MotorChannel, MotorLifecycle, MotorMode, MotorParams, MotorPreset, MotorState,
};
use crate::outputs::{OutputBank, OutputState, PowerOutput};
use crate::protection::{ProtectionBlock, ProtectionState, TempSensor};
use crate::scenario::{Scenario, ScenarioCanMessage};
use serde::Serialize;

pub struct PmuEmulator {
    clock: SimClock,
    inputs: InputBank,
    outputs: OutputBank,
    motors: MotorBank,
    can: CanBank,
    protection: ProtectionBlock,
    events: EventQueue,
    tick_count: u64,
}

impl PmuEmulator {
    /// Construction is infallible: all state is fixed-size and owned.
    pub fn new() -> Self {
        Self {
            clock: SimClock::new(),
            inputs: InputBank::new(),
            outputs: OutputBank::new(),
            motors: MotorBank::new(),
            can: CanBank::new(),
            protection: ProtectionBlock::new(),
            events: EventQueue::new(),
            tick_count: 0,
        }
    }

    /// Advances simulated time. Components update in a fixed order:
    /// inputs, power outputs, motor bridges, CAN, protection. Returns the
    /// simulated milliseconds actually applied (0 while paused).
    pub fn tick(&mut self, delta_ms: u32) -> u64 {
        self.tick_count = self.tick_count.wrapping_add(1);

        let step = self.clock.advance(delta_ms);
        if step == 0 {
            return 0;
        }
        let now = self.clock.now_ms();
        let battery_mv = self.protection.battery_mv();
        let ambient_c = self.protection.ambient_c();
        let auto_faults = self.protection.auto_faults();

        self.inputs.tick(now);
        self.outputs
            .tick(step, battery_mv, ambient_c, auto_faults, &mut self.events);
        self.motors
            .tick(step, battery_mv, ambient_c, &mut self.events);
        self.can.tick(now, &mut self.events);
        self.protection
            .refresh(&self.outputs, &self.motors, &self.can);

        step
    }

    /// Restores every component to its documented defaults and zeroes
    /// elapsed time.
    pub fn reset(&mut self) {
        self.clock.reset();
        self.inputs.reset();
        self.outputs.reset();
        self.motors.reset();
        self.can.reset();
        self.protection.reset();
        self.events.reset();
        self.tick_count = 0;
    }

    // -- clock --

    pub fn set_paused(&mut self, paused: bool) {
        self.clock.set_paused(paused);
    }

    pub fn set_time_scale(&mut self, scale: f32) -> Result<(), SimError> {
        self.clock.set_time_scale(scale)
    }

    pub const fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    // -- inputs --

    pub fn set_input_raw(&mut self, channel: InputId, raw: u16) {
        self.inputs.set_raw(channel, raw);
    }

    pub fn set_input_voltage(&mut self, channel: InputId, volts: f32) {
        self.inputs.set_voltage(channel, volts);
    }

    pub fn set_input_frequency(&mut self, channel: InputId, hz: f32) {
        self.inputs.set_frequency(channel, hz);
    }

    pub fn set_input_noise(&mut self, channel: InputId, enabled: bool, amplitude: u16) {
        self.inputs.set_noise(channel, enabled, amplitude);
    }

    pub fn set_all_inputs(&mut self, raw: &[u16; INPUT_COUNT]) {
        self.inputs.set_all_raw(raw);
    }

    pub fn set_digital_state(&mut self, channel: InputId, state: bool) {
        self.inputs.set_state(channel, state);
    }

    pub fn configure_digital(
        &mut self,
        channel: InputId,
        inverted: bool,
        pull: PullConfig,
        debounce_ms: u32,
    ) {
        self.inputs.configure(channel, inverted, pull, debounce_ms);
    }

    pub fn toggle_digital(&mut self, channel: InputId) {
        self.inputs.toggle(channel);
    }

    pub fn pulse_digital(&mut self, channel: InputId, duration_ms: u32) {
        let now = self.clock.now_ms();
        self.inputs.pulse(channel, now, duration_ms);
    }

    pub fn set_digital_all(&mut self, mask: u32) {
        self.inputs.set_all_states(mask);
    }

    pub fn digital_all(&self) -> u32 {
        self.inputs.all_states()
    }

    /// Read-and-clear.
    pub fn rising_edge(&mut self, channel: InputId) -> bool {
        self.inputs.rising_edge(channel)
    }

    /// Read-and-clear.
    pub fn falling_edge(&mut self, channel: InputId) -> bool {
        self.inputs.falling_edge(channel)
    }

    pub const fn inputs(&self) -> &InputBank {
        &self.inputs
    }

    // -- power outputs --

    pub fn set_output_duty(&mut self, channel: OutputId, duty: u16) -> Result<(), SimError> {
        self.outputs.set_duty(channel, duty, &mut self.events)
    }

    pub fn set_output_load(&mut self, channel: OutputId, ohms: f32) -> Result<(), SimError> {
        self.outputs.set_load(channel, ohms)
    }

    pub fn inject_output_fault(&mut self, channel: OutputId, flags: u8) {
        self.outputs.inject_fault(channel, flags, &mut self.events);
    }

    pub fn clear_output_fault(&mut self, channel: OutputId) {
        self.outputs.clear_fault(channel, &mut self.events);
    }

    pub fn set_output_enabled(&mut self, channel: OutputId, enabled: bool) {
        self.outputs.set_enabled(channel, enabled, &mut self.events);
    }

    pub fn configure_output_soft_start(&mut self, channel: OutputId, soft_start_ms: u32) {
        self.outputs.configure_soft_start(channel, soft_start_ms);
    }

    pub fn configure_output_inrush(
        &mut self,
        channel: OutputId,
        multiplier: f32,
        duration_ms: u32,
    ) {
        self.outputs.configure_inrush(channel, multiplier, duration_ms);
    }

    pub fn configure_output_limits(
        &mut self,
        channel: OutputId,
        current_limit_ma: f32,
        temp_limit_c: f32,
    ) {
        self.outputs
            .configure_limits(channel, current_limit_ma, temp_limit_c);
    }

    pub fn output(&self, channel: OutputId) -> &PowerOutput {
        self.outputs.channel(channel)
    }

    pub const fn outputs(&self) -> &OutputBank {
        &self.outputs
    }

    // -- motor bridges --

    pub fn set_motor_mode(
        &mut self,
        channel: MotorId,
        mode: MotorMode,
        duty: u16,
    ) -> Result<(), SimError> {
        self.motors.set_mode(channel, mode, duty, &mut self.events)
    }

    pub fn set_motor_target(&mut self, channel: MotorId, position: u16) -> Result<(), SimError> {
        self.motors.set_target(channel, position, &mut self.events)
    }

    pub fn set_motor_position(&mut self, channel: MotorId, position: u16) -> Result<(), SimError> {
        self.motors.set_position(channel, position)
    }

    pub fn set_motor_preset(&mut self, channel: MotorId, preset: MotorPreset) {
        self.motors.set_preset(channel, preset);
    }

    pub fn set_motor_physics(&mut self, channel: MotorId, params: MotorParams) {
        self.motors.set_physics(channel, params);
    }

    pub fn set_motor_load_torque(&mut self, channel: MotorId, torque_nm: f32) {
        self.motors.set_load_torque(channel, torque_nm);
    }

    pub fn inject_motor_fault(&mut self, channel: MotorId, flags: u8) {
        self.motors.inject_fault(channel, flags, &mut self.events);
    }

    pub fn clear_motor_fault(&mut self, channel: MotorId) {
        self.motors.clear_fault(channel, &mut self.events);
    }

    pub fn motor(&self, channel: MotorId) -> &MotorChannel {
        self.motors.channel(channel)
    }

    pub fn motor_state(&self, channel: MotorId) -> &MotorState {
        self.motors.state(channel)
    }

    pub const fn motors(&self) -> &MotorBank {
        &self.motors
    }

    // -- CAN --

    pub fn inject_can_message(
        &mut self,
        bus: BusId,
        id: u32,
        data: &[u8],
        extended: bool,
    ) -> Result<(), SimError> {
        self.can.inject_message(bus, id, data, extended)
    }

    pub fn inject_can_fd(
        &mut self,
        bus: BusId,
        id: u32,
        data: &[u8],
        extended: bool,
    ) -> Result<(), SimError> {
        self.can.inject_fd(bus, id, data, extended)
    }

    pub fn add_periodic_can_message(
        &mut self,
        bus: BusId,
        id: u32,
        data: &[u8],
        extended: bool,
        interval_ms: u32,
    ) -> Result<usize, SimError> {
        let now = self.clock.now_ms();
        self.can
            .add_periodic_message(bus, id, data, extended, interval_ms, now)
    }

    pub fn remove_periodic_can_message(&mut self, bus: BusId, index: usize) -> Result<(), SimError> {
        let now = self.clock.now_ms();
        self.can.remove_periodic_message(bus, index, now)
    }

    pub fn set_can_bus_online(&mut self, bus: BusId, online: bool) {
        let now = self.clock.now_ms();
        self.can.set_bus_online(bus, online, now);
    }

    pub fn simulate_can_error(&mut self, bus: BusId, severity: CanErrorSeverity) {
        self.can.simulate_error(bus, severity);
    }

    pub fn clear_can_error(&mut self, bus: BusId) {
        self.can.clear_error(bus);
    }

    pub fn can_controller(&self, bus: BusId) -> &CanController {
        self.can.controller(bus)
    }

    // -- protection --

    pub fn set_battery_voltage(&mut self, battery_mv: u16) {
        self.protection.set_voltage(battery_mv);
    }

    pub fn set_temperature(&mut self, sensor: TempSensor, celsius: f32) {
        self.protection.set_temperature(sensor, celsius);
    }

    pub fn inject_protection_fault(&mut self, flags: u16) {
        self.protection.inject_fault(flags);
    }

    pub fn clear_protection_faults(&mut self) {
        self.protection.clear_faults();
    }

    pub fn set_auto_faults(&mut self, enabled: bool) {
        self.protection.set_auto_faults(enabled);
    }

    pub const fn protection(&self) -> &ProtectionState {
        self.protection.state()
    }

    // -- events --

    /// Read-and-clear: all events raised since the last drain.
    pub fn drain_events(&mut self) -> heapless::Vec<SimEvent, MAX_EVENTS> {
        self.events.drain()
    }

    pub const fn events_dropped(&self) -> u32 {
        self.events.dropped()
    }

    // -- scenario round-trip --

    /// Rebuilds the emulator from a scenario: reset, then replay the
    /// scenario's field set through the regular setter API.
    pub fn apply_scenario(&mut self, scenario: &Scenario) -> Result<(), SimError> {
        self.reset();

        self.set_all_inputs(&scenario.adc_raw);
        self.set_digital_all(scenario.digital_states);
        self.set_battery_voltage(scenario.battery_mv);
        self.set_temperature(TempSensor::Board0, scenario.board_temp_c[0]);
        self.set_temperature(TempSensor::Board1, scenario.board_temp_c[1]);
        self.set_temperature(TempSensor::Mcu, scenario.mcu_temp_c);

        for (index, output) in scenario.outputs.iter().enumerate() {
            let id = OutputId::new(index)?;
            self.set_output_load(id, output.load_ohm)?;
            self.set_output_duty(id, output.duty)?;
        }

        for (index, motor) in scenario.motors.iter().enumerate() {
            let id = MotorId::new(index)?;
            if let Some(preset) = motor.preset {
                self.set_motor_preset(id, preset);
            }
            if let Some(target) = motor.target {
                self.set_motor_target(id, target)?;
            }
        }

        for message in scenario.can_messages.iter() {
            let bus = BusId::new(message.bus as usize)?;
            self.add_periodic_can_message(
                bus,
                message.id,
                &message.data,
                message.extended,
                message.interval_ms,
            )?;
        }

        Ok(())
    }

    /// Captures the scenario-visible field set of the current state.
    pub fn capture_scenario(&self) -> Scenario {
        let mut scenario = Scenario::default();

        for (index, channel) in self.inputs.analog.iter().enumerate() {
            scenario.adc_raw[index] = channel.raw;
        }
        for (index, input) in self.inputs.digital.iter().enumerate() {
            if input.state {
                scenario.digital_states |= 1 << index;
            }
        }
        scenario.battery_mv = self.protection.state().battery_mv;
        scenario.board_temp_c = self.protection.state().board_temp_c;
        scenario.mcu_temp_c = self.protection.state().mcu_temp_c;

        for (index, channel) in self.outputs.channels.iter().enumerate() {
            scenario.outputs[index].duty = channel.duty;
            scenario.outputs[index].load_ohm = channel.load_ohm;
        }

        for (index, channel) in self.motors.channels.iter().enumerate() {
            scenario.motors[index].preset = channel.preset;
            scenario.motors[index].target = channel.target;
        }

        for bus in BusId::all() {
            for slot in self.can.controller(bus).periodic_slots() {
                if !slot.active {
                    continue;
                }
                let message = ScenarioCanMessage {
                    bus: bus.index() as u8,
                    id: slot.frame.id,
                    data: slot.frame.data.clone(),
                    extended: slot.frame.extended,
                    interval_ms: slot.interval_ms,
                };
                if scenario.can_messages.push(message).is_err() {
                    break;
                }
            }
        }

        scenario
    }

    /// Snapshot for telemetry streaming.
    pub fn snapshot(&self) -> EmulatorSnapshot {
        EmulatorSnapshot {
            now_ms: self.clock.now_ms(),
            uptime_s: self.clock.uptime_s(),
            paused: self.clock.is_paused(),
            time_scale: self.clock.time_scale(),
            tick_count: self.tick_count,
            protection: self.protection.state().clone(),
            inputs: core::array::from_fn(|index| {
                let analog = &self.inputs.analog[index];
                let digital = &self.inputs.digital[index];
                InputView {
                    raw: analog.sampled_raw,
                    voltage: analog.sampled_voltage,
                    frequency_hz: analog.frequency_hz,
                    digital: digital.debounced_state,
                }
            }),
            outputs: core::array::from_fn(|index| {
                let channel = &self.outputs.channels[index];
                OutputView {
                    state: channel.state,
                    duty: channel.duty,
                    current_ma: channel.current_ma,
                    temperature_c: channel.temperature_c,
                    fault_flags: channel.fault_flags,
                    load_ohm: channel.load_ohm,
                }
            }),
            motors: core::array::from_fn(|index| {
                let channel = &self.motors.channels[index];
                MotorView {
                    mode: channel.mode,
                    lifecycle: channel.lifecycle,
                    duty: channel.duty,
                    position: channel.position(),
                    target: channel.target,
                    current_a: channel.state.current_a,
                    omega_rad_s: channel.state.omega_rad_s,
                    temperature_c: channel.state.temperature_c,
                    stalled: channel.state.stalled,
                    end_stop: channel.state.end_stop,
                }
            }),
            can: core::array::from_fn(|index| {
                let controller = &self.can.buses[index];
                CanView {
                    online: controller.online,
                    error_state: controller.error_state,
                    tx_error_count: controller.tx_error_count,
                    tx_frames: controller.tx_frames,
                }
            }),
            events_dropped: self.events.dropped(),
        }
    }
}

impl Default for PmuEmulator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InputView {
    pub raw: u16,
    pub voltage: f32,
    pub frequency_hz: f32,
    pub digital: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputView {
    pub state: OutputState,
    pub duty: u16,
    pub current_ma: f32,
    pub temperature_c: f32,
    pub fault_flags: u8,
    pub load_ohm: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MotorView {
    pub mode: MotorMode,
    pub lifecycle: MotorLifecycle,
    pub duty: u16,
    pub position: u16,
    pub target: Option<u16>,
    pub current_a: f32,
    pub omega_rad_s: f32,
    pub temperature_c: f32,
    pub stalled: bool,
    pub end_stop: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanView {
    pub online: bool,
    pub error_state: CanErrorState,
    pub tx_error_count: u8,
    pub tx_frames: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmulatorSnapshot {
    pub now_ms: u64,
    pub uptime_s: u64,
    pub paused: bool,
    pub time_scale: f32,
    pub tick_count: u64,
    pub protection: ProtectionState,
    pub inputs: [InputView; INPUT_COUNT],
    pub outputs: [OutputView; OUTPUT_COUNT],
    pub motors: [MotorView; MOTOR_COUNT],
    pub can: [CanView; crate::channel::CAN_BUS_COUNT],
    pub events_dropped: u32,
}

impl PmuHardware for PmuEmulator {
    fn adc_raw(&self, channel: InputId) -> u16 {
        self.inputs.raw(channel)
    }

    fn adc_voltage(&self, channel: InputId) -> f32 {
        self.inputs.voltage(channel)
    }

    fn digital_in(&self, channel: InputId) -> bool {
        self.inputs.digital_state(channel)
    }

    fn input_frequency(&self, channel: InputId) -> f32 {
        self.inputs.frequency(channel)
    }

    fn output_state(&self, channel: OutputId) -> OutputState {
        self.outputs.channel(channel).state
    }

    fn output_current_ma(&self, channel: OutputId) -> f32 {
        self.outputs.channel(channel).current_ma
    }

    fn output_temperature_c(&self, channel: OutputId) -> f32 {
        self.outputs.channel(channel).temperature_c
    }

    fn set_output_duty(&mut self, channel: OutputId, duty: u16) -> Result<(), SimError> {
        PmuEmulator::set_output_duty(self, channel, duty)
    }

    fn motor_state(&self, channel: MotorId) -> MotorState {
        self.motors.state(channel).clone()
    }

    fn motor_position(&self, channel: MotorId) -> u16 {
        self.motors.channel(channel).position()
    }

    fn set_motor(&mut self, channel: MotorId, mode: MotorMode, duty: u16) -> Result<(), SimError> {
        self.set_motor_mode(channel, mode, duty)
    }

    fn set_motor_target(&mut self, channel: MotorId, position: u16) -> Result<(), SimError> {
        PmuEmulator::set_motor_target(self, channel, position)
    }

    fn can_send(&mut self, bus: BusId, frame: &CanFrame) -> Result<(), SimError> {
        if frame.fd {
            self.inject_can_fd(bus, frame.id, &frame.data, frame.extended)
        } else {
            self.inject_can_message(bus, frame.id, &frame.data, frame.extended)
        }
    }

    fn battery_mv(&self) -> u16 {
        self.protection.battery_mv()
    }
}
