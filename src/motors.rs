//! Motor-bridge simulation: 4 brushed-DC H-bridge channels.
//!
//! Each channel integrates a full armature electrical model
//! (`L di/dt = V - R i - Ke w`), a friction model with an explicit
//! static/dynamic branch (stiction holds the shaft until the driving
//! torque exceeds the breakaway threshold), spring-type end-stops, stall
//! detection and a first-order thermal model. On top of the open-loop
//! FWD/REV/BRAKE/COAST modes sits a closed-loop positioner that drives
//! duty and direction until a commanded target is reached.

use crate::channel::{MotorId, MOTOR_COUNT};
use crate::error::SimError;
use crate::events::{EventQueue, FaultSource, SimEvent};
use serde::{Deserialize, Serialize};

pub const POSITION_MAX: u16 = 1000;

/// Fault bits in [`MotorChannel::fault_flags`].
pub mod fault {
    pub const OVER_CURRENT: u8 = 1 << 0;
    pub const OVER_TEMP: u8 = 1 << 1;
    pub const STALL: u8 = 1 << 2;
    pub const DRIVER: u8 = 1 << 3;
}

// Closed-loop positioner tuning. The interface deliberately carries no
// gain fields, so these are fixed for all channels.
const POSITION_KP: u16 = 5;
const POSITION_DEADBAND: u16 = 4;
const PARK_MIN_DUTY: u16 = 150;

const STALL_OMEGA_EPS: f32 = 0.05;
const STALL_TIME_MS: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotorMode {
    Coast,
    Forward,
    Reverse,
    Brake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotorLifecycle {
    Idle,
    Running,
    Parking,
    Parked,
    Fault,
}

/// Canonical automotive actuator parameter sets, so scenario authors do
/// not have to hand-tune fourteen physical constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotorPreset {
    Wiper,
    Valve,
    Window,
    Seat,
}

/// Physical constants of one motor channel.
///
/// Angles are motor-shaft referred; the load inertia is divided by the
/// squared gear ratio when it enters the acceleration equation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorParams {
    /// Torque constant Kt (Nm/A).
    pub torque_constant: f32,
    /// Back-EMF constant Ke (V/(rad/s)).
    pub back_emf_constant: f32,
    /// Armature resistance (ohm).
    pub resistance: f32,
    /// Armature inductance (H).
    pub inductance: f32,
    /// Rotor inertia (kg m^2).
    pub rotor_inertia: f32,
    /// Load inertia at the output shaft (kg m^2).
    pub load_inertia: f32,
    pub gear_ratio: f32,
    /// Viscous friction (Nm/(rad/s)).
    pub viscous_friction: f32,
    /// Coulomb friction (Nm), opposes motion above the stiction band.
    pub coulomb_friction: f32,
    /// Breakaway torque (Nm).
    pub stiction_torque: f32,
    /// Velocity below which the stiction branch applies (rad/s).
    pub stiction_velocity: f32,
    pub pos_min_rad: f32,
    pub pos_max_rad: f32,
    /// End-stop spring stiffness (Nm/rad of penetration).
    pub end_stop_stiffness: f32,
    /// Junction-to-ambient thermal resistance (K/W).
    pub thermal_resistance: f32,
    /// Thermal capacitance (J/K).
    pub thermal_capacitance: f32,
}

impl MotorParams {
    pub fn preset(preset: MotorPreset) -> Self {
        match preset {
            // Worm-geared windscreen wiper motor.
            MotorPreset::Wiper => Self {
                torque_constant: 0.042,
                back_emf_constant: 0.042,
                resistance: 0.6,
                inductance: 0.0005,
                rotor_inertia: 2.0e-5,
                load_inertia: 0.012,
                gear_ratio: 60.0,
                viscous_friction: 1.2e-4,
                coulomb_friction: 0.02,
                stiction_torque: 0.05,
                stiction_velocity: 0.5,
                pos_min_rad: 0.0,
                pos_max_rad: 130.0,
                end_stop_stiffness: 40.0,
                thermal_resistance: 8.0,
                thermal_capacitance: 60.0,
            },
            // Coolant/HVAC valve actuator: small, heavily geared, slow.
            MotorPreset::Valve => Self {
                torque_constant: 0.012,
                back_emf_constant: 0.012,
                resistance: 4.5,
                inductance: 0.003,
                rotor_inertia: 1.5e-6,
                load_inertia: 0.002,
                gear_ratio: 300.0,
                viscous_friction: 4.0e-5,
                coulomb_friction: 0.004,
                stiction_torque: 0.012,
                stiction_velocity: 0.8,
                pos_min_rad: 0.0,
                pos_max_rad: 900.0,
                end_stop_stiffness: 5.0,
                thermal_resistance: 20.0,
                thermal_capacitance: 12.0,
            },
            // Window lift: cable drum behind an 80:1 worm stage.
            MotorPreset::Window => Self {
                torque_constant: 0.035,
                back_emf_constant: 0.035,
                resistance: 0.9,
                inductance: 0.0008,
                rotor_inertia: 1.2e-5,
                load_inertia: 0.05,
                gear_ratio: 80.0,
                viscous_friction: 2.0e-4,
                coulomb_friction: 0.03,
                stiction_torque: 0.08,
                stiction_velocity: 0.4,
                pos_min_rad: 0.0,
                pos_max_rad: 220.0,
                end_stop_stiffness: 60.0,
                thermal_resistance: 10.0,
                thermal_capacitance: 45.0,
            },
            // Seat adjuster: high torque, long travel, very slow.
            MotorPreset::Seat => Self {
                torque_constant: 0.05,
                back_emf_constant: 0.05,
                resistance: 0.7,
                inductance: 0.0012,
                rotor_inertia: 3.0e-5,
                load_inertia: 0.2,
                gear_ratio: 150.0,
                viscous_friction: 3.0e-4,
                coulomb_friction: 0.05,
                stiction_torque: 0.12,
                stiction_velocity: 0.3,
                pos_min_rad: 0.0,
                pos_max_rad: 450.0,
                end_stop_stiffness: 80.0,
                thermal_resistance: 6.0,
                thermal_capacitance: 90.0,
            },
        }
    }

    /// Effective inertia at the motor shaft.
    fn effective_inertia(&self) -> f32 {
        let gear = self.gear_ratio.max(1e-3);
        (self.rotor_inertia + self.load_inertia / (gear * gear)).max(1e-9)
    }
}

impl Default for MotorParams {
    fn default() -> Self {
        Self::preset(MotorPreset::Wiper)
    }
}

/// Instantaneous physical state of one motor channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorState {
    pub current_a: f32,
    pub applied_v: f32,
    pub back_emf_v: f32,
    pub omega_rad_s: f32,
    pub theta_rad: f32,
    pub motor_torque_nm: f32,
    pub friction_torque_nm: f32,
    pub load_torque_nm: f32,
    pub accel_rad_s2: f32,
    pub temperature_c: f32,
    pub dissipated_w: f32,
    /// 0 = free travel, 1 = at minimum stop, 2 = at maximum stop.
    pub end_stop: u8,
    pub stalled: bool,
    pub stall_ms: u32,
}

impl MotorState {
    fn new() -> Self {
        Self {
            current_a: 0.0,
            applied_v: 0.0,
            back_emf_v: 0.0,
            omega_rad_s: 0.0,
            theta_rad: 0.0,
            motor_torque_nm: 0.0,
            friction_torque_nm: 0.0,
            load_torque_nm: 0.0,
            accel_rad_s2: 0.0,
            temperature_c: 25.0,
            dissipated_w: 0.0,
            end_stop: 0,
            stalled: false,
            stall_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorChannel {
    pub mode: MotorMode,
    pub lifecycle: MotorLifecycle,
    /// Commanded duty, 0-1000.
    pub duty: u16,
    /// Closed-loop target position, 0-1000. `None` in open-loop modes.
    pub target: Option<u16>,
    pub fault_flags: u8,
    /// Preset the parameters were loaded from; `None` after custom
    /// physics are installed.
    pub preset: Option<MotorPreset>,
    pub params: MotorParams,
    pub state: MotorState,
    /// External opposing load applied via the test API, independent of
    /// friction.
    pub external_load_nm: f32,
}

impl MotorChannel {
    fn new() -> Self {
        Self {
            mode: MotorMode::Coast,
            lifecycle: MotorLifecycle::Idle,
            duty: 0,
            target: None,
            fault_flags: 0,
            preset: Some(MotorPreset::Wiper),
            params: MotorParams::default(),
            state: MotorState::new(),
            external_load_nm: 0.0,
        }
    }

    /// Position feedback: theta rescaled onto 0-1000 across the travel.
    pub fn position(&self) -> u16 {
        let span = self.params.pos_max_rad - self.params.pos_min_rad;
        if span <= 0.0 {
            return 0;
        }
        let fraction = (self.state.theta_rad - self.params.pos_min_rad) / span;
        (fraction.clamp(0.0, 1.0) * POSITION_MAX as f32).round() as u16
    }

    fn position_to_theta(&self, position: u16) -> f32 {
        let span = self.params.pos_max_rad - self.params.pos_min_rad;
        self.params.pos_min_rad + span * position.min(POSITION_MAX) as f32 / POSITION_MAX as f32
    }
}

#[derive(Debug, Serialize)]
pub struct MotorBank {
    pub channels: [MotorChannel; MOTOR_COUNT],
}

impl MotorBank {
    pub fn new() -> Self {
        Self {
            channels: core::array::from_fn(|_| MotorChannel::new()),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn set_lifecycle(
        channel: &mut MotorChannel,
        index: usize,
        lifecycle: MotorLifecycle,
        events: &mut EventQueue,
    ) {
        if channel.lifecycle != lifecycle {
            channel.lifecycle = lifecycle;
            events.push(SimEvent::MotorLifecycleChanged {
                channel: index as u8,
                lifecycle,
            });
        }
    }

    /// Closed-loop positioner: proportional duty toward the target with a
    /// deadband, braking into the stop and parking once the shaft settles.
    ///
    /// Two refinements keep it stable across the whole preset range:
    /// the duty floor is derived from the breakaway torque (a fixed floor
    /// cannot unstick a high-stiction, high-resistance actuator), and the
    /// bridge switches to dynamic braking as soon as the braking distance
    /// `w * tau` covers the remaining error, so low-inertia channels do
    /// not shoot across the deadband.
    fn run_position_loop(
        channel: &mut MotorChannel,
        index: usize,
        battery_mv: u16,
        events: &mut EventQueue,
    ) {
        let Some(target) = channel.target else {
            return;
        };
        let params = channel.params.clone();
        let span = params.pos_max_rad - params.pos_min_rad;
        if span <= 0.0 {
            return;
        }
        let target_rad =
            params.pos_min_rad + span * target.min(POSITION_MAX) as f32 / POSITION_MAX as f32;
        let error_rad = target_rad - channel.state.theta_rad;
        let deadband_rad = span * POSITION_DEADBAND as f32 / POSITION_MAX as f32;
        let omega = channel.state.omega_rad_s;

        if error_rad.abs() <= deadband_rad {
            channel.mode = MotorMode::Brake;
            channel.duty = 0;
            if channel.lifecycle == MotorLifecycle::Running {
                Self::set_lifecycle(channel, index, MotorLifecycle::Parking, events);
            }
            if channel.lifecycle == MotorLifecycle::Parking
                && omega.abs() < params.stiction_velocity
            {
                channel.mode = MotorMode::Coast;
                Self::set_lifecycle(channel, index, MotorLifecycle::Parked, events);
            }
            return;
        }

        Self::set_lifecycle(channel, index, MotorLifecycle::Running, events);

        // Dynamic-braking stop distance is about w * tau with
        // tau = J R / (Kt Ke); brake early instead of overshooting.
        let kt_ke = (params.torque_constant * params.back_emf_constant).max(1e-9);
        let tau_brake = params.effective_inertia() * params.resistance.max(1e-3) / kt_ke;
        let closing_speed = omega * error_rad.signum();
        if closing_speed > 0.0 && closing_speed * tau_brake >= error_rad.abs() {
            channel.mode = MotorMode::Brake;
            channel.duty = 0;
            return;
        }

        let battery_v = (battery_mv as f32 / 1000.0).max(1.0);
        let breakaway_duty = (params.stiction_torque * params.resistance.max(1e-3)
            / (params.torque_constant.max(1e-6) * battery_v)
            * 1000.0
            * 1.3) as u16;
        let min_duty = breakaway_duty.clamp(PARK_MIN_DUTY, 1000);

        let error_counts = (error_rad.abs() / span * POSITION_MAX as f32) as u16;
        channel.duty = (error_counts.saturating_mul(POSITION_KP)).clamp(min_duty, 1000);
        channel.mode = if error_rad > 0.0 {
            MotorMode::Forward
        } else {
            MotorMode::Reverse
        };
    }

    fn integrate(channel: &mut MotorChannel, dt_s: f32, battery_mv: u16, ambient_c: f32) {
        let params = &channel.params;
        let state = &mut channel.state;
        let battery_v = battery_mv as f32 / 1000.0;

        // Bridge output. Coast opens the circuit; brake shorts the
        // terminals so the back-EMF drives a braking current.
        let duty_fraction = channel.duty.min(1000) as f32 / 1000.0;
        let (applied_v, circuit_closed) = match channel.mode {
            MotorMode::Forward => (battery_v * duty_fraction, true),
            MotorMode::Reverse => (-battery_v * duty_fraction, true),
            MotorMode::Brake => (0.0, true),
            MotorMode::Coast => (0.0, false),
        };
        state.applied_v = applied_v;
        state.back_emf_v = params.back_emf_constant * state.omega_rad_s;

        if circuit_closed {
            // Integrate the armature only when the electrical time constant
            // resolves at this step; otherwise the current has already
            // settled within one tick and the resistive form is exact.
            let resistance = params.resistance.max(1e-3);
            if params.inductance / resistance > dt_s {
                let di_dt = (applied_v - state.current_a * resistance - state.back_emf_v)
                    / params.inductance;
                state.current_a += di_dt * dt_s;
            } else {
                state.current_a = (applied_v - state.back_emf_v) / resistance;
            }
        } else {
            state.current_a = 0.0;
        }

        state.motor_torque_nm = params.torque_constant * state.current_a;

        // End-stops: opposing spring plus contact damping, never a hard
        // position clamp.
        let inertia = params.effective_inertia();
        let (spring_nm, end_stop) = if state.theta_rad > params.pos_max_rad {
            let penetration = state.theta_rad - params.pos_max_rad;
            let damping = 2.0 * (params.end_stop_stiffness * inertia).sqrt();
            (
                -params.end_stop_stiffness * penetration - damping * state.omega_rad_s,
                2u8,
            )
        } else if state.theta_rad < params.pos_min_rad {
            let penetration = params.pos_min_rad - state.theta_rad;
            let damping = 2.0 * (params.end_stop_stiffness * inertia).sqrt();
            (
                params.end_stop_stiffness * penetration - damping * state.omega_rad_s,
                1u8,
            )
        } else {
            (0.0, 0u8)
        };
        state.end_stop = end_stop;
        state.load_torque_nm = channel.external_load_nm;

        let drive_nm = state.motor_torque_nm + spring_nm;

        if state.omega_rad_s.abs() < params.stiction_velocity {
            // Static regime: the shaft is held until the driving torque
            // beats stiction plus the external load.
            let hold_nm = params.stiction_torque + channel.external_load_nm.abs();
            if drive_nm.abs() < hold_nm {
                state.friction_torque_nm = -drive_nm;
                state.accel_rad_s2 = 0.0;
                state.omega_rad_s = 0.0;
            } else {
                let kinetic =
                    (params.coulomb_friction + channel.external_load_nm.abs()) * drive_nm.signum();
                state.friction_torque_nm = kinetic;
                state.accel_rad_s2 = (drive_nm - kinetic) / inertia;
                state.omega_rad_s += state.accel_rad_s2 * dt_s;
            }
        } else {
            // Dynamic regime: viscous plus Coulomb plus the external load,
            // all opposing motion.
            let direction = state.omega_rad_s.signum();
            let friction = params.viscous_friction * state.omega_rad_s
                + (params.coulomb_friction + channel.external_load_nm.abs()) * direction;
            state.friction_torque_nm = friction;
            state.accel_rad_s2 = (drive_nm - friction) / inertia;
            state.omega_rad_s += state.accel_rad_s2 * dt_s;
        }

        state.theta_rad += state.omega_rad_s * dt_s;

        // Stall: the bridge is driving but the shaft is not moving.
        let driving = matches!(channel.mode, MotorMode::Forward | MotorMode::Reverse)
            && channel.duty > 0;
        if driving && state.omega_rad_s.abs() < STALL_OMEGA_EPS {
            state.stall_ms = state.stall_ms.saturating_add((dt_s * 1000.0) as u32);
            if state.stall_ms >= STALL_TIME_MS {
                state.stalled = true;
            }
        } else {
            state.stalled = false;
            state.stall_ms = 0;
        }

        // First-order thermal model of the winding.
        state.dissipated_w = state.current_a * state.current_a * params.resistance;
        let dtemp = (state.dissipated_w
            - (state.temperature_c - ambient_c) / params.thermal_resistance.max(1e-3))
            / params.thermal_capacitance.max(1e-3);
        state.temperature_c += dtemp * dt_s;
    }

    pub fn tick(
        &mut self,
        delta_ms: u64,
        battery_mv: u16,
        ambient_c: f32,
        events: &mut EventQueue,
    ) {
        let dt_s = delta_ms as f32 / 1000.0;

        for (index, channel) in self.channels.iter_mut().enumerate() {
            if channel.lifecycle == MotorLifecycle::Fault {
                channel.state.current_a = 0.0;
                channel.state.motor_torque_nm = 0.0;
                channel.state.applied_v = 0.0;
                continue;
            }

            Self::run_position_loop(channel, index, battery_mv, events);
            Self::integrate(channel, dt_s, battery_mv, ambient_c);
        }
    }

    /// Open-loop drive. Cancels any closed-loop target.
    pub fn set_mode(
        &mut self,
        id: MotorId,
        mode: MotorMode,
        duty: u16,
        events: &mut EventQueue,
    ) -> Result<(), SimError> {
        if duty > 1000 {
            return Err(SimError::InvalidDuty(duty));
        }
        let index = id.index();
        let channel = &mut self.channels[index];
        if channel.lifecycle == MotorLifecycle::Fault {
            return Ok(());
        }
        channel.target = None;
        channel.mode = mode;
        channel.duty = duty;
        let lifecycle = if duty > 0 && matches!(mode, MotorMode::Forward | MotorMode::Reverse) {
            MotorLifecycle::Running
        } else {
            MotorLifecycle::Idle
        };
        Self::set_lifecycle(channel, index, lifecycle, events);
        Ok(())
    }

    /// Hands the channel to the closed-loop positioner.
    pub fn set_target(
        &mut self,
        id: MotorId,
        position: u16,
        events: &mut EventQueue,
    ) -> Result<(), SimError> {
        if position > POSITION_MAX {
            return Err(SimError::InvalidPosition(position));
        }
        let index = id.index();
        let channel = &mut self.channels[index];
        if channel.lifecycle == MotorLifecycle::Fault {
            return Ok(());
        }
        channel.target = Some(position);
        Self::set_lifecycle(channel, index, MotorLifecycle::Running, events);
        Ok(())
    }

    /// Teleports the shaft, for scenario setup. Velocity is zeroed.
    pub fn set_position(&mut self, id: MotorId, position: u16) -> Result<(), SimError> {
        if position > POSITION_MAX {
            return Err(SimError::InvalidPosition(position));
        }
        let channel = &mut self.channels[id.index()];
        channel.state.theta_rad = channel.position_to_theta(position);
        channel.state.omega_rad_s = 0.0;
        channel.state.end_stop = 0;
        Ok(())
    }

    pub fn set_preset(&mut self, id: MotorId, preset: MotorPreset) {
        let channel = &mut self.channels[id.index()];
        channel.preset = Some(preset);
        channel.params = MotorParams::preset(preset);
        channel.state = MotorState::new();
    }

    /// Physics parameters are accepted as-is; plausibility is the
    /// caller's problem.
    pub fn set_physics(&mut self, id: MotorId, params: MotorParams) {
        let channel = &mut self.channels[id.index()];
        channel.preset = None;
        channel.params = params;
    }

    pub fn set_load_torque(&mut self, id: MotorId, torque_nm: f32) {
        self.channels[id.index()].external_load_nm = torque_nm.max(0.0);
    }

    pub fn inject_fault(&mut self, id: MotorId, flags: u8, events: &mut EventQueue) {
        let index = id.index();
        let channel = &mut self.channels[index];
        channel.fault_flags |= flags & 0x0F;
        channel.mode = MotorMode::Coast;
        channel.duty = 0;
        channel.target = None;
        channel.state.current_a = 0.0;
        events.push(SimEvent::FaultRaised {
            source: FaultSource::Motor(index as u8),
            flags: (flags & 0x0F) as u16,
        });
        Self::set_lifecycle(channel, index, MotorLifecycle::Fault, events);
    }

    pub fn clear_fault(&mut self, id: MotorId, events: &mut EventQueue) {
        let index = id.index();
        let channel = &mut self.channels[index];
        channel.fault_flags = 0;
        if channel.lifecycle == MotorLifecycle::Fault {
            Self::set_lifecycle(channel, index, MotorLifecycle::Idle, events);
        }
    }

    pub fn channel(&self, id: MotorId) -> &MotorChannel {
        &self.channels[id.index()]
    }

    pub fn state(&self, id: MotorId) -> &MotorState {
        &self.channels[id.index()].state
    }

    pub fn total_current_ma(&self) -> f32 {
        self.channels
            .iter()
            .map(|c| c.state.current_a.abs() * 1000.0)
            .sum()
    }

    pub fn any_fault(&self) -> bool {
        self.channels
            .iter()
            .any(|c| c.lifecycle == MotorLifecycle::Fault)
    }
}

impl Default for MotorBank {
    fn default() -> Self {
        Self::new()
    }
}
