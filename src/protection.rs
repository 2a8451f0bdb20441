//! Protection aggregator: the shared read surface the firmware's
//! protection logic conditions on.
//!
//! Pure bookkeeping with no dynamics of its own. Battery voltage and
//! temperatures are clamped to their documented envelopes on write; the
//! derived fields (total current, status bits) are recomputed from the
//! other banks at the end of every tick.

use crate::canbus::CanBank;
use crate::motors::MotorBank;
use crate::outputs::OutputBank;
use serde::{Deserialize, Serialize};

pub const BATTERY_MIN_MV: u16 = 6_000;
pub const BATTERY_MAX_MV: u16 = 18_000;
pub const TEMP_MIN_C: f32 = -40.0;
pub const TEMP_MAX_C: f32 = 150.0;

pub const DEFAULT_BATTERY_MV: u16 = 12_000;
pub const DEFAULT_TEMP_C: f32 = 25.0;

const RAIL_5V_MV: u16 = 5_000;
const RAIL_3V3_MV: u16 = 3_300;
// LDO dropout: the 5 V rail sags once the battery gets close to it.
const RAIL_5V_DROPOUT_MV: u16 = 1_500;

const BATTERY_LOW_MV: u16 = 9_000;
const BATTERY_HIGH_MV: u16 = 15_500;
const BOARD_OVER_TEMP_C: f32 = 105.0;

/// Bits of [`ProtectionState::status_bits`].
pub mod status {
    pub const OUTPUTS_ACTIVE: u16 = 1 << 0;
    pub const OUTPUT_FAULT: u16 = 1 << 1;
    pub const MOTOR_FAULT: u16 = 1 << 2;
    pub const CAN_ERROR: u16 = 1 << 3;
    pub const BATTERY_LOW: u16 = 1 << 4;
    pub const BATTERY_HIGH: u16 = 1 << 5;
    pub const OVER_TEMP: u16 = 1 << 6;
}

/// Temperature sensor addressed by `set_temperature`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TempSensor {
    Board0,
    Board1,
    Mcu,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionState {
    pub battery_mv: u16,
    pub board_temp_c: [f32; 2],
    pub mcu_temp_c: f32,
    pub total_current_ma: f32,
    pub fault_flags: u16,
    pub auto_faults: bool,
    pub rail_5v_mv: u16,
    pub rail_3v3_mv: u16,
    pub status_bits: u16,
}

impl ProtectionState {
    fn new() -> Self {
        Self {
            battery_mv: DEFAULT_BATTERY_MV,
            board_temp_c: [DEFAULT_TEMP_C; 2],
            mcu_temp_c: DEFAULT_TEMP_C,
            total_current_ma: 0.0,
            fault_flags: 0,
            auto_faults: false,
            rail_5v_mv: RAIL_5V_MV,
            rail_3v3_mv: RAIL_3V3_MV,
            status_bits: 0,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProtectionBlock {
    pub state: ProtectionState,
}

impl ProtectionBlock {
    pub fn new() -> Self {
        Self {
            state: ProtectionState::new(),
        }
    }

    pub fn reset(&mut self) {
        self.state = ProtectionState::new();
    }

    /// Clamped to 6-18 V; the emulated supply cannot leave that envelope.
    pub fn set_voltage(&mut self, battery_mv: u16) {
        self.state.battery_mv = battery_mv.clamp(BATTERY_MIN_MV, BATTERY_MAX_MV);
    }

    pub fn set_temperature(&mut self, sensor: TempSensor, celsius: f32) {
        let clamped = celsius.clamp(TEMP_MIN_C, TEMP_MAX_C);
        match sensor {
            TempSensor::Board0 => self.state.board_temp_c[0] = clamped,
            TempSensor::Board1 => self.state.board_temp_c[1] = clamped,
            TempSensor::Mcu => self.state.mcu_temp_c = clamped,
        }
    }

    pub fn inject_fault(&mut self, flags: u16) {
        self.state.fault_flags |= flags;
    }

    pub fn clear_faults(&mut self) {
        self.state.fault_flags = 0;
    }

    /// Gates the threshold-triggered fault transitions in the output
    /// simulation.
    pub fn set_auto_faults(&mut self, enabled: bool) {
        self.state.auto_faults = enabled;
    }

    pub const fn auto_faults(&self) -> bool {
        self.state.auto_faults
    }

    pub const fn battery_mv(&self) -> u16 {
        self.state.battery_mv
    }

    /// Ambient reference the thermal models decay toward.
    pub const fn ambient_c(&self) -> f32 {
        self.state.board_temp_c[0]
    }

    pub const fn state(&self) -> &ProtectionState {
        &self.state
    }

    /// Recomputes the derived read surface. Runs last in the tick order.
    pub fn refresh(&mut self, outputs: &OutputBank, motors: &MotorBank, can: &CanBank) {
        let state = &mut self.state;
        state.total_current_ma = outputs.total_current_ma() + motors.total_current_ma();

        state.rail_5v_mv = RAIL_5V_MV.min(state.battery_mv.saturating_sub(RAIL_5V_DROPOUT_MV));
        state.rail_3v3_mv = RAIL_3V3_MV;

        let mut bits = 0u16;
        if outputs.any_active() {
            bits |= status::OUTPUTS_ACTIVE;
        }
        if outputs.any_fault() {
            bits |= status::OUTPUT_FAULT;
        }
        if motors.any_fault() {
            bits |= status::MOTOR_FAULT;
        }
        if can.any_error() {
            bits |= status::CAN_ERROR;
        }
        if state.battery_mv < BATTERY_LOW_MV {
            bits |= status::BATTERY_LOW;
        }
        if state.battery_mv > BATTERY_HIGH_MV {
            bits |= status::BATTERY_HIGH;
        }
        if state.board_temp_c[0].max(state.board_temp_c[1]) > BOARD_OVER_TEMP_C
            || state.mcu_temp_c > BOARD_OVER_TEMP_C
        {
            bits |= status::OVER_TEMP;
        }
        state.status_bits = bits;
    }
}

impl Default for ProtectionBlock {
    fn default() -> Self {
        Self::new()
    }
}
