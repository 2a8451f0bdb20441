//! Scenario state: the structured field set external persistence layers
//! round-trip with the emulator.
//!
//! The emulator is fully reconstructible from a [`Scenario`]
//! (`PmuEmulator::apply_scenario`) and serializable back into one
//! (`PmuEmulator::capture_scenario`). File formats and storage live with
//! the external collaborators; this crate only defines the data.

use crate::channel::{INPUT_COUNT, MOTOR_COUNT, OUTPUT_COUNT};
use crate::motors::MotorPreset;
use crate::protection::{DEFAULT_BATTERY_MV, DEFAULT_TEMP_C};
use arrayvec::ArrayString;
use heapless::Vec;
use serde::{Deserialize, Serialize};

pub const MAX_SCENARIO_CAN_MESSAGES: usize = 64;
pub const MAX_SCENARIO_NAME: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutput {
    pub duty: u16,
    pub load_ohm: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMotor {
    pub preset: Option<MotorPreset>,
    pub target: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioCanMessage {
    pub bus: u8,
    pub id: u32,
    pub data: Vec<u8, { crate::canbus::CAN_MAX_DATA }>,
    pub extended: bool,
    pub interval_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: ArrayString<MAX_SCENARIO_NAME>,
    pub adc_raw: [u16; INPUT_COUNT],
    /// Raw digital states, bit N = input N.
    pub digital_states: u32,
    pub battery_mv: u16,
    pub board_temp_c: [f32; 2],
    pub mcu_temp_c: f32,
    pub outputs: [ScenarioOutput; OUTPUT_COUNT],
    pub motors: [ScenarioMotor; MOTOR_COUNT],
    pub can_messages: Vec<ScenarioCanMessage, MAX_SCENARIO_CAN_MESSAGES>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            name: ArrayString::new(),
            adc_raw: [0; INPUT_COUNT],
            digital_states: 0,
            battery_mv: DEFAULT_BATTERY_MV,
            board_temp_c: [DEFAULT_TEMP_C; 2],
            mcu_temp_c: DEFAULT_TEMP_C,
            outputs: [ScenarioOutput {
                duty: 0,
                load_ohm: crate::outputs::DEFAULT_LOAD_OHM,
            }; OUTPUT_COUNT],
            motors: [ScenarioMotor {
                preset: None,
                target: None,
            }; MOTOR_COUNT],
            can_messages: Vec::new(),
        }
    }
}
