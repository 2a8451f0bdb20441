//! Hardware-access capability boundary.
//!
//! The firmware's decision logic (channel graph, protection policy, CAN
//! mapping) is written against this trait and receives an implementation
//! at construction: [`crate::PmuEmulator`] when running against simulated
//! hardware, a real register-level backend on the bench.

use crate::canbus::CanFrame;
use crate::channel::{BusId, InputId, MotorId, OutputId};
use crate::error::SimError;
use crate::motors::{MotorMode, MotorState};
use crate::outputs::OutputState;

pub trait PmuHardware {
    // Inputs.
    fn adc_raw(&self, channel: InputId) -> u16;
    fn adc_voltage(&self, channel: InputId) -> f32;
    fn digital_in(&self, channel: InputId) -> bool;
    fn input_frequency(&self, channel: InputId) -> f32;

    // Power outputs.
    fn output_state(&self, channel: OutputId) -> OutputState;
    fn output_current_ma(&self, channel: OutputId) -> f32;
    fn output_temperature_c(&self, channel: OutputId) -> f32;
    fn set_output_duty(&mut self, channel: OutputId, duty: u16) -> Result<(), SimError>;

    // Motor bridges.
    fn motor_state(&self, channel: MotorId) -> MotorState;
    fn motor_position(&self, channel: MotorId) -> u16;
    fn set_motor(&mut self, channel: MotorId, mode: MotorMode, duty: u16)
        -> Result<(), SimError>;
    fn set_motor_target(&mut self, channel: MotorId, position: u16) -> Result<(), SimError>;

    // CAN.
    fn can_send(&mut self, bus: BusId, frame: &CanFrame) -> Result<(), SimError>;

    // Supply.
    fn battery_mv(&self) -> u16;
}
