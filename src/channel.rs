//! Range-checked channel identifiers.
//!
//! Every bank stores its channels in a fixed array; these newtypes are the
//! only way to index them through the public API. Construction validates
//! the raw index once, so the hot tick path indexes without bounds
//! surprises and callers get a [`SimError`] instead of a panic.

use crate::error::SimError;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// Analog/digital/frequency input channels.
pub const INPUT_COUNT: usize = 20;
/// Switched power outputs with current sensing.
pub const OUTPUT_COUNT: usize = 30;
/// Brushed-DC motor H-bridge channels.
pub const MOTOR_COUNT: usize = 4;
/// CAN buses.
pub const CAN_BUS_COUNT: usize = 4;

// Bitmask views over the digital inputs use a u32.
const_assert!(INPUT_COUNT <= 32);
const_assert!(OUTPUT_COUNT <= u8::MAX as usize);
const_assert!(MOTOR_COUNT <= u8::MAX as usize);
const_assert!(CAN_BUS_COUNT <= u8::MAX as usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputId(u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputId(u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MotorId(u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusId(u8);

impl InputId {
    pub const COUNT: usize = INPUT_COUNT;

    pub fn new(index: usize) -> Result<Self, SimError> {
        if index < Self::COUNT {
            Ok(Self(index as u8))
        } else {
            Err(SimError::InvalidInputChannel(index))
        }
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::COUNT).map(|i| Self(i as u8))
    }
}

impl OutputId {
    pub const COUNT: usize = OUTPUT_COUNT;

    pub fn new(index: usize) -> Result<Self, SimError> {
        if index < Self::COUNT {
            Ok(Self(index as u8))
        } else {
            Err(SimError::InvalidOutputChannel(index))
        }
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::COUNT).map(|i| Self(i as u8))
    }
}

impl MotorId {
    pub const COUNT: usize = MOTOR_COUNT;

    pub fn new(index: usize) -> Result<Self, SimError> {
        if index < Self::COUNT {
            Ok(Self(index as u8))
        } else {
            Err(SimError::InvalidMotorChannel(index))
        }
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::COUNT).map(|i| Self(i as u8))
    }
}

impl BusId {
    pub const COUNT: usize = CAN_BUS_COUNT;

    pub fn new(index: usize) -> Result<Self, SimError> {
        if index < Self::COUNT {
            Ok(Self(index as u8))
        } else {
            Err(SimError::InvalidBus(index))
        }
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::COUNT).map(|i| Self(i as u8))
    }
}
