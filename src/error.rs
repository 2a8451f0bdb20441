use thiserror::Error;

/// Failure indicator returned by every setter/injector in the crate.
///
/// Errors are local and non-fatal: physical quantities with an obvious
/// valid envelope (voltage, temperature, ADC raw value) are clamped by the
/// setters instead of rejected, while index-type inputs (channel, bus,
/// slot) have no sensible clamp and are rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SimError {
    #[error("input channel {0} out of range")]
    InvalidInputChannel(usize),
    #[error("output channel {0} out of range")]
    InvalidOutputChannel(usize),
    #[error("motor channel {0} out of range")]
    InvalidMotorChannel(usize),
    #[error("CAN bus {0} out of range")]
    InvalidBus(usize),
    #[error("periodic slot {0} does not exist")]
    InvalidSlot(usize),
    #[error("duty {0} exceeds 1000")]
    InvalidDuty(u16),
    #[error("position {0} exceeds 1000")]
    InvalidPosition(u16),
    #[error("CAN identifier {id:#x} does not fit {bits}-bit addressing")]
    InvalidCanId { id: u32, bits: u8 },
    #[error("CAN data length {len} exceeds {max} bytes")]
    InvalidDataLength { len: usize, max: usize },
    #[error("load resistance {0} ohm must be positive and finite")]
    NonPositiveLoad(f32),
    #[error("time scale {0} must be a positive finite value")]
    InvalidTimeScale(f32),
    #[error("injection queue full")]
    QueueFull,
}
