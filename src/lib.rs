//! # PMU Hardware Simulation Engine
//!
//! A PC-hosted emulation of a 30-channel automotive power-distribution
//! controller: 20 analog/digital/frequency inputs, 30 switched power
//! outputs with current sensing, 4 brushed-DC H-bridge channels and
//! 4 CAN buses. The controller's real decision logic runs unmodified
//! against this crate instead of physical electronics.
//!
//! ## Features
//!
//! - **Per-channel state machines**: PROFET-style output states with
//!   retry-after-fault semantics, debounced digital inputs, motor
//!   lifecycle tracking
//! - **Numerical models**: ohmic current with soft-start and inrush
//!   shaping, first-order RC thermal accumulators, a full DC-motor
//!   electromechanical integrator with stiction and spring end-stops
//! - **Deterministic time**: a single simulation clock with pause and
//!   time scaling; every timeout is a simulated-time comparison
//! - **Fault injection**: direct fault forcing for deterministic tests
//!   plus threshold-triggered automatic faults
//! - **Bounded memory**: fixed channel arenas and `heapless` queues, no
//!   allocation in the tick path
//!
//! ## Quick start
//!
//! ```rust
//! use pmusim::{OutputId, PmuEmulator};
//!
//! let mut emulator = PmuEmulator::new();
//! let channel = OutputId::new(5).unwrap();
//! emulator.set_output_load(channel, 4.7).unwrap();
//! emulator.set_output_duty(channel, 1000).unwrap();
//!
//! for _ in 0..10 {
//!     emulator.tick(1);
//! }
//! // 12 V across 4.7 ohm: about 2.55 A.
//! assert!((emulator.output(channel).current_ma - 2553.0).abs() < 5.0);
//! ```
//!
//! ## Architecture
//!
//! - [`emulator`] - the aggregate, tick orchestration and the narrow API
//! - [`clock`] - simulated time, pause, time scale
//! - [`inputs`] - ADC conversion and the digital debounce state machine
//! - [`outputs`] - 30 smart high-side switch channels
//! - [`motors`] - 4 H-bridge channels with full motor physics
//! - [`canbus`] - one-shot and periodic CAN injection queues
//! - [`protection`] - battery/temperature envelope and status bits
//! - [`events`] - bounded change-notification queue
//! - [`scenario`] - the persistence-facing field set
//! - [`hal`] - the hardware capability trait the firmware logic consumes

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

pub mod canbus;
pub mod channel;
pub mod clock;
pub mod emulator;
pub mod error;
pub mod events;
pub mod hal;
pub mod inputs;
pub mod motors;
pub mod outputs;
pub mod protection;
pub mod scenario;

// Re-export the main public types for convenience.
pub use canbus::{CanErrorSeverity, CanErrorState, CanFrame};
pub use channel::{BusId, InputId, MotorId, OutputId};
pub use emulator::{EmulatorSnapshot, PmuEmulator};
pub use error::SimError;
pub use events::SimEvent;
pub use hal::PmuHardware;
pub use motors::{MotorLifecycle, MotorMode, MotorParams, MotorPreset, MotorState};
pub use outputs::OutputState;
pub use protection::TempSensor;
pub use scenario::Scenario;
