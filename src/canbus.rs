//! CAN injection queues: per-bus one-shot and periodic message delivery.
//!
//! One-shot frames land on the next tick's bus pass and are discarded;
//! periodic entries occupy stable slots and re-fire on their interval
//! until removed. Taking a bus offline suppresses delivery without
//! discarding the periodic entries.

use crate::channel::{BusId, CAN_BUS_COUNT};
use crate::error::SimError;
use crate::events::{EventQueue, SimEvent};
use heapless::Vec;
use serde::{Deserialize, Serialize};

pub const CAN_MAX_DATA: usize = 64;
pub const CAN_CLASSIC_MAX_DATA: usize = 8;
pub const MAX_ONE_SHOT: usize = 32;
pub const MAX_PERIODIC: usize = 32;

const STD_ID_MAX: u32 = 0x7FF;
const EXT_ID_MAX: u32 = 0x1FFF_FFFF;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    pub id: u32,
    pub data: Vec<u8, CAN_MAX_DATA>,
    pub extended: bool,
    pub fd: bool,
}

impl CanFrame {
    pub fn new(id: u32, data: &[u8], extended: bool, fd: bool) -> Result<Self, SimError> {
        let max = if fd { CAN_MAX_DATA } else { CAN_CLASSIC_MAX_DATA };
        if data.len() > max {
            return Err(SimError::InvalidDataLength {
                len: data.len(),
                max,
            });
        }
        let id_max = if extended { EXT_ID_MAX } else { STD_ID_MAX };
        if id > id_max {
            return Err(SimError::InvalidCanId {
                id,
                bits: if extended { 29 } else { 11 },
            });
        }
        let mut frame_data = Vec::new();
        if frame_data.extend_from_slice(data).is_err() {
            return Err(SimError::InvalidDataLength {
                len: data.len(),
                max,
            });
        }
        Ok(Self {
            id,
            data: frame_data,
            extended,
            fd,
        })
    }

    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

/// Error severity injected through the bus-error simulation hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanErrorSeverity {
    Warning,
    Passive,
    BusOff,
}

/// Controller error state, modeled after a bxCAN controller's error
/// counters and their standard thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanErrorState {
    ErrorActive,
    ErrorWarning,
    ErrorPassive,
    BusOff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicMessage {
    pub frame: CanFrame,
    pub interval_ms: u32,
    pub last_tx_ms: u64,
    pub active: bool,
    // Slot freed at this tick timestamp; not reusable within the same
    // tick so a remove-then-add cannot alias a live index.
    freed_at_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct CanController {
    one_shot: Vec<CanFrame, MAX_ONE_SHOT>,
    periodic: Vec<PeriodicMessage, MAX_PERIODIC>,
    pub online: bool,
    pub error_state: CanErrorState,
    pub tx_error_count: u8,
    pub rx_error_count: u8,
    pub tx_frames: u64,
}

impl CanController {
    fn new() -> Self {
        Self {
            one_shot: Vec::new(),
            periodic: Vec::new(),
            online: true,
            error_state: CanErrorState::ErrorActive,
            tx_error_count: 0,
            rx_error_count: 0,
            tx_frames: 0,
        }
    }

    fn delivering(&self) -> bool {
        self.online && self.error_state != CanErrorState::BusOff
    }

    fn inject(&mut self, frame: CanFrame) -> Result<(), SimError> {
        self.one_shot.push(frame).map_err(|_| SimError::QueueFull)
    }

    fn add_periodic(
        &mut self,
        frame: CanFrame,
        interval_ms: u32,
        now_ms: u64,
    ) -> Result<usize, SimError> {
        let entry = PeriodicMessage {
            frame,
            interval_ms: interval_ms.max(1),
            last_tx_ms: now_ms,
            active: true,
            freed_at_ms: 0,
        };
        // Prefer a fresh slot; fall back to one freed on an earlier tick.
        if self.periodic.len() < MAX_PERIODIC {
            self.periodic.push(entry).map_err(|_| SimError::QueueFull)?;
            return Ok(self.periodic.len() - 1);
        }
        if let Some(index) = self
            .periodic
            .iter()
            .position(|slot| !slot.active && slot.freed_at_ms < now_ms)
        {
            self.periodic[index] = entry;
            return Ok(index);
        }
        Err(SimError::QueueFull)
    }

    fn remove_periodic(&mut self, index: usize, now_ms: u64) -> Result<(), SimError> {
        let slot = self
            .periodic
            .get_mut(index)
            .filter(|slot| slot.active)
            .ok_or(SimError::InvalidSlot(index))?;
        slot.active = false;
        slot.freed_at_ms = now_ms;
        Ok(())
    }

    fn set_online(&mut self, online: bool, now_ms: u64) {
        if online && !self.online {
            // Rebase so suppressed periods do not burst-retransmit.
            for slot in self.periodic.iter_mut().filter(|slot| slot.active) {
                slot.last_tx_ms = now_ms;
            }
        }
        if !online {
            // Queued one-shots are dropped, periodic entries survive.
            self.one_shot.clear();
        }
        self.online = online;
    }

    fn simulate_error(&mut self, severity: CanErrorSeverity) {
        let (state, tec) = match severity {
            CanErrorSeverity::Warning => (CanErrorState::ErrorWarning, 96),
            CanErrorSeverity::Passive => (CanErrorState::ErrorPassive, 128),
            CanErrorSeverity::BusOff => (CanErrorState::BusOff, 255),
        };
        self.error_state = state;
        self.tx_error_count = tec;
        self.rx_error_count = tec / 2;
    }

    fn clear_error(&mut self) {
        self.error_state = CanErrorState::ErrorActive;
        self.tx_error_count = 0;
        self.rx_error_count = 0;
    }

    fn tick(&mut self, bus: u8, now_ms: u64, events: &mut EventQueue) {
        if !self.delivering() {
            return;
        }

        for frame in self.one_shot.iter() {
            events.push(SimEvent::CanTx {
                bus,
                frame: frame.clone(),
            });
            self.tx_frames += 1;
        }
        self.one_shot.clear();

        for slot in self.periodic.iter_mut().filter(|slot| slot.active) {
            if now_ms.saturating_sub(slot.last_tx_ms) >= slot.interval_ms as u64 {
                events.push(SimEvent::CanTx {
                    bus,
                    frame: slot.frame.clone(),
                });
                slot.last_tx_ms = now_ms;
                self.tx_frames += 1;
            }
        }
    }

    pub fn periodic_slots(&self) -> &[PeriodicMessage] {
        &self.periodic
    }

    pub fn pending_one_shot(&self) -> usize {
        self.one_shot.len()
    }
}

#[derive(Debug, Serialize)]
pub struct CanBank {
    pub buses: [CanController; CAN_BUS_COUNT],
}

impl CanBank {
    pub fn new() -> Self {
        Self {
            buses: core::array::from_fn(|_| CanController::new()),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn tick(&mut self, now_ms: u64, events: &mut EventQueue) {
        for (bus, controller) in self.buses.iter_mut().enumerate() {
            controller.tick(bus as u8, now_ms, events);
        }
    }

    pub fn inject_message(
        &mut self,
        bus: BusId,
        id: u32,
        data: &[u8],
        extended: bool,
    ) -> Result<(), SimError> {
        let frame = CanFrame::new(id, data, extended, false)?;
        self.buses[bus.index()].inject(frame)
    }

    pub fn inject_fd(
        &mut self,
        bus: BusId,
        id: u32,
        data: &[u8],
        extended: bool,
    ) -> Result<(), SimError> {
        let frame = CanFrame::new(id, data, extended, true)?;
        self.buses[bus.index()].inject(frame)
    }

    /// Registers a repeating transmission and returns its slot index,
    /// stable for the lifetime of the entry.
    pub fn add_periodic_message(
        &mut self,
        bus: BusId,
        id: u32,
        data: &[u8],
        extended: bool,
        interval_ms: u32,
        now_ms: u64,
    ) -> Result<usize, SimError> {
        let frame = CanFrame::new(id, data, extended, false)?;
        self.buses[bus.index()].add_periodic(frame, interval_ms, now_ms)
    }

    pub fn remove_periodic_message(
        &mut self,
        bus: BusId,
        index: usize,
        now_ms: u64,
    ) -> Result<(), SimError> {
        self.buses[bus.index()].remove_periodic(index, now_ms)
    }

    pub fn set_bus_online(&mut self, bus: BusId, online: bool, now_ms: u64) {
        self.buses[bus.index()].set_online(online, now_ms);
    }

    pub fn simulate_error(&mut self, bus: BusId, severity: CanErrorSeverity) {
        self.buses[bus.index()].simulate_error(severity);
    }

    pub fn clear_error(&mut self, bus: BusId) {
        self.buses[bus.index()].clear_error();
    }

    pub fn controller(&self, bus: BusId) -> &CanController {
        &self.buses[bus.index()]
    }

    pub fn any_error(&self) -> bool {
        self.buses
            .iter()
            .any(|bus| bus.error_state != CanErrorState::ErrorActive)
    }
}

impl Default for CanBank {
    fn default() -> Self {
        Self::new()
    }
}
