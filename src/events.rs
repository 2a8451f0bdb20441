//! Bounded simulation event queue.
//!
//! Components report state changes and CAN transmissions here instead of
//! through callbacks; interested collaborators drain the queue after each
//! tick. The queue is fixed-capacity and drops the oldest entry on
//! overflow, counting drops so a slow consumer is visible.

use crate::canbus::CanFrame;
use crate::motors::MotorLifecycle;
use crate::outputs::OutputState;
use heapless::Vec;
use serde::Serialize;

pub const MAX_EVENTS: usize = 64;

/// Which component raised a fault event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultSource {
    Output(u8),
    Motor(u8),
    Protection,
}

#[derive(Debug, Clone, Serialize)]
pub enum SimEvent {
    OutputStateChanged {
        channel: u8,
        state: OutputState,
    },
    MotorLifecycleChanged {
        channel: u8,
        lifecycle: MotorLifecycle,
    },
    CanTx {
        bus: u8,
        frame: CanFrame,
    },
    FaultRaised {
        source: FaultSource,
        flags: u16,
    },
}

#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<SimEvent, MAX_EVENTS>,
    dropped: u32,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: SimEvent) {
        if self.events.is_full() {
            self.events.remove(0);
            self.dropped = self.dropped.saturating_add(1);
        }
        let _ = self.events.push(event);
    }

    /// Read-and-clear: returns all queued events and empties the queue.
    pub fn drain(&mut self) -> Vec<SimEvent, MAX_EVENTS> {
        core::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events lost to overflow since the last reset.
    pub const fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn reset(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }
}
