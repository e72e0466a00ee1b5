// BusLab - Serial Bus & Pipeline Simulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bus;
pub mod metrics;
pub mod pipeline;
pub mod protocol;
pub mod signals;
pub mod sync;

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Timed out after {elapsed:?} waiting for {waiting_for}")]
    Timeout {
        waiting_for: &'static str,
        elapsed: Duration,
    },
    #[error("Invalid bus timing: {0}")]
    Timing(String),
    #[error("Invalid frame width {0} (expected 1..=16)")]
    FrameWidth(u8),
    #[error("Invalid 7-bit address {0:#04x}")]
    Address(u8),
    #[error("Admission gate capacity must be at least 1")]
    InvalidCapacity,
}

pub type SimResult<T> = Result<T, SimulationError>;

/// The two parties of a bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Controller,
    Peripheral,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Controller => f.write_str("controller"),
            Role::Peripheral => f.write_str("peripheral"),
        }
    }
}

/// Observable bus transitions, reported by both roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Start,
    Bit { index: u8, level: signals::DigitalLevel },
    Ack(protocol::Ack),
    Stop,
    /// A frame cut short by the end of the transaction.
    Truncated { bits: u8 },
}

/// Trait for observing bus events in a modular way.
pub trait BusObserver: std::fmt::Debug + Send + Sync {
    fn on_event(&self, _role: Role, _event: &BusEvent) {}
}

pub(crate) fn notify_observers(
    observers: &[std::sync::Arc<dyn BusObserver>],
    role: Role,
    event: BusEvent,
) {
    for observer in observers {
        observer.on_event(role, &event);
    }
}
