// BusLab - Serial Bus & Pipeline Simulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::protocol::Ack;
use crate::{BusEvent, BusObserver, Role};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts bus events per role.
#[derive(Debug, Default)]
pub struct BusMetrics {
    transactions: AtomicU64,
    controller_bits: AtomicU64,
    peripheral_bits: AtomicU64,
    acks: AtomicU64,
    nacks: AtomicU64,
    truncated_frames: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub transactions: u64,
    pub controller_bits: u64,
    pub peripheral_bits: u64,
    pub acks: u64,
    pub nacks: u64,
    pub truncated_frames: u64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.transactions.store(0, Ordering::SeqCst);
        self.controller_bits.store(0, Ordering::SeqCst);
        self.peripheral_bits.store(0, Ordering::SeqCst);
        self.acks.store(0, Ordering::SeqCst);
        self.nacks.store(0, Ordering::SeqCst);
        self.truncated_frames.store(0, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transactions: self.transactions.load(Ordering::SeqCst),
            controller_bits: self.controller_bits.load(Ordering::SeqCst),
            peripheral_bits: self.peripheral_bits.load(Ordering::SeqCst),
            acks: self.acks.load(Ordering::SeqCst),
            nacks: self.nacks.load(Ordering::SeqCst),
            truncated_frames: self.truncated_frames.load(Ordering::SeqCst),
        }
    }
}

impl BusObserver for BusMetrics {
    fn on_event(&self, role: Role, event: &BusEvent) {
        match (role, event) {
            // Count each transaction once, from the side that starts it.
            (Role::Controller, BusEvent::Start) => {
                self.transactions.fetch_add(1, Ordering::SeqCst);
            }
            (Role::Controller, BusEvent::Bit { .. }) => {
                self.controller_bits.fetch_add(1, Ordering::SeqCst);
            }
            (Role::Peripheral, BusEvent::Bit { .. }) => {
                self.peripheral_bits.fetch_add(1, Ordering::SeqCst);
            }
            // The receiver decides the acknowledge.
            (Role::Peripheral, BusEvent::Ack(Ack::Ack)) => {
                self.acks.fetch_add(1, Ordering::SeqCst);
            }
            (Role::Peripheral, BusEvent::Ack(Ack::Nack)) => {
                self.nacks.fetch_add(1, Ordering::SeqCst);
            }
            (_, BusEvent::Truncated { .. }) => {
                self.truncated_frames.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::DigitalLevel;

    #[test]
    fn test_counts_by_role() {
        let m = BusMetrics::new();
        m.on_event(Role::Controller, &BusEvent::Start);
        m.on_event(Role::Peripheral, &BusEvent::Start);
        for index in 0..8 {
            let bit = BusEvent::Bit {
                index,
                level: DigitalLevel::High,
            };
            m.on_event(Role::Controller, &bit);
            m.on_event(Role::Peripheral, &bit);
        }
        m.on_event(Role::Peripheral, &BusEvent::Ack(Ack::Nack));
        m.on_event(Role::Controller, &BusEvent::Ack(Ack::Nack));

        let s = m.snapshot();
        assert_eq!(s.transactions, 1);
        assert_eq!(s.controller_bits, 8);
        assert_eq!(s.peripheral_bits, 8);
        assert_eq!(s.nacks, 1);
        assert_eq!(s.acks, 0);

        m.reset();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_snapshot_json_round_trip() {
        let m = BusMetrics::new();
        m.on_event(Role::Peripheral, &BusEvent::Truncated { bits: 3 });
        let json = serde_json::to_string(&m.snapshot()).unwrap();
        assert!(json.contains("\"truncated_frames\":1"));
        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m.snapshot());
    }
}
