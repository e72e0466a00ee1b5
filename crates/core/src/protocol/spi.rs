// BusLab - Serial Bus & Pipeline Simulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Push-pull serial bus with a chip-select line (SPI mode 0).
//!
//! The controller drives CS, SCLK and MOSI; the peripheral drives MISO.
//! Data is shifted MSB first. MOSI is sampled by the peripheral on the
//! rising SCLK edge and MISO by the controller just before the falling edge.

use super::frame::{Frame, FrameAssembler};
use crate::bus::{BusTiming, SharedBus};
use crate::signals::DigitalLevel;
use crate::{notify_observers, BusEvent, BusObserver, Role, SimResult, SimulationError};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiLines {
    /// Chip select, active low.
    pub cs: DigitalLevel,
    pub sclk: DigitalLevel,
    pub mosi: DigitalLevel,
    pub miso: DigitalLevel,
}

impl Default for SpiLines {
    fn default() -> Self {
        Self {
            cs: DigitalLevel::High,
            sclk: DigitalLevel::Low,
            mosi: DigitalLevel::Low,
            miso: DigitalLevel::Low,
        }
    }
}

impl SpiLines {
    pub fn selected(&self) -> bool {
        self.cs.is_low()
    }
}

pub type SpiBus = SharedBus<SpiLines>;

pub fn new_bus(timing: BusTiming) -> SimResult<SpiBus> {
    SharedBus::new(SpiLines::default(), timing)
}

pub struct SpiController<'a> {
    bus: &'a SpiBus,
    observers: Vec<Arc<dyn BusObserver>>,
}

impl<'a> SpiController<'a> {
    pub fn new(bus: &'a SpiBus) -> Self {
        Self {
            bus,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn BusObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Shift one frame out on MOSI inside its own CS assertion and return
    /// the frame clocked in on MISO.
    pub fn transfer(&self, frame: Frame) -> SimResult<Frame> {
        self.select();
        let echoed = self.shift(frame);
        self.deselect();
        echoed
    }

    /// Shift several bytes inside a single CS assertion.
    pub fn transfer_bytes(&self, data: &[u8]) -> SimResult<Vec<u8>> {
        self.select();
        let mut received = Vec::with_capacity(data.len());
        for &byte in data {
            match self.shift(Frame::byte(byte)) {
                Ok(frame) => received.push(frame.as_u8()),
                Err(e) => {
                    self.deselect();
                    return Err(e);
                }
            }
        }
        self.deselect();
        Ok(received)
    }

    fn select(&self) {
        self.bus.update(|l| {
            l.sclk = DigitalLevel::Low;
            l.cs = DigitalLevel::Low;
        });
        tracing::info!(role = %Role::Controller, "CS asserted");
        notify_observers(&self.observers, Role::Controller, BusEvent::Start);
        self.bus.settle();
    }

    fn deselect(&self) {
        self.bus.update(|l| {
            l.sclk = DigitalLevel::Low;
            l.cs = DigitalLevel::High;
        });
        tracing::info!(role = %Role::Controller, "CS released");
        notify_observers(&self.observers, Role::Controller, BusEvent::Stop);
        self.bus.settle();
    }

    fn shift(&self, frame: Frame) -> SimResult<Frame> {
        tracing::info!(role = %Role::Controller, %frame, "sending frame");
        let mut received: u16 = 0;
        for (index, bit) in frame.bits().enumerate() {
            self.bus.update(|l| {
                l.mosi = bit;
                l.sclk = DigitalLevel::High;
            });
            self.bus.settle();

            let miso = self.bus.update(|l| {
                l.sclk = DigitalLevel::Low;
                l.miso
            });
            received = (received << 1) | u16::from(bool::from(miso));
            tracing::debug!(role = %Role::Controller, index, mosi = %bit, miso = %miso, "bit");
            notify_observers(
                &self.observers,
                Role::Controller,
                BusEvent::Bit {
                    index: index as u8,
                    level: bit,
                },
            );
            self.bus.settle();
        }
        let echoed = Frame::new(received, frame.width())?;
        tracing::info!(role = %Role::Controller, frame = %echoed, "received on MISO");
        Ok(echoed)
    }
}

/// What the peripheral shifts out on MISO while it receives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SpiResponse {
    /// Return each MOSI bit on MISO during the same clock.
    #[default]
    Echo,
    /// Shift out these bytes, one per frame, repeating when exhausted.
    Pattern(Vec<u8>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SpiReceipt {
    /// Frames reconstructed from MOSI, in arrival order.
    pub received: Vec<Frame>,
    /// Frames driven on MISO alongside them.
    pub sent: Vec<Frame>,
    /// Bits of a frame cut short by CS release (dropped).
    pub truncated_bits: u8,
}

impl SpiReceipt {
    pub fn bytes(&self) -> Vec<u8> {
        self.received.iter().map(Frame::as_u8).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiState {
    WaitSelect,
    ReceiveData,
    WaitDeselect,
}

pub struct SpiPeripheral<'a> {
    bus: &'a SpiBus,
    response: SpiResponse,
    observers: Vec<Arc<dyn BusObserver>>,
}

impl<'a> SpiPeripheral<'a> {
    pub fn new(bus: &'a SpiBus) -> Self {
        Self {
            bus,
            response: SpiResponse::Echo,
            observers: Vec::new(),
        }
    }

    pub fn with_response(mut self, response: SpiResponse) -> Self {
        self.response = response;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn BusObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    fn transition(&self, state: SpiState) {
        tracing::debug!(role = %Role::Peripheral, ?state, "state");
    }

    fn response_bit(&self, frame_index: usize, width: u8, bit: u8) -> SimResult<Option<DigitalLevel>> {
        match &self.response {
            SpiResponse::Echo => Ok(None),
            SpiResponse::Pattern(bytes) if bytes.is_empty() => Ok(Some(DigitalLevel::High)),
            SpiResponse::Pattern(bytes) => {
                let byte = bytes[frame_index % bytes.len()];
                let level = Frame::new(byte as u16, width)?
                    .bit(bit)
                    .ok_or(SimulationError::FrameWidth(width))?;
                Ok(Some(level))
            }
        }
    }

    /// Serve one CS assertion, receiving `width`-bit frames until CS is
    /// released.
    pub fn receive(&self, width: u8) -> SimResult<SpiReceipt> {
        let mut rx = FrameAssembler::new(width)?;
        let mut tx = FrameAssembler::new(width)?;
        let mut receipt = SpiReceipt::default();

        self.transition(SpiState::WaitSelect);
        self.bus.wait_until("chip select asserted", SpiLines::selected)?;
        tracing::info!(role = %Role::Peripheral, "transaction started");
        notify_observers(&self.observers, Role::Peripheral, BusEvent::Start);
        self.transition(SpiState::ReceiveData);

        loop {
            let lines = self.bus.wait_until("SCLK rising or CS released", |l| {
                l.sclk.is_high() || !l.selected()
            })?;
            if !lines.selected() {
                break;
            }

            let index = rx.received();
            let forced = self.response_bit(receipt.received.len(), width, index)?;
            let (mosi, miso) = self.bus.update(|l| {
                l.miso = forced.unwrap_or(l.mosi);
                (l.mosi, l.miso)
            });
            rx.push(mosi);
            tx.push(miso);
            tracing::debug!(role = %Role::Peripheral, index, mosi = %mosi, miso = %miso, "bit");
            notify_observers(
                &self.observers,
                Role::Peripheral,
                BusEvent::Bit { index, level: mosi },
            );

            self.bus.wait_until("SCLK falling", |l| l.sclk.is_low())?;

            if let (Some(frame), Some(sent)) = (rx.finish(), tx.finish()) {
                tracing::info!(role = %Role::Peripheral, %frame, "frame received");
                receipt.received.push(frame);
                receipt.sent.push(sent);
                rx.reset();
                tx.reset();
            }
        }

        self.transition(SpiState::WaitDeselect);
        if rx.received() > 0 {
            receipt.truncated_bits = rx.received();
            tracing::warn!(
                role = %Role::Peripheral,
                bits = rx.received(),
                "CS released mid-frame; partial frame dropped"
            );
            notify_observers(
                &self.observers,
                Role::Peripheral,
                BusEvent::Truncated {
                    bits: rx.received(),
                },
            );
        }
        tracing::info!(role = %Role::Peripheral, frames = receipt.received.len(), "transaction ended");
        notify_observers(&self.observers, Role::Peripheral, BusEvent::Stop);
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::run_transaction;

    #[test]
    fn test_echo_round_trip_single_byte() {
        let bus = new_bus(BusTiming::fast()).unwrap();
        let peripheral = SpiPeripheral::new(&bus);
        let controller = SpiController::new(&bus);

        let (receipt, echoed) = run_transaction(
            bus.timing().settle,
            || peripheral.receive(8),
            || controller.transfer(Frame::byte(0b1010_1100)),
        );

        let receipt = receipt.unwrap();
        assert_eq!(receipt.bytes(), vec![0b1010_1100]);
        assert_eq!(echoed.unwrap(), Frame::byte(0b1010_1100));
        assert_eq!(receipt.truncated_bits, 0);
    }

    #[test]
    fn test_pattern_response_is_clocked_back() {
        let bus = new_bus(BusTiming::fast()).unwrap();
        let peripheral = SpiPeripheral::new(&bus).with_response(SpiResponse::Pattern(vec![0x5A, 0x01]));
        let controller = SpiController::new(&bus);

        let (receipt, miso) = run_transaction(
            bus.timing().settle,
            || peripheral.receive(8),
            || controller.transfer_bytes(&[0xFF, 0x00, 0x81]),
        );

        let receipt = receipt.unwrap();
        assert_eq!(receipt.bytes(), vec![0xFF, 0x00, 0x81]);
        assert_eq!(miso.unwrap(), vec![0x5A, 0x01, 0x5A]);
        assert_eq!(
            receipt.sent.iter().map(Frame::as_u8).collect::<Vec<_>>(),
            vec![0x5A, 0x01, 0x5A]
        );
    }

    #[test]
    fn test_narrow_frame_truncates_on_deselect() {
        // The controller sends 8 bits while the peripheral expects 5-bit frames.
        let bus = new_bus(BusTiming::fast()).unwrap();
        let peripheral = SpiPeripheral::new(&bus);
        let controller = SpiController::new(&bus);

        let (receipt, _) = run_transaction(
            bus.timing().settle,
            || peripheral.receive(5),
            || controller.transfer(Frame::byte(0b1011_0111)),
        );

        let receipt = receipt.unwrap();
        assert_eq!(receipt.received, vec![Frame::new(0b10110, 5).unwrap()]);
        assert_eq!(receipt.truncated_bits, 3);
    }

    #[test]
    fn test_peripheral_times_out_without_controller() {
        let timing = BusTiming::fast().with_timeout(Some(std::time::Duration::from_millis(20)));
        let bus = new_bus(timing).unwrap();
        let err = SpiPeripheral::new(&bus).receive(8).unwrap_err();
        assert!(matches!(
            err,
            crate::SimulationError::Timeout {
                waiting_for: "chip select asserted",
                ..
            }
        ));
    }

    #[test]
    fn test_lines_idle_after_transfer() {
        let bus = new_bus(BusTiming::fast()).unwrap();
        let peripheral = SpiPeripheral::new(&bus);
        let controller = SpiController::new(&bus);
        let _ = run_transaction(
            bus.timing().settle,
            || peripheral.receive(8),
            || controller.transfer(Frame::byte(0x3C)),
        );
        let lines = bus.snapshot();
        assert!(!lines.selected());
        assert_eq!(lines.sclk, DigitalLevel::Low);
    }
}
