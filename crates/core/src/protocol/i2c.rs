// BusLab - Serial Bus & Pipeline Simulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Two-wire open-drain bus with START/STOP conditions and ACK/NACK.
//!
//! SCL is driven by the controller only. SDA is wired-AND: either role may
//! pull it low. Data changes only while SCL is low; SDA falling while SCL is
//! high is START, SDA rising while SCL is high is STOP.

use super::frame::{Ack, Frame, FrameAssembler};
use crate::bus::{BusTiming, SharedBus};
use crate::signals::{DigitalLevel, OpenDrainLine};
use crate::{notify_observers, BusEvent, BusObserver, Role, SimResult, SimulationError};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cLines {
    pub scl: DigitalLevel,
    pub sda: OpenDrainLine,
}

impl Default for I2cLines {
    fn default() -> Self {
        Self {
            scl: DigitalLevel::High,
            sda: OpenDrainLine::released(),
        }
    }
}

impl I2cLines {
    pub fn sda_level(&self) -> DigitalLevel {
        self.sda.level()
    }

    pub fn is_idle(&self) -> bool {
        self.scl.is_high() && self.sda_level().is_high()
    }

    fn is_start(&self) -> bool {
        self.scl.is_high() && self.sda_level().is_low()
    }
}

pub type I2cBus = SharedBus<I2cLines>;

/// Every I2C frame is eight bits: address + R/W, or one data byte.
pub const FRAME_WIDTH: u8 = 8;

pub fn new_bus(timing: BusTiming) -> SimResult<I2cBus> {
    SharedBus::new(I2cLines::default(), timing)
}

/// Acknowledge results of one controller write.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct I2cWriteOutcome {
    pub address: u8,
    pub address_ack: Ack,
    /// One entry per data byte sent; a NACK is always the last entry.
    pub data_acks: Vec<Ack>,
}

impl I2cWriteOutcome {
    pub fn bytes_acked(&self) -> usize {
        self.data_acks.iter().filter(|a| a.is_ack()).count()
    }

    pub fn is_complete(&self, len: usize) -> bool {
        self.address_ack.is_ack() && self.bytes_acked() == len
    }
}

pub struct I2cController<'a> {
    bus: &'a I2cBus,
    observers: Vec<Arc<dyn BusObserver>>,
}

impl<'a> I2cController<'a> {
    pub fn new(bus: &'a I2cBus) -> Self {
        Self {
            bus,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn BusObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    fn emit(&self, event: BusEvent) {
        notify_observers(&self.observers, Role::Controller, event);
    }

    /// Write `data` to the peripheral at `address`.
    ///
    /// A NACK on the address or on any data byte ends the transfer early;
    /// STOP is always generated. Retrying is left to the caller.
    pub fn write(&self, address: u8, data: &[u8]) -> SimResult<I2cWriteOutcome> {
        let address_frame = Frame::address_write(address)?;

        self.start();
        let address_ack = self.transfer_frame(address_frame)?;
        let mut outcome = I2cWriteOutcome {
            address,
            address_ack,
            data_acks: Vec::with_capacity(data.len()),
        };

        if address_ack.is_ack() {
            for &byte in data {
                let ack = self.transfer_frame(Frame::byte(byte))?;
                outcome.data_acks.push(ack);
                if !ack.is_ack() {
                    tracing::warn!(
                        role = %Role::Controller,
                        byte = %format!("{:#04x}", byte),
                        "data byte NACKed"
                    );
                    break;
                }
            }
        } else {
            tracing::warn!(
                role = %Role::Controller,
                address = %format!("{:#04x}", address),
                "address NACKed; aborting transfer"
            );
        }

        self.stop();
        Ok(outcome)
    }

    /// Clock one 8-bit frame out MSB first followed by the acknowledge
    /// clock, and return the acknowledge driven by the receiver. Other widths
    /// are rejected before the bus is touched.
    pub fn transfer_frame(&self, frame: Frame) -> SimResult<Ack> {
        if frame.width() != FRAME_WIDTH {
            return Err(SimulationError::FrameWidth(frame.width()));
        }
        tracing::info!(role = %Role::Controller, %frame, "sending frame");
        let last = frame.width() - 1;
        for (index, bit) in frame.bits().enumerate() {
            self.bus.update(|l| {
                l.sda.drive(Role::Controller, bit);
                l.scl = DigitalLevel::High;
            });
            tracing::debug!(role = %Role::Controller, index, sda = %bit, "bit");
            self.emit(BusEvent::Bit {
                index: index as u8,
                level: bit,
            });
            self.bus.settle();

            let release = index as u8 == last;
            self.bus.update(|l| {
                l.scl = DigitalLevel::Low;
                if release {
                    l.sda.release(Role::Controller);
                }
            });
            self.bus.settle();
        }

        self.bus.update(|l| l.scl = DigitalLevel::High);
        self.bus.settle();
        let ack = self.bus.update(|l| {
            let ack = Ack::from_sda(l.sda_level());
            l.scl = DigitalLevel::Low;
            ack
        });
        tracing::info!(role = %Role::Controller, %ack, "acknowledge sampled");
        self.emit(BusEvent::Ack(ack));
        self.bus.settle();
        Ok(ack)
    }

    fn start(&self) {
        self.bus.update(|l| {
            l.scl = DigitalLevel::High;
            l.sda.drive(Role::Controller, DigitalLevel::Low);
        });
        tracing::info!(role = %Role::Controller, "START condition");
        self.emit(BusEvent::Start);
        self.bus.settle();
        self.bus.update(|l| l.scl = DigitalLevel::Low);
        self.bus.settle();
    }

    fn stop(&self) {
        self.bus.update(|l| {
            l.scl = DigitalLevel::Low;
            l.sda.drive(Role::Controller, DigitalLevel::Low);
        });
        self.bus.settle();
        self.bus.update(|l| l.scl = DigitalLevel::High);
        self.bus.settle();
        self.bus.update(|l| l.sda.release(Role::Controller));
        tracing::info!(role = %Role::Controller, "STOP condition");
        self.emit(BusEvent::Stop);
        self.bus.settle();
    }
}

/// Which addresses the peripheral answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMatch {
    Exact(u8),
    Any,
}

impl AddressMatch {
    fn accepts(self, address: u8) -> bool {
        match self {
            AddressMatch::Exact(own) => own == address,
            AddressMatch::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cState {
    WaitStart,
    ReceiveAddress,
    ReceiveData,
    WaitStop,
}

/// What the peripheral observed during one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct I2cReceipt {
    /// 7-bit address received, if the address phase completed.
    pub address: Option<u8>,
    pub address_ack: Option<Ack>,
    pub data: Vec<u8>,
    pub data_acks: Vec<Ack>,
}

impl I2cReceipt {
    pub fn matched(&self) -> bool {
        self.address_ack == Some(Ack::Ack)
    }
}

enum Received {
    Frame(Frame),
    Stop,
}

pub struct I2cPeripheral<'a> {
    bus: &'a I2cBus,
    policy: AddressMatch,
    rx_capacity: Option<usize>,
    observers: Vec<Arc<dyn BusObserver>>,
}

impl<'a> I2cPeripheral<'a> {
    pub fn new(bus: &'a I2cBus, address: u8) -> SimResult<Self> {
        if address > 0x7F {
            return Err(SimulationError::Address(address));
        }
        Ok(Self {
            bus,
            policy: AddressMatch::Exact(address),
            rx_capacity: None,
            observers: Vec::new(),
        })
    }

    pub fn with_match_policy(mut self, policy: AddressMatch) -> Self {
        self.policy = policy;
        self
    }

    /// NACK every data byte once `capacity` bytes have been stored.
    pub fn with_rx_capacity(mut self, capacity: usize) -> Self {
        self.rx_capacity = Some(capacity);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn BusObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    fn emit(&self, event: BusEvent) {
        notify_observers(&self.observers, Role::Peripheral, event);
    }

    fn transition(&self, state: I2cState) {
        tracing::debug!(role = %Role::Peripheral, ?state, "state");
    }

    /// Serve `count` transactions back to back.
    pub fn serve(&self, count: usize) -> SimResult<Vec<I2cReceipt>> {
        (0..count).map(|_| self.receive()).collect()
    }

    /// Serve a single transaction, from START to STOP.
    pub fn receive(&self) -> SimResult<I2cReceipt> {
        let mut receipt = I2cReceipt::default();

        self.transition(I2cState::WaitStart);
        self.bus.wait_until("START condition", I2cLines::is_start)?;
        tracing::info!(role = %Role::Peripheral, "detected START condition");
        self.emit(BusEvent::Start);
        self.bus.wait_until("SCL low after START", |l| l.scl.is_low())?;

        self.transition(I2cState::ReceiveAddress);
        let frame = match self.receive_frame()? {
            Received::Frame(frame) => frame,
            Received::Stop => {
                tracing::warn!(role = %Role::Peripheral, "STOP during address phase");
                self.finish();
                return Ok(receipt);
            }
        };

        let address = frame.as_u8() >> 1;
        let is_write = frame.as_u8() & 1 == 0;
        receipt.address = Some(address);
        tracing::info!(
            role = %Role::Peripheral,
            address = %format!("{:#04x}", address),
            write = is_write,
            "address received"
        );

        let ack = if self.policy.accepts(address) && is_write {
            Ack::Ack
        } else {
            Ack::Nack
        };
        receipt.address_ack = Some(ack);
        self.acknowledge(ack)?;

        if ack.is_ack() {
            self.transition(I2cState::ReceiveData);
            loop {
                let frame = match self.receive_frame()? {
                    Received::Frame(frame) => frame,
                    Received::Stop => {
                        self.finish();
                        return Ok(receipt);
                    }
                };
                let full = self
                    .rx_capacity
                    .is_some_and(|capacity| receipt.data.len() >= capacity);
                let ack = if full {
                    tracing::warn!(role = %Role::Peripheral, "receive buffer full");
                    Ack::Nack
                } else {
                    receipt.data.push(frame.as_u8());
                    tracing::info!(role = %Role::Peripheral, %frame, "data received");
                    Ack::Ack
                };
                receipt.data_acks.push(ack);
                self.acknowledge(ack)?;
                if !ack.is_ack() {
                    break;
                }
            }
        }

        self.wait_stop()?;
        Ok(receipt)
    }

    /// Receive one 8-bit frame, or report STOP if SDA rises while SCL is high.
    fn receive_frame(&self) -> SimResult<Received> {
        let mut frame = FrameAssembler::new(FRAME_WIDTH)?;
        while !frame.is_complete() {
            let lines = self.bus.wait_until("SCL rising", |l| l.scl.is_high())?;
            let level = lines.sda_level();
            let lines = self.bus.wait_until("SCL falling or STOP", |l| {
                l.scl.is_low() || (level.is_low() && l.sda_level().is_high())
            })?;
            if lines.scl.is_high() {
                return Ok(Received::Stop);
            }

            let index = frame.received();
            frame.push(level);
            tracing::debug!(role = %Role::Peripheral, index, sda = %level, "bit");
            self.emit(BusEvent::Bit { index, level });
        }
        match frame.finish() {
            Some(frame) => Ok(Received::Frame(frame)),
            None => Err(SimulationError::FrameWidth(frame.received())),
        }
    }

    /// Drive the acknowledge bit for the clock that follows a frame.
    fn acknowledge(&self, ack: Ack) -> SimResult<()> {
        self.bus.update(|l| l.sda.drive(Role::Peripheral, ack.sda_level()));
        tracing::info!(role = %Role::Peripheral, %ack, "sending acknowledge");
        self.emit(BusEvent::Ack(ack));
        self.bus.wait_until("acknowledge clock high", |l| l.scl.is_high())?;
        self.bus.wait_until("acknowledge clock low", |l| l.scl.is_low())?;
        self.bus.update(|l| l.sda.release(Role::Peripheral));
        Ok(())
    }

    /// Ignore any further frames until STOP.
    fn wait_stop(&self) -> SimResult<()> {
        self.transition(I2cState::WaitStop);
        loop {
            match self.receive_frame()? {
                Received::Stop => break,
                Received::Frame(frame) => {
                    tracing::debug!(role = %Role::Peripheral, %frame, "ignoring frame");
                    self.acknowledge(Ack::Nack)?;
                }
            }
        }
        self.finish();
        Ok(())
    }

    fn finish(&self) {
        tracing::info!(role = %Role::Peripheral, "detected STOP condition");
        self.emit(BusEvent::Stop);
    }
}
