// BusLab - Serial Bus & Pipeline Simulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::signals::DigitalLevel;
use crate::{SimResult, SimulationError};

pub const MAX_FRAME_WIDTH: u8 = 16;

/// A fixed-width group of bits, transmitted MSB first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Frame {
    value: u16,
    width: u8,
}

impl Frame {
    pub fn new(value: u16, width: u8) -> SimResult<Self> {
        if width == 0 || width > MAX_FRAME_WIDTH {
            return Err(SimulationError::FrameWidth(width));
        }
        Ok(Self {
            value: value & Self::mask(width),
            width,
        })
    }

    pub fn byte(value: u8) -> Self {
        Self {
            value: value as u16,
            width: 8,
        }
    }

    /// 7-bit address followed by the R/W bit (0 = write).
    pub fn address_write(address: u8) -> SimResult<Self> {
        if address > 0x7F {
            return Err(SimulationError::Address(address));
        }
        Ok(Self::byte(address << 1))
    }

    fn mask(width: u8) -> u16 {
        if width >= 16 {
            u16::MAX
        } else {
            (1u16 << width) - 1
        }
    }

    pub fn value(&self) -> u16 {
        self.value
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    /// Low byte of the value; meaningful for frames up to 8 bits wide.
    pub fn as_u8(&self) -> u8 {
        (self.value & 0xFF) as u8
    }

    /// Bit `index` counted from the first transmitted bit, or `None` past
    /// the frame width.
    pub fn bit(&self, index: u8) -> Option<DigitalLevel> {
        let shift = self.width.checked_sub(1)?.checked_sub(index)?;
        Some(DigitalLevel::from((self.value >> shift) & 1 == 1))
    }

    /// Bits in transmission order (MSB first).
    pub fn bits(&self) -> impl Iterator<Item = DigitalLevel> + '_ {
        (0..self.width).filter_map(move |i| self.bit(i))
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0b{:0width$b}", self.value, width = self.width as usize)
    }
}

/// Rebuilds a frame from bits sampled in transmission order.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    width: u8,
    value: u16,
    received: u8,
}

impl FrameAssembler {
    pub fn new(width: u8) -> SimResult<Self> {
        if width == 0 || width > MAX_FRAME_WIDTH {
            return Err(SimulationError::FrameWidth(width));
        }
        Ok(Self {
            width,
            value: 0,
            received: 0,
        })
    }

    pub fn push(&mut self, level: DigitalLevel) {
        if self.received < self.width {
            self.value = (self.value << 1) | u16::from(bool::from(level));
            self.received += 1;
        }
    }

    pub fn received(&self) -> u8 {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.width
    }

    pub fn finish(&self) -> Option<Frame> {
        self.is_complete().then_some(Frame {
            value: self.value,
            width: self.width,
        })
    }

    pub fn reset(&mut self) {
        self.value = 0;
        self.received = 0;
    }
}

/// Acknowledge bit driven by the receiver after each 8-bit phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ack {
    Ack,
    Nack,
}

impl Ack {
    /// SDA held low during the acknowledge clock means ACK.
    pub fn from_sda(level: DigitalLevel) -> Self {
        match level {
            DigitalLevel::Low => Ack::Ack,
            DigitalLevel::High => Ack::Nack,
        }
    }

    pub fn sda_level(self) -> DigitalLevel {
        match self {
            Ack::Ack => DigitalLevel::Low,
            Ack::Nack => DigitalLevel::High,
        }
    }

    pub fn is_ack(self) -> bool {
        self == Ack::Ack
    }
}

impl std::fmt::Display for Ack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ack::Ack => f.write_str("ACK"),
            Ack::Nack => f.write_str("NACK"),
        }
    }
}
