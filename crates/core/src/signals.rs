// BusLab - Serial Bus & Pipeline Simulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::Role;

/// Represents a digital signal level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigitalLevel {
    #[default]
    Low,
    High,
}

impl DigitalLevel {
    pub fn is_high(self) -> bool {
        self == DigitalLevel::High
    }

    pub fn is_low(self) -> bool {
        self == DigitalLevel::Low
    }
}

impl From<bool> for DigitalLevel {
    fn from(b: bool) -> Self {
        if b {
            DigitalLevel::High
        } else {
            DigitalLevel::Low
        }
    }
}

impl From<DigitalLevel> for bool {
    fn from(level: DigitalLevel) -> Self {
        match level {
            DigitalLevel::High => true,
            DigitalLevel::Low => false,
        }
    }
}

impl std::fmt::Display for DigitalLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigitalLevel::High => f.write_str("1"),
            DigitalLevel::Low => f.write_str("0"),
        }
    }
}

/// An open-drain line shared by both roles (wired-AND).
///
/// Each role either pulls the line low or releases it. The line reads high
/// only while nobody pulls it down, which is how the peripheral can assert
/// ACK on a line the controller also drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenDrainLine {
    controller_pull: bool,
    peripheral_pull: bool,
}

impl OpenDrainLine {
    pub fn released() -> Self {
        Self::default()
    }

    /// Drive `level` from `role`: low pulls the line, high releases it.
    pub fn drive(&mut self, role: Role, level: DigitalLevel) {
        let pull = level.is_low();
        match role {
            Role::Controller => self.controller_pull = pull,
            Role::Peripheral => self.peripheral_pull = pull,
        }
    }

    pub fn release(&mut self, role: Role) {
        self.drive(role, DigitalLevel::High);
    }

    pub fn is_pulled_by(&self, role: Role) -> bool {
        match role {
            Role::Controller => self.controller_pull,
            Role::Peripheral => self.peripheral_pull,
        }
    }

    pub fn level(&self) -> DigitalLevel {
        DigitalLevel::from(!(self.controller_pull || self.peripheral_pull))
    }
}
