// BusLab - Serial Bus & Pipeline Simulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use buslab_core::bus::{BusTiming, WaitMode, SETTLE_POLL_RATIO};
use buslab_core::pipeline::PipelineConfig;
use buslab_core::protocol::spi::SpiResponse;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const SUPPORTED_SCHEMA_VERSION: &str = "1.0";

/// Default schema version for YAML scenarios
fn default_schema_version() -> String {
    SUPPORTED_SCHEMA_VERSION.to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unsupported schema_version '{0}'. Supported versions: '1.0'")]
    UnsupportedSchema(String),
    #[error("{field} {value:#04x} is not a 7-bit address")]
    AddressOutOfRange { field: &'static str, value: u8 },
    #[error("{0} payload cannot be empty")]
    EmptyPayload(&'static str),
    #[error("pipeline capacity must be greater than zero")]
    ZeroCapacity,
    #[error(
        "timing: poll_us ({poll_us}) must be non-zero and settle_us ({settle_us}) at least {ratio} times poll_us"
    )]
    PollTooSlow {
        poll_us: u64,
        settle_us: u64,
        ratio: u32,
    },
    #[error("pipeline poll_us must be greater than zero")]
    ZeroPipelinePoll,
    #[error("timing: timeout_ms ({timeout_ms}) must exceed the settle time")]
    TimeoutTooShort { timeout_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub settle_us: u64,
    pub poll_us: u64,
    /// `null` waits forever.
    pub timeout_ms: Option<u64>,
    pub wait: WaitMode,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            settle_us: 50_000,
            poll_us: 1_000,
            timeout_ms: Some(5_000),
            wait: WaitMode::Poll,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Echo,
}

/// `response: echo` or `response: [0x5A, ...]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseSpec {
    Mode(ResponseMode),
    Pattern(Vec<u8>),
}

impl Default for ResponseSpec {
    fn default() -> Self {
        ResponseSpec::Mode(ResponseMode::Echo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiSection {
    pub payload: Vec<u8>,
    pub response: ResponseSpec,
}

impl Default for SpiSection {
    fn default() -> Self {
        Self {
            payload: vec![0b1010_1100],
            response: ResponseSpec::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct I2cSection {
    pub peripheral_address: u8,
    pub target_address: u8,
    pub payload: Vec<u8>,
    pub rx_capacity: Option<usize>,
    /// Answer every address instead of `peripheral_address` only.
    pub match_any: bool,
}

impl Default for I2cSection {
    fn default() -> Self {
        Self {
            peripheral_address: 0x50,
            target_address: 0x50,
            payload: vec![0xA5],
            rx_capacity: None,
            match_any: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub capacity: usize,
    pub items: Vec<i64>,
    pub factor: i64,
    pub produce_interval_ms: u64,
    pub poll_us: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            capacity: 2,
            items: (1..=5).collect(),
            factor: 2,
            produce_interval_ms: 0,
            poll_us: 1_000,
        }
    }
}

/// One scenario file. Every section may be omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub spi: SpiSection,
    #[serde(default)]
    pub i2c: I2cSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            name: None,
            timing: TimingSection::default(),
            spi: SpiSection::default(),
            i2c: I2cSection::default(),
            pipeline: PipelineSection::default(),
        }
    }
}

fn check_address(field: &'static str, value: u8) -> Result<(), ConfigError> {
    if value > 0x7F {
        return Err(ConfigError::AddressOutOfRange { field, value });
    }
    Ok(())
}

impl ScenarioConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open scenario at {:?}", path.as_ref()))?;
        let scenario: Self =
            serde_yaml::from_reader(f).context("Failed to parse Scenario YAML")?;
        scenario.validate()?;
        tracing::debug!(path = ?path.as_ref(), name = ?scenario.name, "scenario loaded");
        Ok(scenario)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let scenario: Self = serde_yaml::from_str(yaml).context("Failed to parse Scenario YAML")?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(ConfigError::UnsupportedSchema(self.schema_version.clone()));
        }

        let t = &self.timing;
        if t.poll_us == 0 || t.poll_us.saturating_mul(u64::from(SETTLE_POLL_RATIO)) > t.settle_us {
            return Err(ConfigError::PollTooSlow {
                poll_us: t.poll_us,
                settle_us: t.settle_us,
                ratio: SETTLE_POLL_RATIO,
            });
        }
        if let Some(timeout_ms) = t.timeout_ms {
            if timeout_ms.saturating_mul(1_000) <= t.settle_us {
                return Err(ConfigError::TimeoutTooShort { timeout_ms });
            }
        }

        if self.spi.payload.is_empty() {
            return Err(ConfigError::EmptyPayload("spi"));
        }
        if let ResponseSpec::Pattern(p) = &self.spi.response {
            if p.is_empty() {
                return Err(ConfigError::EmptyPayload("spi response"));
            }
        }

        check_address("i2c.peripheral_address", self.i2c.peripheral_address)?;
        check_address("i2c.target_address", self.i2c.target_address)?;
        if self.i2c.payload.is_empty() {
            return Err(ConfigError::EmptyPayload("i2c"));
        }

        if self.pipeline.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.pipeline.poll_us == 0 {
            return Err(ConfigError::ZeroPipelinePoll);
        }

        Ok(())
    }

    pub fn timing(&self) -> BusTiming {
        BusTiming {
            settle: Duration::from_micros(self.timing.settle_us),
            poll_interval: Duration::from_micros(self.timing.poll_us),
            timeout: self.timing.timeout_ms.map(Duration::from_millis),
            mode: self.timing.wait,
        }
    }

    pub fn spi_response(&self) -> SpiResponse {
        match &self.spi.response {
            ResponseSpec::Mode(ResponseMode::Echo) => SpiResponse::Echo,
            ResponseSpec::Pattern(bytes) => SpiResponse::Pattern(bytes.clone()),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            capacity: self.pipeline.capacity,
            poll_interval: Duration::from_micros(self.pipeline.poll_us),
            produce_interval: Duration::from_millis(self.pipeline.produce_interval_ms),
        }
    }
}
