// BusLab - Serial Bus & Pipeline Simulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::Context;
use buslab_config::ScenarioConfig;
use buslab_core::bus::BusTiming;
use buslab_core::metrics::{BusMetrics, MetricsSnapshot};
use buslab_core::pipeline::{Pipeline, PipelineReport};
use buslab_core::protocol::i2c::{self, AddressMatch, I2cController, I2cPeripheral};
use buslab_core::protocol::spi::{self, SpiController, SpiPeripheral, SpiResponse};
use buslab_core::protocol::{run_transaction, Ack};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

const EXIT_PASS: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const RESULT_SCHEMA_VERSION: &str = "1.0";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "BusLab serial bus and pipeline simulator",
    long_about = None
)]
struct Cli {
    /// Scenario file (YAML). Built-in scenario when omitted.
    #[arg(short, long, global = true)]
    scenario: Option<PathBuf>,

    /// Log every bit and state transition
    #[arg(short, long, global = true)]
    trace: bool,

    /// Write a JSON run report to this path
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Push-pull transfer: controller shifts the payload, peripheral echoes.
    Spi,
    /// Open-drain write with address acknowledge.
    I2c,
    /// Bounded producer / transformer / consumer run.
    Pipeline,
    /// Every scenario in turn (default).
    All,
}

#[derive(Debug, Serialize)]
#[serde(tag = "scenario", rename_all = "snake_case")]
enum ScenarioResult {
    Spi {
        sent: Vec<u8>,
        returned: Vec<u8>,
        received: Vec<u8>,
        truncated_bits: u8,
        #[serde(skip)]
        expected_return: Vec<u8>,
    },
    I2c {
        sent: Vec<u8>,
        address: u8,
        address_ack: Ack,
        bytes_acked: usize,
        received: Vec<u8>,
    },
    Pipeline {
        output: Vec<i64>,
        report: PipelineReport,
    },
}

impl ScenarioResult {
    /// A NACK is a legitimate outcome. Bytes that arrive altered or cut
    /// short are not.
    fn verify(&self) -> anyhow::Result<()> {
        match self {
            ScenarioResult::Spi {
                sent,
                returned,
                received,
                truncated_bits,
                expected_return,
            } => {
                if *truncated_bits > 0 {
                    anyhow::bail!("SPI peripheral saw a truncated frame ({} bits)", truncated_bits);
                }
                if received != sent {
                    anyhow::bail!(
                        "SPI peripheral received {:02x?}, controller sent {:02x?}",
                        received,
                        sent
                    );
                }
                if returned != expected_return {
                    anyhow::bail!(
                        "SPI controller read {:02x?} on MISO, expected {:02x?}",
                        returned,
                        expected_return
                    );
                }
                Ok(())
            }
            ScenarioResult::I2c {
                sent,
                bytes_acked,
                received,
                ..
            } => {
                let acked = &sent[..(*bytes_acked).min(sent.len())];
                if received.as_slice() != acked {
                    anyhow::bail!(
                        "I2C peripheral stored {:02x?}, controller had {:02x?} acknowledged",
                        received,
                        acked
                    );
                }
                Ok(())
            }
            ScenarioResult::Pipeline { .. } => Ok(()),
        }
    }
}

#[derive(Debug, Serialize)]
struct RunReport {
    result_schema_version: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario_path: Option<PathBuf>,
    scenario_hash: String,
    timing: BusTiming,
    results: Vec<ScenarioResult>,
    metrics: MetricsSnapshot,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing with appropriate level based on --trace flag
    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    let (scenario, scenario_hash) = match load_scenario(cli.scenario.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let timing = scenario.timing();
    if let Err(e) = timing.validate() {
        error!("{}", e);
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let command = cli.command.unwrap_or(Commands::All);
    let metrics = Arc::new(BusMetrics::new());
    let mut results = Vec::new();
    let outcome = run_command(command, &scenario, &metrics, &mut results);

    let (code, status, message) = match &outcome {
        Ok(()) => (EXIT_PASS, "pass", None),
        Err(e) => {
            error!("{:#}", e);
            (EXIT_RUNTIME_ERROR, "error", Some(format!("{:#}", e)))
        }
    };

    if let Some(path) = &cli.report {
        let report = RunReport {
            result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
            status: status.to_string(),
            message,
            scenario_path: cli.scenario.clone(),
            scenario_hash,
            timing,
            results,
            metrics: metrics.snapshot(),
        };
        if let Err(e) = write_report(path, &report) {
            error!("{:#}", e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    }

    ExitCode::from(code)
}

fn load_scenario(path: Option<&Path>) -> anyhow::Result<(ScenarioConfig, String)> {
    let Some(path) = path else {
        info!("No scenario given, using the built-in one");
        return Ok((ScenarioConfig::default(), String::new()));
    };
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read scenario {:?}", path))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let hash = format!("{:x}", hasher.finalize());
    let scenario = ScenarioConfig::from_file(path)?;
    Ok((scenario, hash))
}

fn run_command(
    command: Commands,
    scenario: &ScenarioConfig,
    metrics: &Arc<BusMetrics>,
    results: &mut Vec<ScenarioResult>,
) -> anyhow::Result<()> {
    match command {
        Commands::Spi => record(results, run_spi(scenario, metrics)?),
        Commands::I2c => record(results, run_i2c(scenario, metrics)?),
        Commands::Pipeline => record(results, run_pipeline(scenario)?),
        Commands::All => {
            record(results, run_spi(scenario, metrics)?)?;
            record(results, run_i2c(scenario, metrics)?)?;
            record(results, run_pipeline(scenario)?)
        }
    }
}

/// Keep the result for the report even when it fails verification.
fn record(results: &mut Vec<ScenarioResult>, result: ScenarioResult) -> anyhow::Result<()> {
    let verdict = result.verify();
    results.push(result);
    verdict
}

fn run_spi(scenario: &ScenarioConfig, metrics: &Arc<BusMetrics>) -> anyhow::Result<ScenarioResult> {
    info!(payload = ?scenario.spi.payload, "SPI scenario");
    let bus = spi::new_bus(scenario.timing())?;
    let peripheral = SpiPeripheral::new(&bus)
        .with_response(scenario.spi_response())
        .with_observer(metrics.clone());
    let controller = SpiController::new(&bus).with_observer(metrics.clone());

    let (receipt, returned) = run_transaction(
        bus.timing().settle,
        || peripheral.receive(8),
        || controller.transfer_bytes(&scenario.spi.payload),
    );
    let returned = returned.context("SPI controller")?;
    let receipt = receipt.context("SPI peripheral")?;

    let received = receipt.bytes();
    info!(?received, ?returned, "SPI transfer finished");

    let sent = scenario.spi.payload.clone();
    let expected_return = match scenario.spi_response() {
        SpiResponse::Echo => sent.clone(),
        SpiResponse::Pattern(pattern) => pattern.iter().copied().cycle().take(sent.len()).collect(),
    };
    Ok(ScenarioResult::Spi {
        sent,
        returned,
        received,
        truncated_bits: receipt.truncated_bits,
        expected_return,
    })
}

fn run_i2c(scenario: &ScenarioConfig, metrics: &Arc<BusMetrics>) -> anyhow::Result<ScenarioResult> {
    let section = &scenario.i2c;
    info!(
        peripheral = %format!("{:#04x}", section.peripheral_address),
        target = %format!("{:#04x}", section.target_address),
        "I2C scenario"
    );
    let bus = i2c::new_bus(scenario.timing())?;
    let mut peripheral =
        I2cPeripheral::new(&bus, section.peripheral_address)?.with_observer(metrics.clone());
    if section.match_any {
        peripheral = peripheral.with_match_policy(AddressMatch::Any);
    }
    if let Some(capacity) = section.rx_capacity {
        peripheral = peripheral.with_rx_capacity(capacity);
    }
    let controller = I2cController::new(&bus).with_observer(metrics.clone());

    let (receipt, outcome) = run_transaction(
        bus.timing().settle,
        || peripheral.receive(),
        || controller.write(section.target_address, &section.payload),
    );
    let outcome = outcome.context("I2C controller")?;
    let receipt = receipt.context("I2C peripheral")?;

    if outcome.is_complete(section.payload.len()) {
        info!(received = ?receipt.data, "I2C write acknowledged");
    } else if outcome.address_ack.is_ack() {
        warn!(
            acked = outcome.bytes_acked(),
            sent = section.payload.len(),
            "I2C write cut short by NACK"
        );
    } else {
        warn!(
            address = %format!("{:#04x}", outcome.address),
            "no peripheral acknowledged the address"
        );
    }

    Ok(ScenarioResult::I2c {
        sent: section.payload.clone(),
        address: outcome.address,
        address_ack: outcome.address_ack,
        bytes_acked: outcome.bytes_acked(),
        received: receipt.data,
    })
}

fn run_pipeline(scenario: &ScenarioConfig) -> anyhow::Result<ScenarioResult> {
    let section = &scenario.pipeline;
    info!(
        capacity = section.capacity,
        items = section.items.len(),
        "pipeline scenario"
    );
    let pipeline = Pipeline::new(scenario.pipeline_config())?;
    let factor = section.factor;
    let (output, report) = pipeline.run_collect(section.items.clone(), |v: i64| v.saturating_mul(factor));
    info!(?output, peak_in_flight = report.peak_in_flight, "pipeline complete");
    Ok(ScenarioResult::Pipeline { output, report })
}

fn write_report(path: &Path, report: &RunReport) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create report dir {:?}", parent))?;
        }
    }
    let f = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report {:?}", path))?;
    serde_json::to_writer_pretty(f, report).context("Failed to write report JSON")?;
    info!("Report written to {:?}", path);
    Ok(())
}
