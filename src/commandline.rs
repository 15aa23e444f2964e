use crate::mqtt::MqttConfig;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use solarman_lib::client::{UnitId, DEFAULT_PORT};
use std::time::Duration;

fn parse_unit_id(s: &str) -> Result<UnitId, String> {
    let id = clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid unit id format: {e}"))?;
    Ok(UnitId::new(id))
}

fn parse_register_address(s: &str) -> Result<u16, String> {
    clap_num::maybe_hex::<u16>(s).map_err(|e| format!("Invalid register address format: {e}"))
}

fn parse_register_quantity(s: &str) -> Result<u16, String> {
    clap_num::number_range(s, 1, solarman_lib::frame::MAX_READ_QUANTITY)
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously read the inverter and print every sample to the standard output (console).
    Console,
    /// Continuously read the inverter and publish every value to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Run in daemon mode: poll the inverter at a fixed interval.
    /// A failed poll is logged and the next poll proceeds as scheduled.
    /// Output can be directed to stdout or an MQTT broker.
    #[clap(verbatim_doc_comment)]
    Daemon {
        /// Interval between two polls (e.g., "5s", "1m")
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "5sec", verbatim_doc_comment)]
        poll_interval: Duration,

        /// Specifies the output.
        #[command(subcommand)]
        output: DaemonOutput,
    },

    /// Read and display one telemetry sample.
    Read {
        /// Print the sample as YAML instead of a table.
        #[arg(long)]
        yaml: bool,
    },

    /// Read and display a raw block of holding registers.
    /// Useful to check the register map against the inverter firmware.
    #[clap(verbatim_doc_comment)]
    ReadRegisters {
        /// First register address.
        /// Can be specified in decimal or hexadecimal (e.g., "512" or "0x200").
        #[arg(value_parser = parse_register_address, verbatim_doc_comment)]
        start: u16,
        /// Number of registers (1 to 125).
        #[arg(value_parser = parse_register_quantity)]
        count: u16,
    },
}

const fn about_text() -> &'static str {
    "Solarman stick poller - Read inverter telemetry through a Solarman data-logger via Modbus-TCP."
}

#[derive(Parser, Debug)]
#[command(name="invpoll", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warn.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// The IP address or hostname of the logger stick.
    /// Example: "192.168.1.50" or "solarman.local".
    #[clap(verbatim_doc_comment)]
    pub host: String,

    /// TCP port of the logger stick.
    #[arg(global = true, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Modbus unit id of the inverter behind the logger.
    /// Can be specified in decimal or hexadecimal (e.g., "1" or "0x01").
    #[arg(global = true, short, long, default_value_t = UnitId::default(), value_parser = parse_unit_id, verbatim_doc_comment)]
    pub unit_id: UnitId,

    /// Serial number of the logger stick. Only logged.
    #[arg(global = true, short, long)]
    pub serial: Option<u32>,

    /// Connect and receive timeout of every poll.
    /// Examples: "3s", "500ms".
    #[arg(global = true, long, default_value = "3s", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Duration,

    /// Specifies the command to execute.
    #[command(subcommand)]
    pub command: CliCommands,
}
