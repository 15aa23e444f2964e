//! Solarman Stick Poller CLI
//!
//! A command-line interface (CLI) application that reads a solar inverter
//! through a Solarman data-logger stick using Modbus-TCP.
//!
//! This tool allows users to:
//! - Read and display one decoded telemetry sample.
//! - Dump a raw block of holding registers.
//! - Run in a continuous daemon mode that polls the inverter and either prints
//!   every sample to the console or publishes it to an MQTT broker.
//!
//! The CLI leverages the `solarman_lib` crate for the protocol and client operations.

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use solarman_lib::{
    client::{ConnectionParameters, StickClient},
    protocol::{DataPoint, TelemetrySample, Value},
    report::{report_sample, Reporter},
    transport::Transport,
};
use std::io::{self, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::{panic, time::Duration};

mod commandline;
mod mqtt;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Prints every value as a `key value unit` row.
struct ConsoleReporter<W: Write> {
    out: W,
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    type Error = io::Error;

    fn report(&mut self, point: DataPoint, value: Value) -> Result<(), Self::Error> {
        writeln!(self.out, "{:<16} {:>10} {}", point.key(), value, point.unit())
    }
}

/// Runs one polling cycle. Returns the reported sample, or `None` if the cycle
/// failed with an error the next cycle may not see.
fn poll_once<T, R>(client: &mut StickClient<T>, reporter: &mut R) -> Result<Option<TelemetrySample>>
where
    T: Transport,
    R: Reporter,
    R::Error: std::fmt::Display,
{
    match client.fetch() {
        Ok(sample) => {
            info!("{sample}");
            if let Err(error) = report_sample(reporter, &sample) {
                warn!("Failed to report sample: {error}");
            }
            Ok(Some(sample))
        }
        Err(error) if error.is_transient() => {
            warn!("Failed to read logger: {error}");
            Ok(None)
        }
        Err(error) => Err(error).with_context(|| "Logger configuration error"),
    }
}

/// Polls until `running` is cleared or a fatal error occurs.
fn run_daemon<T, R>(
    client: &mut StickClient<T>,
    poll_interval: Duration,
    reporter: &mut R,
    running: &AtomicBool,
) -> Result<()>
where
    T: Transport,
    R: Reporter,
    R::Error: std::fmt::Display,
{
    while running.load(Ordering::SeqCst) {
        debug!("Daemon: Polling logger...");
        poll_once(client, reporter)?;
        if !running.load(Ordering::SeqCst) {
            break;
        }
        std::thread::sleep(poll_interval);
    }
    info!("Daemon stopped");
    Ok(())
}

fn print_registers<T: Transport>(client: &mut StickClient<T>, start: u16, count: u16) -> Result<()> {
    let block = client
        .read_register_block(start, count)
        .with_context(|| format!("Cannot read {count} registers at 0x{start:04X}"))?;
    println!("{:<8} {:>6} {:>6} {:>6}", "address", "hex", "u16", "i16");
    for (address, raw) in block.iter() {
        println!("0x{address:04X}   0x{raw:04X} {raw:>6} {:>6}", raw as i16);
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "Solarman stick CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    // 2. Validate the connection settings, an invalid configuration is fatal
    let mut params = ConnectionParameters::new(&args.host, args.port, args.unit_id)
        .and_then(|params| params.with_timeout(args.timeout))
        .with_context(|| format!("Solarman logger init failed for host '{}'", args.host))?;
    if let Some(serial) = args.serial {
        params = params.with_serial_hint(serial);
    }
    let mut client = StickClient::new(params);

    // 3. Execute the command
    match args.command {
        commandline::CliCommands::Daemon {
            poll_interval,
            output,
        } => {
            info!("Starting daemon mode: output={output:?}, interval={poll_interval:?}");
            let running = Arc::new(AtomicBool::new(true));
            let r = running.clone();
            ctrlc::set_handler(move || {
                r.store(false, Ordering::SeqCst);
                trace!("Received Ctrl-C");
            })
            .with_context(|| "Error setting Ctrl-C handler")?;

            match output {
                commandline::DaemonOutput::Console => {
                    let mut reporter = ConsoleReporter { out: io::stdout() };
                    run_daemon(&mut client, poll_interval, &mut reporter, &running)?;
                }
                commandline::DaemonOutput::Mqtt { config_file } => {
                    let config = mqtt::MqttConfig::load(&config_file)?;
                    let mut reporter = mqtt::MqttReporter::connect(config)?;
                    let result = run_daemon(&mut client, poll_interval, &mut reporter, &running);
                    reporter.disconnect()?;
                    result?;
                }
            }
        }
        commandline::CliCommands::Read { yaml } => {
            info!("Executing: Read Sample");
            let sample = client.fetch().with_context(|| "Cannot read logger")?;
            if yaml {
                print!(
                    "{}",
                    serde_yaml::to_string(&sample).with_context(|| "Cannot serialize sample")?
                );
            } else {
                let mut reporter = ConsoleReporter { out: io::stdout() };
                report_sample(&mut reporter, &sample).with_context(|| "Cannot print sample")?;
            }
        }
        commandline::CliCommands::ReadRegisters { start, count } => {
            info!("Executing: Read Registers 0x{start:04X}+{count}");
            print_registers(&mut client, start, count)?;
        }
    }

    Ok(())
}
