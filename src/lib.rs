//! A library for polling a solar inverter through a Solarman logger stick via Modbus-TCP.
//!
//! The logger forwards Modbus-TCP requests to the inverter behind it. This crate
//! reads one fixed block of holding registers per poll and decodes it into a
//! [`protocol::TelemetrySample`] with scaled, correctly signed physical values.
//!
//! ## Features
//!
//! - **Frame Codec**: Builds read-holding-registers requests and validates untrusted responses byte by byte. See [`frame`].
//! - **Register Map**: One table maps every telemetry field to its register and decode rule. See [`protocol::REGISTER_MAP`].
//! - **Lenient Decoding**: Fields outside the fetched block decode as unavailable instead of failing the sample.
//! - **Single-Use Connections**: Every poll opens, uses and closes its own TCP connection with bounded timeouts. See [`transport`].
//! - **Reporting Interface**: A small sink trait for forwarding samples to a cloud service. See [`report`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use solarman_lib::client::{StickClient, UnitId, DEFAULT_PORT};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = StickClient::initialize("192.168.1.50", DEFAULT_PORT, UnitId::default(), None)?;
//!
//!     let sample = client.fetch()?;
//!     println!("Grid voltage: {} V, active power: {} W", sample.grid_voltage, sample.active_power);
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod frame;
pub mod protocol;
pub mod report;
pub mod transport;

mod error;
pub use error::{Error, Result};
