//! Client for an inverter behind a Solarman logger stick.
//!
//! A [`StickClient`] is created once from validated [`ConnectionParameters`]
//! and then polled with [`StickClient::fetch`]. Every fetch opens its own TCP
//! connection, reads the fixed register window and decodes it into a
//! [`TelemetrySample`].
//!
//! ## Example
//!
//! ```no_run
//! use solarman_lib::client::{ConnectionParameters, StickClient, UnitId};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = StickClient::initialize("192.168.1.50", 8899, UnitId::default(), None)?;
//!     let sample = client.fetch()?;
//!     println!("{sample}");
//!
//!     // Custom timeout
//!     let params = ConnectionParameters::new("192.168.1.50", 8899, UnitId::default())?
//!         .with_serial_hint(12345678)
//!         .with_timeout(std::time::Duration::from_secs(5))?;
//!     let mut client = StickClient::new(params);
//!
//!     let sample = client.fetch()?;
//!     println!("{sample}");
//!
//!     Ok(())
//! }
//! ```
use crate::{
    frame::{ReadHoldingRegisters, TransactionCounter},
    protocol::{RegisterBlock, TelemetrySample, REGISTER_WINDOW_QUANTITY, REGISTER_WINDOW_START},
    transport::{TcpTransport, Transport},
    Error, Result,
};
use log::*;
use std::{fmt, ops::Deref, time::Duration};

/// TCP port the logger stick listens on.
pub const DEFAULT_PORT: u16 = 8899;
/// Default connect and receive timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
/// Hosts must be shorter than this many bytes.
pub const HOST_MAX_LEN: usize = 64;

/// Modbus address of the inverter behind the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitId(u8);

impl UnitId {
    pub const fn new(id: u8) -> Self {
        Self(id)
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self(1)
    }
}

impl Deref for UnitId {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u8> for UnitId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where and how to reach the logger. Immutable once the client is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    host: String,
    port: u16,
    unit_id: UnitId,
    serial_hint: Option<u32>,
    timeout: Duration,
}

impl ConnectionParameters {
    /// Validates `host` and builds the parameters with the default timeout.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if `host` is empty, at least [`HOST_MAX_LEN`]
    /// bytes long or contains whitespace or control characters.
    pub fn new(host: &str, port: u16, unit_id: UnitId) -> Result<Self> {
        if host.is_empty() {
            return Err(Error::InvalidConfig("host is empty".into()));
        }
        if host.len() >= HOST_MAX_LEN {
            return Err(Error::InvalidConfig(format!(
                "host is {} bytes long, limit is {}",
                host.len(),
                HOST_MAX_LEN - 1
            )));
        }
        if host
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(Error::InvalidConfig(format!("host {host:?} is malformed")));
        }
        Ok(Self {
            host: host.to_owned(),
            port,
            unit_id,
            serial_hint: None,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Records the logger serial number. Informational only.
    pub fn with_serial_hint(mut self, serial: u32) -> Self {
        self.serial_hint = Some(serial);
        self
    }

    /// Sets the connect, send and receive timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(Error::InvalidConfig("timeout must not be zero".into()));
        }
        self.timeout = timeout;
        Ok(self)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub fn serial_hint(&self) -> Option<u32> {
        self.serial_hint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Handle to one logger, holding its parameters and the transaction counter.
///
/// Fetches take `&mut self` and are therefore serialized by the borrow checker.
/// Share a client between threads only behind a mutex around the whole fetch.
#[derive(Debug)]
pub struct StickClient<T = TcpTransport> {
    params: ConnectionParameters,
    transactions: TransactionCounter,
    transport: T,
}

impl StickClient<TcpTransport> {
    /// Validates the connection settings and creates a TCP client with the default timeout.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if the host is rejected by [`ConnectionParameters::new`].
    pub fn initialize(
        host: &str,
        port: u16,
        unit_id: UnitId,
        serial_hint: Option<u32>,
    ) -> Result<Self> {
        let mut params = ConnectionParameters::new(host, port, unit_id)?;
        if let Some(serial) = serial_hint {
            params = params.with_serial_hint(serial);
        }
        Ok(Self::new(params))
    }

    /// Creates a TCP client from already validated parameters.
    pub fn new(params: ConnectionParameters) -> Self {
        Self::with_transport(params, TcpTransport)
    }
}

impl<T: Transport> StickClient<T> {
    /// Creates a client using a custom transport.
    pub fn with_transport(params: ConnectionParameters, transport: T) -> Self {
        info!(
            "Solarman stick host={} port={} sn={} unit_id={}",
            params.host(),
            params.port(),
            params
                .serial_hint()
                .map_or_else(|| "-".to_string(), |sn| sn.to_string()),
            params.unit_id()
        );
        Self {
            params,
            transactions: TransactionCounter::default(),
            transport,
        }
    }

    /// Replaces the transaction counter, e.g. to continue a sequence.
    pub fn with_transaction_counter(mut self, transactions: TransactionCounter) -> Self {
        self.transactions = transactions;
        self
    }

    pub fn params(&self) -> &ConnectionParameters {
        &self.params
    }

    /// The transaction id the next request will carry.
    pub fn next_transaction_id(&self) -> u16 {
        self.transactions.peek()
    }

    /// Reads `quantity` holding registers starting at `start` in one exchange.
    ///
    /// # Errors
    ///
    /// Transport errors ([`Error::Connect`], [`Error::Send`], [`Error::Recv`]),
    /// response validation errors and [`Error::QuantityOutOfRange`].
    pub fn read_register_block(&mut self, start: u16, quantity: u16) -> Result<RegisterBlock> {
        let request = ReadHoldingRegisters::new(
            &mut self.transactions,
            *self.params.unit_id(),
            start,
            quantity,
        )?;
        debug!(
            "Reading {quantity} registers at 0x{start:04X} from unit {} (transaction {})",
            self.params.unit_id(),
            request.transaction_id
        );
        let response = self.transport.exchange(&self.params, &request.encode())?;
        request.decode_response(&response)
    }

    /// Performs one polling cycle and returns the decoded sample.
    ///
    /// Nothing is retried; the first failure of transport, validation or
    /// decoding is returned and no sample is produced.
    pub fn fetch(&mut self) -> Result<TelemetrySample> {
        let block = self.read_register_block(REGISTER_WINDOW_START, REGISTER_WINDOW_QUANTITY)?;
        TelemetrySample::decode_from_holding_registers(&block)
    }
}
