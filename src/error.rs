//! Error types shared by every layer of the logger client.
//!
//! The variants fall into three groups: transport failures (`Connect`, `Send`,
//! `Recv`), protocol validation failures (`ShortResponse`,
//! `UnexpectedFunctionCode`, `PayloadSizeMismatch`) and configuration
//! failures (`InvalidConfig`, `QuantityOutOfRange`, `MapOutOfRange`).
use std::io;

/// Represents all possible errors of a fetch or initialization.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The connection parameters were rejected.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation, address resolution or connect failed.
    #[error("Cannot connect to {address}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The request could not be written completely.
    #[error("Cannot send request")]
    Send(#[source] io::Error),

    /// The peer closed the connection, timed out or the read failed.
    #[error("Cannot receive response")]
    Recv(#[source] io::Error),

    /// The response is shorter than the fixed header.
    #[error("Short response ({0} bytes)")]
    ShortResponse(usize),

    /// The response carries another function code, e.g. a Modbus exception.
    #[error("Unexpected function code 0x{0:02X}")]
    UnexpectedFunctionCode(u8),

    /// The declared byte count does not match the request or the received length.
    #[error("Unexpected payload size {byte_count} (wanted {expected}, received {received} bytes)")]
    PayloadSizeMismatch {
        byte_count: u8,
        expected: usize,
        received: usize,
    },

    /// The register count of a read request is outside `1..=125`.
    #[error("Register quantity {0} out of range")]
    QuantityOutOfRange(u16),

    /// The fetched register window does not reach every address of the register map.
    #[error("Register window ends at 0x{window_end:04X} but the register map needs 0x{highest:04X}")]
    MapOutOfRange { highest: u16, window_end: u32 },
}

impl Error {
    /// Returns `true` if the next polling cycle may succeed without a configuration change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Connect { .. }
                | Error::Send(_)
                | Error::Recv(_)
                | Error::ShortResponse(_)
                | Error::UnexpectedFunctionCode(_)
                | Error::PayloadSizeMismatch { .. }
        )
    }
}

/// The result type of the logger client.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Recv(io::ErrorKind::TimedOut.into()).is_transient());
        assert!(Error::ShortResponse(3).is_transient());
        assert!(Error::UnexpectedFunctionCode(0x83).is_transient());
        assert!(!Error::InvalidConfig("empty host".into()).is_transient());
        assert!(!Error::QuantityOutOfRange(0).is_transient());
        assert!(!Error::MapOutOfRange {
            highest: 0x0257,
            window_end: 0x0250
        }
        .is_transient());
    }

    #[test]
    fn display() {
        assert_eq!(
            Error::UnexpectedFunctionCode(0x83).to_string(),
            "Unexpected function code 0x83"
        );
        assert_eq!(
            Error::MapOutOfRange {
                highest: 0x0257,
                window_end: 0x0250
            }
            .to_string(),
            "Register window ends at 0x0250 but the register map needs 0x0257"
        );
    }
}
