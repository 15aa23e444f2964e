//! Framing of a single Modbus-TCP read-holding-registers exchange.
//!
//! A request is always [`REQUEST_LEN`] bytes:
//!
//! | offset | size | content                         |
//! |--------|------|---------------------------------|
//! | 0      | 2    | transaction id (big-endian)     |
//! | 2      | 2    | protocol id, always 0           |
//! | 4      | 2    | length of the remaining bytes, 6|
//! | 6      | 1    | unit id                         |
//! | 7      | 1    | function code 0x03              |
//! | 8      | 2    | start address (big-endian)      |
//! | 10     | 2    | register quantity (big-endian)  |
//!
//! The response repeats the 7 byte header, followed by the function code, a
//! byte count and the register payload.
use crate::{protocol::RegisterBlock, Error, Result};
use log::*;

/// Modbus function code of read holding registers.
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
/// Size of a read holding registers request frame.
pub const REQUEST_LEN: usize = 12;
/// Size of the header, unit id, function code and byte count of a response.
pub const RESPONSE_HEADER_LEN: usize = 9;
/// Largest possible Modbus-TCP frame.
pub const MAX_FRAME_LEN: usize = 260;
/// Largest register quantity a response byte count can describe.
pub const MAX_READ_QUANTITY: u16 = 125;

const PROTOCOL_ID: u16 = 0;
const REQUEST_TAIL_LEN: u16 = 6;
const MBAP_PREFIX_LEN: usize = 6;
const EXCEPTION_FLAG: u8 = 0x80;

/// Source of transaction ids, incremented per request and wrapping at `u16::MAX`.
#[derive(Debug, Clone)]
pub struct TransactionCounter {
    next: u16,
}

impl Default for TransactionCounter {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl TransactionCounter {
    pub fn starting_at(next: u16) -> Self {
        Self { next }
    }

    /// Returns the id for the next request and advances the counter.
    pub fn next_id(&mut self) -> u16 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }

    /// The id the next request will get.
    pub fn peek(&self) -> u16 {
        self.next
    }
}

/// A read holding registers request together with what its response must look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadHoldingRegisters {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub start: u16,
    pub quantity: u16,
}

impl ReadHoldingRegisters {
    /// Allocates a transaction id from `counter` for a new request.
    ///
    /// # Errors
    ///
    /// [`Error::QuantityOutOfRange`] if `quantity` is not in `1..=125`.
    pub fn new(
        counter: &mut TransactionCounter,
        unit_id: u8,
        start: u16,
        quantity: u16,
    ) -> Result<Self> {
        if !(1..=MAX_READ_QUANTITY).contains(&quantity) {
            return Err(Error::QuantityOutOfRange(quantity));
        }
        Ok(Self {
            transaction_id: counter.next_id(),
            unit_id,
            start,
            quantity,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(REQUEST_LEN);
        frame.extend_from_slice(&self.transaction_id.to_be_bytes());
        frame.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
        frame.extend_from_slice(&REQUEST_TAIL_LEN.to_be_bytes());
        frame.push(self.unit_id);
        frame.push(READ_HOLDING_REGISTERS);
        frame.extend_from_slice(&self.start.to_be_bytes());
        frame.extend_from_slice(&self.quantity.to_be_bytes());
        frame
    }

    /// Number of payload bytes the response must announce.
    pub fn expected_byte_count(&self) -> usize {
        self.quantity as usize * 2
    }

    /// Validates `response` against this request and extracts the registers.
    ///
    /// The checks run in order and stop at the first failure: minimum length,
    /// function code, byte count. A different transaction id is only logged.
    pub fn decode_response(&self, response: &[u8]) -> Result<RegisterBlock> {
        if response.len() < RESPONSE_HEADER_LEN {
            return Err(Error::ShortResponse(response.len()));
        }

        let transaction_id = u16::from_be_bytes([response[0], response[1]]);
        if transaction_id != self.transaction_id {
            warn!(
                "Response transaction id {transaction_id} does not match request {}, accepting",
                self.transaction_id
            );
        }

        let function_code = response[7];
        if function_code != READ_HOLDING_REGISTERS {
            if function_code & EXCEPTION_FLAG != 0 {
                debug!(
                    "Modbus exception response 0x{function_code:02X}, exception code 0x{:02X}",
                    response[8]
                );
            }
            return Err(Error::UnexpectedFunctionCode(function_code));
        }

        let byte_count = response[8];
        let expected = self.expected_byte_count();
        if byte_count as usize != expected
            || response.len() < RESPONSE_HEADER_LEN + byte_count as usize
        {
            return Err(Error::PayloadSizeMismatch {
                byte_count,
                expected,
                received: response.len(),
            });
        }

        let registers = response[RESPONSE_HEADER_LEN..RESPONSE_HEADER_LEN + expected]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Ok(RegisterBlock::new(self.start, registers))
    }
}

/// Total frame length announced by the header in `buf`, once enough of it is present.
pub fn announced_frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < MBAP_PREFIX_LEN {
        return None;
    }
    Some(MBAP_PREFIX_LEN + u16::from_be_bytes([buf[4], buf[5]]) as usize)
}

/// Builds a well-formed response frame. Meant for tests and simulated peers.
///
/// # Panics
///
/// Panics if `registers` holds more than [`MAX_READ_QUANTITY`] values, the
/// byte count would not fit its one-byte field.
pub fn encode_response(transaction_id: u16, unit_id: u8, registers: &[u16]) -> Vec<u8> {
    assert!(
        registers.len() <= MAX_READ_QUANTITY as usize,
        "{} registers exceed a single response",
        registers.len()
    );
    let byte_count = registers.len() * 2;
    let mut frame = Vec::with_capacity(RESPONSE_HEADER_LEN + byte_count);
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
    frame.extend_from_slice(&((byte_count + 3) as u16).to_be_bytes());
    frame.push(unit_id);
    frame.push(READ_HOLDING_REGISTERS);
    frame.push(byte_count as u8);
    for register in registers {
        frame.extend_from_slice(&register.to_be_bytes());
    }
    frame
}
