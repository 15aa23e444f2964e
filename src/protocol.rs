//! Register layout of the inverter behind the logger stick and the decoding of a
//! fetched register block into a [`TelemetrySample`].
//!
//! Every value is read from one fixed window of holding registers
//! ([`REGISTER_WINDOW_START`], [`REGISTER_WINDOW_QUANTITY`]). The
//! [`REGISTER_MAP`] assigns each logical field its absolute register address and
//! a [`Decode`] rule. Fields whose address is not covered by a fetched block
//! decode from the raw value [`UNAVAILABLE_RAW`] instead of failing the sample.
use crate::{Error, Result};
use log::*;
use std::fmt;

/// First holding register of the window fetched on every poll.
pub const REGISTER_WINDOW_START: u16 = 0x0200;
/// Number of holding registers fetched on every poll.
pub const REGISTER_WINDOW_QUANTITY: u16 = 0x0058;

/// Raw value used for a field whose register lies outside the fetched block.
pub const UNAVAILABLE_RAW: u16 = 0;

/// A contiguous run of raw holding registers anchored at a start address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBlock {
    start: u16,
    registers: Vec<u16>,
}

impl RegisterBlock {
    pub fn new(start: u16, registers: Vec<u16>) -> Self {
        Self { start, registers }
    }

    /// Address of the first register.
    pub fn start(&self) -> u16 {
        self.start
    }

    /// Exclusive end address of the block.
    pub fn end(&self) -> u32 {
        self.start as u32 + self.registers.len() as u32
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn registers(&self) -> &[u16] {
        &self.registers
    }

    /// Returns the raw value at the absolute `address`, or `None` if the block does not cover it.
    pub fn get(&self, address: u16) -> Option<u16> {
        let offset = address.checked_sub(self.start)?;
        self.registers.get(offset as usize).copied()
    }

    /// Iterates over `(address, raw value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u16)> + '_ {
        self.registers
            .iter()
            .enumerate()
            .map(move |(offset, value)| (self.start as u32 + offset as u32, *value))
    }
}

/// Logical telemetry fields with the stable identifiers used by the reporting sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataPoint {
    InverterStatus = 1,
    GridVoltage = 2,
    GridFrequency = 3,
    ActivePower = 4,
    DailyYield = 5,
    TotalYield = 6,
    Pv1Voltage = 7,
    Pv1Current = 8,
    Pv2Voltage = 9,
    Pv2Current = 10,
    HeatsinkTemperature = 11,
    LoggerSignal = 12,
}

impl DataPoint {
    /// All data points in identifier order.
    pub const ALL: [DataPoint; 12] = [
        DataPoint::InverterStatus,
        DataPoint::GridVoltage,
        DataPoint::GridFrequency,
        DataPoint::ActivePower,
        DataPoint::DailyYield,
        DataPoint::TotalYield,
        DataPoint::Pv1Voltage,
        DataPoint::Pv1Current,
        DataPoint::Pv2Voltage,
        DataPoint::Pv2Current,
        DataPoint::HeatsinkTemperature,
        DataPoint::LoggerSignal,
    ];

    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn key(&self) -> &'static str {
        match self {
            DataPoint::InverterStatus => "inv_status",
            DataPoint::GridVoltage => "grid_voltage",
            DataPoint::GridFrequency => "grid_frequency",
            DataPoint::ActivePower => "active_power",
            DataPoint::DailyYield => "daily_yield",
            DataPoint::TotalYield => "total_yield",
            DataPoint::Pv1Voltage => "pv1_voltage",
            DataPoint::Pv1Current => "pv1_current",
            DataPoint::Pv2Voltage => "pv2_voltage",
            DataPoint::Pv2Current => "pv2_current",
            DataPoint::HeatsinkTemperature => "heatsink_temp",
            DataPoint::LoggerSignal => "logger_rssi",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            DataPoint::InverterStatus => "state",
            DataPoint::GridVoltage | DataPoint::Pv1Voltage | DataPoint::Pv2Voltage => "V",
            DataPoint::GridFrequency => "Hz",
            DataPoint::ActivePower => "W",
            DataPoint::DailyYield | DataPoint::TotalYield => "kWh",
            DataPoint::Pv1Current | DataPoint::Pv2Current => "A",
            DataPoint::HeatsinkTemperature => "°C",
            DataPoint::LoggerSignal => "dBm",
        }
    }
}

impl fmt::Display for DataPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// How a raw register is turned into a physical value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decode {
    /// Nonzero means `true`.
    Bool,
    /// Unsigned raw value divided by the factor.
    UnsignedScaled(f32),
    /// Two's-complement raw value divided by the factor.
    SignedScaled(f32),
}

impl Decode {
    pub fn apply(&self, raw: u16) -> Value {
        match *self {
            Decode::Bool => Value::Bool(raw != 0),
            Decode::UnsignedScaled(factor) => Value::Float(raw as f32 / factor),
            Decode::SignedScaled(factor) => Value::Float(raw as i16 as f32 / factor),
        }
    }
}

/// A decoded telemetry value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    Float(f32),
    Int(i32),
}

impl Value {
    pub fn as_bool(&self) -> bool {
        match *self {
            Value::Bool(value) => value,
            Value::Float(value) => value != 0.0,
            Value::Int(value) => value != 0,
        }
    }

    pub fn as_f32(&self) -> f32 {
        match *self {
            Value::Bool(value) => value as u8 as f32,
            Value::Float(value) => value,
            Value::Int(value) => value as f32,
        }
    }

    /// Truncates floating values towards zero.
    pub fn as_i32(&self) -> i32 {
        match *self {
            Value::Bool(value) => value as i32,
            Value::Float(value) => value as i32,
            Value::Int(value) => value,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(value) => write!(f, "{}", if *value { "on" } else { "off" }),
            Value::Float(value) => write!(f, "{value:.2}"),
            Value::Int(value) => write!(f, "{value}"),
        }
    }
}

/// Register address and decode rule of one telemetry field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterField {
    pub point: DataPoint,
    pub address: u16,
    pub decode: Decode,
}

impl RegisterField {
    const fn new(point: DataPoint, address: u16, decode: Decode) -> Self {
        Self {
            point,
            address,
            decode,
        }
    }
}

/// Register layout of the logger. Must stay inside the fetched window.
pub const REGISTER_MAP: [RegisterField; 12] = [
    RegisterField::new(DataPoint::InverterStatus, 0x0200, Decode::Bool),
    RegisterField::new(DataPoint::Pv1Voltage, 0x0201, Decode::UnsignedScaled(10.0)),
    RegisterField::new(DataPoint::Pv1Current, 0x0202, Decode::UnsignedScaled(10.0)),
    RegisterField::new(DataPoint::Pv2Voltage, 0x0203, Decode::UnsignedScaled(10.0)),
    RegisterField::new(DataPoint::Pv2Current, 0x0204, Decode::UnsignedScaled(10.0)),
    RegisterField::new(DataPoint::GridVoltage, 0x021E, Decode::UnsignedScaled(10.0)),
    RegisterField::new(DataPoint::GridFrequency, 0x021F, Decode::UnsignedScaled(100.0)),
    RegisterField::new(DataPoint::ActivePower, 0x0221, Decode::SignedScaled(1.0)),
    RegisterField::new(DataPoint::DailyYield, 0x023A, Decode::UnsignedScaled(10.0)),
    RegisterField::new(DataPoint::TotalYield, 0x023B, Decode::UnsignedScaled(10.0)),
    RegisterField::new(DataPoint::HeatsinkTemperature, 0x0246, Decode::SignedScaled(10.0)),
    RegisterField::new(DataPoint::LoggerSignal, 0x0257, Decode::SignedScaled(1.0)),
];

const fn highest_address(map: &[RegisterField]) -> u16 {
    let mut highest = 0;
    let mut i = 0;
    while i < map.len() {
        if map[i].address > highest {
            highest = map[i].address;
        }
        i += 1;
    }
    highest
}

/// Highest register address referenced by [`REGISTER_MAP`].
pub const HIGHEST_MAPPED_ADDRESS: u16 = highest_address(&REGISTER_MAP);

/// Fails with [`Error::MapOutOfRange`] if a window of `quantity` registers at
/// `start` does not reach the highest mapped address.
pub fn check_register_window(start: u16, quantity: usize) -> Result<()> {
    let window_end = start as u32 + quantity as u32;
    if window_end <= HIGHEST_MAPPED_ADDRESS as u32 {
        return Err(Error::MapOutOfRange {
            highest: HIGHEST_MAPPED_ADDRESS,
            window_end,
        });
    }
    Ok(())
}

/// One decoded reading of the inverter.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TelemetrySample {
    pub inverter_on: bool,
    /// Volt
    pub grid_voltage: f32,
    /// Hertz
    pub grid_frequency: f32,
    /// Watt, negative while importing
    pub active_power: f32,
    /// kWh
    pub daily_yield: f32,
    /// kWh
    pub total_yield: f32,
    pub pv1_voltage: f32,
    pub pv1_current: f32,
    pub pv2_voltage: f32,
    pub pv2_current: f32,
    /// °C
    pub heatsink_temp: f32,
    /// dBm
    pub logger_rssi: i32,
}

impl TelemetrySample {
    /// Decodes a fetched block through [`REGISTER_MAP`].
    ///
    /// Either every field is populated or an error is returned. Fields outside
    /// the block decode from [`UNAVAILABLE_RAW`].
    ///
    /// # Errors
    ///
    /// [`Error::MapOutOfRange`] if the block does not reach [`HIGHEST_MAPPED_ADDRESS`].
    pub fn decode_from_holding_registers(block: &RegisterBlock) -> Result<Self> {
        check_register_window(block.start(), block.len())?;

        let mut sample = Self::default();
        for field in REGISTER_MAP.iter() {
            let raw = block.get(field.address).unwrap_or_else(|| {
                trace!(
                    "Register 0x{:04X} of {} outside fetched block, using {}",
                    field.address,
                    field.point,
                    UNAVAILABLE_RAW
                );
                UNAVAILABLE_RAW
            });
            sample.set(field.point, field.decode.apply(raw));
        }
        Ok(sample)
    }

    /// Stores `value` in the field identified by `point`.
    pub fn set(&mut self, point: DataPoint, value: Value) {
        match point {
            DataPoint::InverterStatus => self.inverter_on = value.as_bool(),
            DataPoint::GridVoltage => self.grid_voltage = value.as_f32(),
            DataPoint::GridFrequency => self.grid_frequency = value.as_f32(),
            DataPoint::ActivePower => self.active_power = value.as_f32(),
            DataPoint::DailyYield => self.daily_yield = value.as_f32(),
            DataPoint::TotalYield => self.total_yield = value.as_f32(),
            DataPoint::Pv1Voltage => self.pv1_voltage = value.as_f32(),
            DataPoint::Pv1Current => self.pv1_current = value.as_f32(),
            DataPoint::Pv2Voltage => self.pv2_voltage = value.as_f32(),
            DataPoint::Pv2Current => self.pv2_current = value.as_f32(),
            DataPoint::HeatsinkTemperature => self.heatsink_temp = value.as_f32(),
            DataPoint::LoggerSignal => self.logger_rssi = value.as_i32(),
        }
    }

    /// Returns the value of the field identified by `point`.
    pub fn get(&self, point: DataPoint) -> Value {
        match point {
            DataPoint::InverterStatus => Value::Bool(self.inverter_on),
            DataPoint::GridVoltage => Value::Float(self.grid_voltage),
            DataPoint::GridFrequency => Value::Float(self.grid_frequency),
            DataPoint::ActivePower => Value::Float(self.active_power),
            DataPoint::DailyYield => Value::Float(self.daily_yield),
            DataPoint::TotalYield => Value::Float(self.total_yield),
            DataPoint::Pv1Voltage => Value::Float(self.pv1_voltage),
            DataPoint::Pv1Current => Value::Float(self.pv1_current),
            DataPoint::Pv2Voltage => Value::Float(self.pv2_voltage),
            DataPoint::Pv2Current => Value::Float(self.pv2_current),
            DataPoint::HeatsinkTemperature => Value::Float(self.heatsink_temp),
            DataPoint::LoggerSignal => Value::Int(self.logger_rssi),
        }
    }

    /// All twelve values in data point identifier order.
    pub fn values(&self) -> impl Iterator<Item = (DataPoint, Value)> + '_ {
        DataPoint::ALL
            .iter()
            .map(move |point| (*point, self.get(*point)))
    }
}

impl fmt::Display for TelemetrySample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Grid {:.1} V {:.1} Hz, AC {:.0} W, PV1 {:.1}/{:.1}, PV2 {:.1}/{:.1}",
            self.grid_voltage,
            self.grid_frequency,
            self.active_power,
            self.pv1_voltage,
            self.pv1_current,
            self.pv2_voltage,
            self.pv2_current
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashSet;

    fn window_with(values: &[(u16, u16)]) -> RegisterBlock {
        let mut registers = vec![0; REGISTER_WINDOW_QUANTITY as usize];
        for (address, raw) in values {
            registers[(address - REGISTER_WINDOW_START) as usize] = *raw;
        }
        RegisterBlock::new(REGISTER_WINDOW_START, registers)
    }

    fn address_of(point: DataPoint) -> u16 {
        REGISTER_MAP
            .iter()
            .find(|field| field.point == point)
            .map(|field| field.address)
            .unwrap()
    }

    #[test]
    fn register_map_is_consistent() {
        let addresses: HashSet<u16> = REGISTER_MAP.iter().map(|field| field.address).collect();
        assert_eq!(addresses.len(), REGISTER_MAP.len());

        let points: HashSet<DataPoint> = REGISTER_MAP.iter().map(|field| field.point).collect();
        assert_eq!(points.len(), DataPoint::ALL.len());

        assert_eq!(HIGHEST_MAPPED_ADDRESS, 0x0257);
        assert!(
            check_register_window(REGISTER_WINDOW_START, REGISTER_WINDOW_QUANTITY as usize).is_ok()
        );
    }

    #[test]
    fn window_too_small() {
        assert_matches!(
            check_register_window(REGISTER_WINDOW_START, 0x0057),
            Err(Error::MapOutOfRange {
                highest: 0x0257,
                window_end: 0x0257
            })
        );
        let block = RegisterBlock::new(REGISTER_WINDOW_START, vec![1; 0x20]);
        assert_matches!(
            TelemetrySample::decode_from_holding_registers(&block),
            Err(Error::MapOutOfRange { .. })
        );
    }

    #[test]
    fn block_lookup() {
        let block = RegisterBlock::new(0x0100, vec![10, 20, 30]);
        assert_eq!(block.get(0x00FF), None);
        assert_eq!(block.get(0x0100), Some(10));
        assert_eq!(block.get(0x0102), Some(30));
        assert_eq!(block.get(0x0103), None);
        assert_eq!(block.end(), 0x0103);
        assert_eq!(
            block.iter().collect::<Vec<_>>(),
            vec![(0x0100, 10), (0x0101, 20), (0x0102, 30)]
        );
    }

    #[test]
    fn decode_rules() {
        assert_eq!(Decode::Bool.apply(0), Value::Bool(false));
        assert_eq!(Decode::Bool.apply(1), Value::Bool(true));
        assert_eq!(Decode::Bool.apply(0x8000), Value::Bool(true));
        assert_eq!(Decode::UnsignedScaled(10.0).apply(2345), Value::Float(234.5));
        assert_eq!(Decode::UnsignedScaled(10.0).apply(0xFFFF), Value::Float(6553.5));
        assert_eq!(Decode::SignedScaled(1.0).apply(0xFFFF), Value::Float(-1.0));
        assert_eq!(Decode::SignedScaled(10.0).apply(0xFFFF), Value::Float(-0.1));
        assert_eq!(Decode::SignedScaled(1.0).apply(0x8000), Value::Float(-32768.0));
    }

    #[test]
    fn decode_scaled_values() {
        let block = window_with(&[
            (address_of(DataPoint::InverterStatus), 1),
            (address_of(DataPoint::GridVoltage), 2345),
            (address_of(DataPoint::GridFrequency), 5002),
            (address_of(DataPoint::ActivePower), 1500),
            (address_of(DataPoint::DailyYield), 123),
            (address_of(DataPoint::TotalYield), 45678),
            (address_of(DataPoint::Pv1Voltage), 3105),
            (address_of(DataPoint::Pv1Current), 52),
            (address_of(DataPoint::Pv2Voltage), 2987),
            (address_of(DataPoint::Pv2Current), 48),
            (address_of(DataPoint::HeatsinkTemperature), 415),
            (address_of(DataPoint::LoggerSignal), (-67i16) as u16),
        ]);
        let sample = TelemetrySample::decode_from_holding_registers(&block).unwrap();
        assert_eq!(
            sample,
            TelemetrySample {
                inverter_on: true,
                grid_voltage: 234.5,
                grid_frequency: 50.02,
                active_power: 1500.0,
                daily_yield: 12.3,
                total_yield: 4567.8,
                pv1_voltage: 310.5,
                pv1_current: 5.2,
                pv2_voltage: 298.7,
                pv2_current: 4.8,
                heatsink_temp: 41.5,
                logger_rssi: -67,
            }
        );
    }

    #[test]
    fn decode_signed_values() {
        let block = window_with(&[
            (address_of(DataPoint::ActivePower), 0xFFFF),
            (address_of(DataPoint::HeatsinkTemperature), 0xFFFF),
            (address_of(DataPoint::LoggerSignal), 0xFFFF),
        ]);
        let sample = TelemetrySample::decode_from_holding_registers(&block).unwrap();
        assert_eq!(sample.active_power, -1.0);
        assert_eq!(sample.heatsink_temp, -0.1);
        assert_eq!(sample.logger_rssi, -1);
        assert!(!sample.inverter_on);
    }

    #[test]
    fn decode_status_flag() {
        let status = address_of(DataPoint::InverterStatus);
        for raw in [1, 2, 0x00FF, 0xFFFF] {
            let sample =
                TelemetrySample::decode_from_holding_registers(&window_with(&[(status, raw)]))
                    .unwrap();
            assert!(sample.inverter_on, "raw {raw}");
        }
        let sample =
            TelemetrySample::decode_from_holding_registers(&window_with(&[(status, 0)])).unwrap();
        assert!(!sample.inverter_on);
    }

    #[test]
    fn fields_outside_block_decode_as_unavailable() {
        // Starts above the status and PV registers but still reaches the highest address.
        let start = 0x0210;
        let mut registers = vec![0; (HIGHEST_MAPPED_ADDRESS - start + 1) as usize];
        registers[(address_of(DataPoint::GridVoltage) - start) as usize] = 2300;
        registers[(address_of(DataPoint::LoggerSignal) - start) as usize] = (-70i16) as u16;
        let block = RegisterBlock::new(start, registers);
        assert_eq!(block.get(address_of(DataPoint::InverterStatus)), None);

        let sample = TelemetrySample::decode_from_holding_registers(&block).unwrap();
        assert!(!sample.inverter_on);
        assert_eq!(sample.pv1_voltage, 0.0);
        assert_eq!(sample.pv2_current, 0.0);
        assert_eq!(sample.grid_voltage, 230.0);
        assert_eq!(sample.logger_rssi, -70);
    }

    #[test]
    fn values_in_identifier_order() {
        let sample = TelemetrySample {
            inverter_on: true,
            grid_voltage: 230.0,
            logger_rssi: -60,
            ..Default::default()
        };
        let values: Vec<_> = sample.values().collect();
        assert_eq!(values.len(), 12);
        for (index, (point, _)) in values.iter().enumerate() {
            assert_eq!(point.id() as usize, index + 1);
        }
        assert_eq!(values[0], (DataPoint::InverterStatus, Value::Bool(true)));
        assert_eq!(values[1], (DataPoint::GridVoltage, Value::Float(230.0)));
        assert_eq!(values[11], (DataPoint::LoggerSignal, Value::Int(-60)));
    }

    #[test]
    fn set_and_get_agree() {
        let mut sample = TelemetrySample::default();
        for point in DataPoint::ALL {
            sample.set(point, Value::Int(3));
        }
        assert!(sample.inverter_on);
        assert_eq!(sample.get(DataPoint::HeatsinkTemperature), Value::Float(3.0));
        assert_eq!(sample.get(DataPoint::LoggerSignal), Value::Int(3));
    }

    #[test]
    fn data_point_descriptors() {
        assert_eq!(DataPoint::GridVoltage.key(), "grid_voltage");
        assert_eq!(DataPoint::GridVoltage.unit(), "V");
        assert_eq!(DataPoint::HeatsinkTemperature.unit(), "°C");
        assert_eq!(DataPoint::LoggerSignal.to_string(), "logger_rssi");
        assert_eq!(Value::Float(230.0).to_string(), "230.00");
        assert_eq!(Value::Bool(false).to_string(), "off");
    }
}
