#![allow(clippy::excessive_precision)]

//! Per-physical-module state: last-synchronized telemetry plus running
//! min/max watermarks.
//!
//! A record starts unassigned (address 0, watermarks at sentinel extremes),
//! is populated once per polling sweep, and keeps its watermarks for the
//! controller's runtime lifetime; only an explicit operator action resets
//! them.

use log::debug;

use crate::bus::{BusError, ModuleBus, SerialLink, registers};

/// Cell channels per module.
pub const CELLS_PER_MODULE: usize = 6;

/// Readings at or above this are a disconnected or garbage channel.
const IMPLAUSIBLE_CELL_V: f32 = 60.0;

/// Volts per count of the GPAI (module voltage) channel.
const GPAI_VOLT_SCALE: f32 = 0.0020346293922562;
/// Volts per count of a cell voltage channel.
const CELL_VOLT_SCALE: f32 = 0.000381493;

// Steinhart-Hart inverse coefficients shared by both thermistor channels.
const STEINHART_A: f32 = 0.0007610373573;
const STEINHART_B: f32 = 0.0002728524832;
const STEINHART_C: f32 = 0.0000001022822735;

// The two sensor channels carry slightly different calibration pre-scales.
// Kept as measured on the module hardware; do not unify.
const SENSOR_PRESCALE: [(f32, f32); 2] = [(2.0, 33046.0), (9.0, 33068.0)];

// Watermark sentinels; widened on the first real reading.
const LOW_CELL_SENTINEL: f32 = 5.0;
const HIGH_CELL_SENTINEL: f32 = 0.0;
const LOW_TEMP_SENTINEL: f32 = 200.0;
const HIGH_TEMP_SENTINEL: f32 = -100.0;
const LOW_VOLT_SENTINEL: f32 = 200.0;
const HIGH_VOLT_SENTINEL: f32 = 0.0;

/// Module fault status bits with console labels.
pub const FAULT_LABELS: [(u8, &str); 6] = [
    (0x01, "cell overvoltage"),
    (0x02, "cell undervoltage"),
    (0x04, "crc error in received packet"),
    (0x08, "power-on reset occurred"),
    (0x10, "test fault active"),
    (0x20, "internal registers inconsistent"),
];

/// Module alert status bits with console labels.
pub const ALERT_LABELS: [(u8, &str); 8] = [
    (0x01, "over temperature on TS1"),
    (0x02, "over temperature on TS2"),
    (0x04, "sleep mode active"),
    (0x08, "thermal shutdown active"),
    (0x10, "test alert"),
    (0x20, "otp eeprom uncorrectable error"),
    (0x40, "group3 registers invalid"),
    (0x80, "address not registered"),
];

fn thermistor_celsius(raw: u16, channel: usize) -> f32 {
    let (offset, divisor) = SENSOR_PRESCALE[channel];
    let t = (1.78 / ((f32::from(raw) + offset) / divisor) - 3.57) * 1000.0;
    let ln_t = libm::logf(t);
    let inv_kelvin = STEINHART_A + STEINHART_B * ln_t + STEINHART_C * libm::powf(ln_t, 3.0);
    1.0 / inv_kelvin - 273.15
}

/// Telemetry and watermarks for one battery module.
#[derive(Clone, Debug)]
pub struct ModuleRecord {
    address: u8,
    cell_volts: [f32; CELLS_PER_MODULE],
    lowest_cell_volts: [f32; CELLS_PER_MODULE],
    highest_cell_volts: [f32; CELLS_PER_MODULE],
    /// Sum of the six cell readings; preferred over the reported voltage.
    module_volt: f32,
    /// Module voltage as reported on the GPAI channel.
    reported_volt: f32,
    lowest_reported_volt: f32,
    highest_reported_volt: f32,
    temperatures: [f32; 2],
    lowest_temperature: f32,
    highest_temperature: f32,
    alerts: u8,
    faults: u8,
    cov_faults: u8,
    cuv_faults: u8,
}

impl ModuleRecord {
    pub const fn new() -> Self {
        Self {
            address: 0,
            cell_volts: [0.0; CELLS_PER_MODULE],
            lowest_cell_volts: [LOW_CELL_SENTINEL; CELLS_PER_MODULE],
            highest_cell_volts: [HIGH_CELL_SENTINEL; CELLS_PER_MODULE],
            module_volt: 0.0,
            reported_volt: 0.0,
            lowest_reported_volt: LOW_VOLT_SENTINEL,
            highest_reported_volt: HIGH_VOLT_SENTINEL,
            temperatures: [0.0; 2],
            lowest_temperature: LOW_TEMP_SENTINEL,
            highest_temperature: HIGH_TEMP_SENTINEL,
            alerts: 0,
            faults: 0,
            cov_faults: 0,
            cuv_faults: 0,
        }
    }

    /// Widens nothing: restores every watermark to its sentinel extreme.
    pub fn reset_watermarks(&mut self) {
        self.lowest_cell_volts = [LOW_CELL_SENTINEL; CELLS_PER_MODULE];
        self.highest_cell_volts = [HIGH_CELL_SENTINEL; CELLS_PER_MODULE];
        self.lowest_reported_volt = LOW_VOLT_SENTINEL;
        self.highest_reported_volt = HIGH_VOLT_SENTINEL;
        self.lowest_temperature = LOW_TEMP_SENTINEL;
        self.highest_temperature = HIGH_TEMP_SENTINEL;
    }

    /// Synchronizes this record with the physical module.
    ///
    /// One status-register read, three configuration writes gating the ADC,
    /// then one bulk telemetry read. Any failed transaction aborts the
    /// refresh and is reported to the caller.
    pub fn refresh<L: SerialLink>(&mut self, bus: &mut ModuleBus<L>) -> Result<(), BusError> {
        let mut status = [0u8; 4];
        bus.read(self.address, registers::ALERT_STATUS, &mut status)?;
        self.alerts = status[0];
        self.faults = status[1];
        self.cov_faults = status[2];
        self.cuv_faults = status[3];

        // ADC auto mode over every input we care about, thermistor pins on,
        // then kick the conversions.
        bus.write(self.address, registers::ADC_CTRL, registers::ADC_ALL_CHANNELS)?;
        bus.write(self.address, registers::IO_CTRL, registers::IO_THERMISTORS_ON)?;
        bus.write(self.address, registers::ADC_CONV, 1)?;

        // 18 bytes: GPAI, six cells, two thermistor words, all 16-bit BE.
        let mut telemetry = [0u8; 18];
        bus.read(self.address, registers::GPAI, &mut telemetry)?;

        self.reported_volt =
            f32::from(u16::from_be_bytes([telemetry[0], telemetry[1]])) * GPAI_VOLT_SCALE;
        if self.reported_volt > self.highest_reported_volt {
            self.highest_reported_volt = self.reported_volt;
        }
        if self.reported_volt < self.lowest_reported_volt {
            self.lowest_reported_volt = self.reported_volt;
        }

        for (i, chunk) in telemetry[2..14].chunks_exact(2).enumerate() {
            let volts = f32::from(u16::from_be_bytes([chunk[0], chunk[1]])) * CELL_VOLT_SCALE;
            self.cell_volts[i] = volts;
            if volts < self.lowest_cell_volts[i] {
                self.lowest_cell_volts[i] = volts;
            }
            if volts > self.highest_cell_volts[i] {
                self.highest_cell_volts[i] = volts;
            }
        }

        // Trust the summed cells over the reported module voltage.
        self.module_volt = self.cell_volts.iter().sum();

        self.temperatures[0] =
            thermistor_celsius(u16::from_be_bytes([telemetry[14], telemetry[15]]), 0);
        self.temperatures[1] =
            thermistor_celsius(u16::from_be_bytes([telemetry[16], telemetry[17]]), 1);

        if self.low_temperature() < self.lowest_temperature {
            self.lowest_temperature = self.low_temperature();
        }
        if self.high_temperature() > self.highest_temperature {
            self.highest_temperature = self.high_temperature();
        }

        debug!(
            "module {}: alerts={:#04x} faults={:#04x} volts={:.2}",
            self.address, self.alerts, self.faults, self.module_volt
        );
        Ok(())
    }

    /// Starts bleeding the masked cells for `duration_s` seconds.
    ///
    /// Bit i of `cell_mask` selects cell i+1. Both register writes must
    /// succeed for the command to count.
    pub fn balance<L: SerialLink>(
        &mut self,
        bus: &mut ModuleBus<L>,
        cell_mask: u8,
        duration_s: u8,
    ) -> Result<(), BusError> {
        bus.write(self.address, registers::BAL_TIME, duration_s)?;
        bus.write(self.address, registers::BAL_CTRL, cell_mask)?;
        Ok(())
    }

    /// Bitmask of cells strictly above `threshold` volts.
    pub fn balance_mask(&self, threshold: f32) -> u8 {
        let mut mask = 0;
        for (i, &volts) in self.cell_volts.iter().enumerate() {
            if volts > threshold {
                mask |= 1 << i;
            }
        }
        mask
    }

    pub fn set_address(&mut self, address: u8) {
        if address > crate::bus::MAX_MODULE_ADDR {
            return;
        }
        self.address = address;
    }

    pub const fn address(&self) -> u8 {
        self.address
    }

    pub fn cell_voltage(&self, cell: usize) -> f32 {
        self.cell_volts.get(cell).copied().unwrap_or(0.0)
    }

    pub fn lowest_cell_voltage(&self, cell: usize) -> f32 {
        self.lowest_cell_volts.get(cell).copied().unwrap_or(0.0)
    }

    pub fn highest_cell_voltage(&self, cell: usize) -> f32 {
        self.highest_cell_volts.get(cell).copied().unwrap_or(0.0)
    }

    /// Lowest plausible cell reading, 0.0 when no channel is plausible.
    pub fn low_cell_voltage(&self) -> f32 {
        let mut low = f32::MAX;
        for &volts in &self.cell_volts {
            if volts < IMPLAUSIBLE_CELL_V && volts < low {
                low = volts;
            }
        }
        if low < f32::MAX { low } else { 0.0 }
    }

    /// Highest plausible cell reading, 0.0 when no channel is plausible.
    pub fn high_cell_voltage(&self) -> f32 {
        let mut high = 0.0;
        for &volts in &self.cell_volts {
            if volts < IMPLAUSIBLE_CELL_V && volts > high {
                high = volts;
            }
        }
        high
    }

    /// Mean of the plausible cell readings.
    pub fn avg_cell_voltage(&self) -> f32 {
        let mut sum = 0.0;
        let mut counted = 0u32;
        for &volts in &self.cell_volts {
            if volts < IMPLAUSIBLE_CELL_V {
                sum += volts;
                counted += 1;
            }
        }
        if counted == 0 {
            return 0.0;
        }
        sum / counted as f32
    }

    pub const fn module_voltage(&self) -> f32 {
        self.module_volt
    }

    pub const fn reported_voltage(&self) -> f32 {
        self.reported_volt
    }

    pub const fn lowest_reported_voltage(&self) -> f32 {
        self.lowest_reported_volt
    }

    pub const fn highest_reported_voltage(&self) -> f32 {
        self.highest_reported_volt
    }

    pub fn temperature(&self, sensor: usize) -> f32 {
        self.temperatures.get(sensor).copied().unwrap_or(0.0)
    }

    pub fn low_temperature(&self) -> f32 {
        self.temperatures[0].min(self.temperatures[1])
    }

    pub fn high_temperature(&self) -> f32 {
        self.temperatures[0].max(self.temperatures[1])
    }

    pub fn avg_temperature(&self) -> f32 {
        (self.temperatures[0] + self.temperatures[1]) / 2.0
    }

    pub const fn lowest_temperature(&self) -> f32 {
        self.lowest_temperature
    }

    pub const fn highest_temperature(&self) -> f32 {
        self.highest_temperature
    }

    pub const fn alerts(&self) -> u8 {
        self.alerts
    }

    pub const fn faults(&self) -> u8 {
        self.faults
    }

    pub const fn cov_faults(&self) -> u8 {
        self.cov_faults
    }

    pub const fn cuv_faults(&self) -> u8 {
        self.cuv_faults
    }
}

impl Default for ModuleRecord {
    fn default() -> Self {
        Self::new()
    }
}
