//! Byte-accurate simulated module chain backing the integration suites.
//!
//! The chain speaks the real wire protocol: it parses request frames, honors
//! the address-assignment handshake, serves telemetry reads from per-module
//! state, and echoes writes. Failure injection covers a silent module, a
//! module whose frames arrive garbled, and a dead line.

#![allow(dead_code)]

use std::collections::VecDeque;

use bms_core::bus::{BROADCAST_ADDR, SerialLink, crc8, registers};

const CELL_VOLT_SCALE: f32 = 0.000_381_493;
const GPAI_VOLT_SCALE: f32 = 0.002_034_629_4;

/// Routes core logging to the test harness output.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Per-module failure injection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FailureMode {
    Healthy,
    /// Never answers requests addressed to it.
    Silent,
    /// Answers with a corrupted CRC byte.
    CorruptCrc,
}

/// One simulated battery module.
pub struct SimModule {
    pub label: char,
    pub address: u8,
    pub cells_raw: [u16; 6],
    pub temps_raw: [u16; 2],
    pub alerts: u8,
    pub faults: u8,
    pub cov: u8,
    pub cuv: u8,
    pub balance_mask: Option<u8>,
    pub balance_time: Option<u8>,
    pub asleep: bool,
    pub mode: FailureMode,
}

impl SimModule {
    pub fn new(label: char, cell_volts: [f32; 6]) -> Self {
        let mut cells_raw = [0u16; 6];
        for (raw, volts) in cells_raw.iter_mut().zip(cell_volts) {
            *raw = (volts / CELL_VOLT_SCALE).round() as u16;
        }
        Self {
            label,
            address: 0,
            cells_raw,
            // Decodes to roughly 25 C on both sensor channels.
            temps_raw: [4_300, 4_300],
            alerts: 0,
            faults: 0,
            cov: 0,
            cuv: 0,
            balance_mask: None,
            balance_time: None,
            asleep: false,
            mode: FailureMode::Healthy,
        }
    }

    pub fn set_cells(&mut self, cell_volts: [f32; 6]) {
        for (raw, volts) in self.cells_raw.iter_mut().zip(cell_volts) {
            *raw = (volts / CELL_VOLT_SCALE).round() as u16;
        }
    }

    /// Volts as the controller will decode them, for exact comparisons.
    pub fn decoded_cell(&self, cell: usize) -> f32 {
        f32::from(self.cells_raw[cell]) * CELL_VOLT_SCALE
    }

    pub fn decoded_module_voltage(&self) -> f32 {
        (0..6).map(|cell| self.decoded_cell(cell)).sum()
    }

    fn telemetry_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(18);
        let volts: f32 = self.decoded_module_voltage();
        let gpai = (volts / GPAI_VOLT_SCALE).round() as u16;
        payload.extend_from_slice(&gpai.to_be_bytes());
        for raw in self.cells_raw {
            payload.extend_from_slice(&raw.to_be_bytes());
        }
        for raw in self.temps_raw {
            payload.extend_from_slice(&raw.to_be_bytes());
        }
        payload
    }

    fn register_payload(&self, register: u8, len: usize) -> Vec<u8> {
        match register {
            registers::GPAI => self.telemetry_payload(),
            registers::ALERT_STATUS => vec![self.alerts, self.faults, self.cov, self.cuv],
            _ => vec![0; len],
        }
    }
}

/// The simulated chain; implements [`SerialLink`] for the driver under test.
pub struct SimChain {
    pub modules: Vec<SimModule>,
    pub line_down: bool,
    rx: VecDeque<u8>,
}

impl SimChain {
    /// Builds a chain whose modules claim address 0 in the given order.
    pub fn new(modules: Vec<SimModule>) -> Self {
        Self {
            modules,
            line_down: false,
            rx: VecDeque::new(),
        }
    }

    pub fn module_by_label(&self, label: char) -> &SimModule {
        self.modules
            .iter()
            .find(|m| m.label == label)
            .expect("no module with that label")
    }

    pub fn module_by_label_mut(&mut self, label: char) -> &mut SimModule {
        self.modules
            .iter_mut()
            .find(|m| m.label == label)
            .expect("no module with that label")
    }

    pub fn module_by_address_mut(&mut self, address: u8) -> &mut SimModule {
        self.modules
            .iter_mut()
            .find(|m| m.address == address)
            .expect("no module with that address")
    }

    fn queue_frame(&mut self, frame: &[u8]) {
        self.rx.extend(frame);
    }

    fn handle_read(&mut self, request: &[u8]) {
        let address = request[0] >> 1;
        let register = request[1];
        let len = usize::from(request[2]);

        let responder = if address == 0 {
            self.modules.iter().position(|m| m.address == 0)
        } else {
            self.modules.iter().position(|m| m.address == address)
        };
        let Some(index) = responder else {
            return; // silence
        };
        let module = &self.modules[index];
        match module.mode {
            FailureMode::Silent => return,
            FailureMode::Healthy | FailureMode::CorruptCrc => {}
        }

        let mut payload = module.register_payload(register, len);
        payload.resize(len, 0);

        let mut frame = vec![request[0], register, request[2]];
        frame.extend_from_slice(&payload);
        frame.push(crc8(&frame));
        if self.modules[index].mode == FailureMode::CorruptCrc {
            let last = frame.len() - 1;
            frame[last] ^= 0x5A;
        }
        self.queue_frame(&frame);
    }

    fn apply_write(module: &mut SimModule, register: u8, value: u8) {
        match register {
            registers::RESET if value == registers::RESET_MAGIC => module.address = 0,
            registers::ADDR_CTRL => module.address = value & 0x3F,
            registers::BAL_CTRL => module.balance_mask = Some(value),
            registers::BAL_TIME => module.balance_time = Some(value),
            registers::IO_CTRL => module.asleep = value == registers::IO_SLEEP,
            registers::ALERT_STATUS if value == 0 => module.alerts = 0,
            registers::FAULT_STATUS if value == 0 => {
                module.faults = 0;
                module.cov = 0;
                module.cuv = 0;
            }
            _ => {}
        }
    }

    fn handle_write(&mut self, request: &[u8]) {
        let address = request[0] >> 1;
        let register = request[1];
        let value = request[2];

        if address == BROADCAST_ADDR {
            for module in &mut self.modules {
                Self::apply_write(module, register, value);
            }
            self.queue_frame(request);
            return;
        }

        let target = if address == 0 {
            self.modules.iter_mut().find(|m| m.address == 0)
        } else {
            self.modules.iter_mut().find(|m| m.address == address)
        };
        let Some(module) = target else {
            return; // silence
        };
        if module.mode == FailureMode::Silent {
            return;
        }
        Self::apply_write(module, register, value);
        self.queue_frame(request);
    }
}

impl SerialLink for SimChain {
    fn send(&mut self, bytes: &[u8]) {
        if self.line_down {
            return;
        }
        if bytes.is_empty() {
            return;
        }
        if bytes[0] & 1 == 1 {
            self.handle_write(bytes);
        } else {
            self.handle_read(bytes);
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < buf.len() {
            let Some(byte) = self.rx.pop_front() else {
                break;
            };
            buf[copied] = byte;
            copied += 1;
        }
        copied
    }

    fn flush_input(&mut self) {
        self.rx.clear();
    }

    fn settle(&mut self, _ms: u32) {}
}

/// Convenience: a chain of healthy modules with uniform cell voltages.
pub fn uniform_chain(labels: &[char], cell_volts: f32) -> SimChain {
    SimChain::new(
        labels
            .iter()
            .map(|&label| SimModule::new(label, [cell_volts; 6]))
            .collect(),
    )
}
