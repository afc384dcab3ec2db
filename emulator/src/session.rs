//! Interactive session wiring the controller, the simulated chain, and the
//! shared console dispatch together.

use std::fmt::Write;

use bms_core::bus::ModuleBus;
use bms_core::controller::{Controller, TickInputs};
use bms_core::repl;
use bms_core::setpoints::Setpoints;

use crate::sim::{FailureMode, SimChain};

/// Usage lines for the emulator-only commands; everything else is the shared
/// console surface (`help`).
pub const SIM_HELP: &[&str] = &[
    "tick [n]               - run n controller ticks (default 1)",
    "input <line> <0|1>     - set run|charging|evse|loop|batmon|water1|water2",
    "bat12 <volts>          - set the 12V battery voltage",
    "cells <addr> <volts>   - set every cell of one module",
    "fail <addr> <mode>     - healthy|silent|crc",
    "line <up|down>         - break or restore the module bus",
    "sim                    - dump simulated chain state",
    "exit                   - leave the emulator",
];

pub struct Session {
    controller: Controller,
    setpoints: Setpoints,
    bus: ModuleBus<SimChain>,
    inputs: TickInputs,
}

impl Session {
    pub fn new(module_count: usize) -> Self {
        let chain = SimChain::new(module_count, 3.8);
        let setpoints = Setpoints {
            module_count: module_count as u32,
            ..Setpoints::default()
        };
        Self {
            controller: Controller::new(),
            setpoints,
            bus: ModuleBus::new(chain),
            inputs: TickInputs {
                console_attached: true,
                ..TickInputs::default()
            },
        }
    }

    /// Handles one console line and returns the rendered response.
    pub fn handle_line(&mut self, line: &str) -> String {
        let mut out = String::new();
        if let Err(err) = self.try_handle(line, &mut out) {
            out.clear();
            out.push_str(&format!("ERR {err}\n"));
        }
        out
    }

    fn try_handle(&mut self, line: &str, out: &mut String) -> Result<(), String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [] => Ok(()),
            ["tick"] => self.run_ticks(1, out),
            ["tick", count] => {
                let count: u32 = count.parse().map_err(|_| "tick count does not parse")?;
                self.run_ticks(count, out)
            }
            ["input", name, level] => {
                let level = match *level {
                    "0" => false,
                    "1" => true,
                    other => return Err(format!("level `{other}` is not 0 or 1")),
                };
                self.set_input(name, level)?;
                writeln!(out, "OK {name} = {level}").unwrap();
                Ok(())
            }
            ["bat12", volts] => {
                let volts: f32 = volts.parse().map_err(|_| "voltage does not parse")?;
                self.inputs.bat12v_raw = (volts * self.setpoints.bat12v_scaling_divisor) as u16;
                writeln!(out, "OK 12V battery at {volts:.2}V").unwrap();
                Ok(())
            }
            ["cells", address, volts] => {
                let address: u8 = address.parse().map_err(|_| "address does not parse")?;
                let volts: f32 = volts.parse().map_err(|_| "voltage does not parse")?;
                let module = self
                    .bus
                    .link_mut()
                    .module_by_address_mut(address)
                    .ok_or_else(|| format!("no module at address {address}"))?;
                module.set_cells(volts);
                writeln!(out, "OK module {address} cells at {volts:.3}V").unwrap();
                Ok(())
            }
            ["fail", address, mode] => {
                let address: u8 = address.parse().map_err(|_| "address does not parse")?;
                let mode = match *mode {
                    "healthy" => FailureMode::Healthy,
                    "silent" => FailureMode::Silent,
                    "crc" => FailureMode::CorruptCrc,
                    other => return Err(format!("unknown failure mode `{other}`")),
                };
                let module = self
                    .bus
                    .link_mut()
                    .module_by_address_mut(address)
                    .ok_or_else(|| format!("no module at address {address}"))?;
                module.mode = mode;
                writeln!(out, "OK module {address} now {mode:?}").unwrap();
                Ok(())
            }
            ["sim"] => {
                let chain = self.bus.link_mut();
                writeln!(out, "line: {}", if chain.line_down { "down" } else { "up" }).unwrap();
                for module in &chain.modules {
                    writeln!(
                        out,
                        "addr {:2} mode {:?} asleep {} balance {:#04x} cell0 {:.3}V",
                        module.address,
                        module.mode,
                        module.asleep,
                        module.balance_mask,
                        f32::from(module.cells_raw[0]) * 0.000_381_493,
                    )
                    .unwrap();
                }
                Ok(())
            }
            ["line", "down"] => {
                self.bus.link_mut().line_down = true;
                writeln!(out, "OK bus line broken").unwrap();
                Ok(())
            }
            ["line", "up"] => {
                self.bus.link_mut().line_down = false;
                writeln!(out, "OK bus line restored").unwrap();
                Ok(())
            }
            _ => self.dispatch_shared(line, out),
        }
    }

    fn run_ticks(&mut self, count: u32, out: &mut String) -> Result<(), String> {
        for _ in 0..count {
            let (outputs, period) = self
                .controller
                .tick(&mut self.bus, &self.inputs, &self.setpoints);
            writeln!(
                out,
                "[{:5}] {:16} charger={} fault_line={:?} dc2dc={} pump={:3} next={}ms",
                self.controller.tick_count(),
                self.controller.state().as_str(),
                u8::from(outputs.charger_enable),
                outputs.fault_line,
                u8::from(outputs.dc2dc_enable),
                outputs.pump_duty,
                period.millis(),
            )
            .unwrap();
        }
        Ok(())
    }

    fn set_input(&mut self, name: &str, level: bool) -> Result<(), String> {
        match name {
            "run" => self.inputs.run_request = level,
            "charging" => self.inputs.charging_active = level,
            "evse" => self.inputs.evse_disconnected = level,
            "loop" => self.inputs.module_fault_loop = level,
            "batmon" => self.inputs.battery_monitor_fault = level,
            "water1" => self.inputs.water_sensor_1 = level,
            "water2" => self.inputs.water_sensor_2 = level,
            other => return Err(format!("unknown input `{other}`")),
        }
        Ok(())
    }

    fn dispatch_shared(&mut self, line: &str, out: &mut String) -> Result<(), String> {
        let command = match repl::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(()),
            Err(err) => return Err(err.to_string()),
        };
        repl::commands::dispatch(
            &command,
            &mut self.controller,
            &mut self.setpoints,
            &mut self.bus,
            out,
        )
        .map_err(|err| err.to_string())?;
        if matches!(command, repl::Command::Help { topic: None }) {
            for usage in SIM_HELP {
                writeln!(out, "{usage}").unwrap();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticking_reaches_standby_and_summary_renders() {
        let mut session = Session::new(2);
        let transcript = session.handle_line("tick 8");
        assert!(transcript.contains("STANDBY"));

        let summary = session.handle_line("summary");
        assert!(summary.contains("Modules: 2"));
        assert!(summary.contains("Module #1"));
    }

    #[test]
    fn failure_injection_faults_and_recovers() {
        let mut session = Session::new(2);
        session.handle_line("tick 8");
        session.handle_line("fail 1 crc");
        session.handle_line("tick 3");
        let faults = session.handle_line("faults");
        assert!(faults.contains("bms-serial-comms"));
        assert!(faults.contains("true"));

        session.handle_line("fail 1 healthy");
        session.handle_line("tick 1");
        let summary = session.handle_line("summary");
        assert!(summary.contains("Charger inhibit: false"));
    }

    #[test]
    fn unknown_commands_report_errors() {
        let mut session = Session::new(1);
        assert!(session.handle_line("frobnicate").starts_with("ERR"));
        assert!(session.handle_line("input nothing 1").starts_with("ERR"));
    }
}
