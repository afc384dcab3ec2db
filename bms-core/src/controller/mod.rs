//! The operational state machine sequencing the vehicle/charger lifecycle.
//!
//! A fixed-period scheduler calls [`Controller::tick`] once per tick. Every
//! tick first refreshes pack telemetry and re-evaluates the debounced fault
//! panel, then computes the state transition, and finally produces the
//! buffered actuator outputs for the (possibly new) state. No fault is
//! immediately fatal: debounced faults inhibit charging and/or limit run
//! power while the machine keeps running and reporting.

use core::fmt;

use log::{error, info, warn};

use crate::bus::{ModuleBus, SerialLink};
use crate::fault::{FaultId, FaultPanel};
use crate::pack::PackAggregator;
use crate::setpoints::Setpoints;

mod io;

pub use io::{LineDrive, LoopPeriod, OutputFrame, TickInputs};

/// Ticks spent settling in `Init` before entering `Standby`.
pub const INIT_SETTLE_TICKS: u32 = 4;
/// Minimum dwell in `Standby` before a charge cycle may start.
pub const STANDBY_DWELL_TICKS: u32 = 4;
/// Ticks `PreCharge` waits for the charger to assert its charging signal.
pub const PRECHARGE_WINDOW_TICKS: u32 = 25;
/// Ticks `PostCharge` waits for the charging signal to drop.
pub const POSTCHARGE_WINDOW_TICKS: u32 = 25;
/// Consecutive ticks of dropped charging/EVSE signal before leaving a
/// charging state. Shared between the two conditions.
pub const CHARGE_DROP_DEBOUNCE_TICKS: u8 = 3;
/// Balance bleed duration handed to the modules each balancing pass.
pub const BALANCE_DURATION_S: u8 = 5;

/// Operational phase; exactly one is active at a time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControllerState {
    Init,
    Standby,
    PreCharge,
    Charging,
    TrickleCharging,
    PostCharge,
    Run,
}

impl ControllerState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ControllerState::Init => "INIT",
            ControllerState::Standby => "STANDBY",
            ControllerState::PreCharge => "PRE_CHARGE",
            ControllerState::Charging => "CHARGING",
            ControllerState::TrickleCharging => "TRICKLE_CHARGING",
            ControllerState::PostCharge => "POST_CHARGE",
            ControllerState::Run => "RUN",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coolant pump duty for the current pack temperature: floor duty below the
/// low setpoint, full duty above the high one, linear in between.
fn cooling_duty(temp: f32, setpoints: &Setpoints) -> u8 {
    let floor = setpoints.floor_duty_coolant_pump.clamp(0.0, 1.0);
    let duty = if temp <= setpoints.cooling_lowt {
        floor
    } else if temp >= setpoints.cooling_hight {
        1.0
    } else {
        let span = setpoints.cooling_hight - setpoints.cooling_lowt;
        floor + (1.0 - floor) * (temp - setpoints.cooling_lowt) / span
    };
    (duty * 255.0) as u8
}

/// Top-level controller: pack aggregation, fault panel, state machine.
pub struct Controller {
    state: ControllerState,
    pack: PackAggregator,
    faults: FaultPanel,
    tick_count: u32,
    ticks_in_state: u32,
    charge_drop_ticks: u8,
    dc2dc_remaining_ms: u32,
    dc2dc_armed: bool,
    last_period_ms: u32,
    bat12v_volts: f32,
    charger_inhibit: bool,
    power_limiter: bool,
    initialized: bool,
}

impl Controller {
    pub fn new() -> Self {
        Self {
            state: ControllerState::Init,
            pack: PackAggregator::new(),
            faults: FaultPanel::new(),
            tick_count: 0,
            ticks_in_state: 0,
            charge_drop_ticks: 0,
            dc2dc_remaining_ms: 0,
            dc2dc_armed: true,
            last_period_ms: 0,
            bat12v_volts: 0.0,
            charger_inhibit: false,
            power_limiter: false,
            initialized: false,
        }
    }

    /// Runs one tick: telemetry sync, fault evaluation, state transition,
    /// output computation. Returns the outputs to latch and the scheduling
    /// class for the next tick.
    pub fn tick<L: SerialLink>(
        &mut self,
        bus: &mut ModuleBus<L>,
        inputs: &TickInputs,
        setpoints: &Setpoints,
    ) -> (OutputFrame, LoopPeriod) {
        if !self.initialized {
            self.faults.reset_all();
            self.charger_inhibit = false;
            self.power_limiter = false;
            self.pack.renumber(bus);
            self.pack.clear_faults(bus);
            self.initialized = true;
        }
        self.pack.set_strings(setpoints.pack_strings);

        self.sync_module_data(bus, inputs, setpoints);
        self.update_dc2dc(setpoints);

        let next = self.next_state(inputs, setpoints);
        if next == self.state {
            self.ticks_in_state += 1;
        } else {
            info!("state {} -> {}", self.state, next);
            self.state = next;
            self.ticks_in_state = 0;
            self.charge_drop_ticks = 0;
        }

        let outputs = self.state_outputs(setpoints);
        let period = self.period(inputs);
        self.last_period_ms = period.millis();
        self.tick_count += 1;
        (outputs, period)
    }

    /// Wakes the bus, sweeps the pack, feeds every monitored condition into
    /// the fault panel, derives the two aggregates, and runs the balancing
    /// pass.
    fn sync_module_data<L: SerialLink>(
        &mut self,
        bus: &mut ModuleBus<L>,
        inputs: &TickInputs,
        setpoints: &Setpoints,
    ) {
        self.pack.wake_boards(bus);
        let reached = self.pack.sweep(bus, self.tick_count);

        let threshold = setpoints.fault_debounce_count.min(u32::from(u8::MAX)) as u8;
        let now = self.tick_count;
        let faults = &mut self.faults;

        faults.observe(FaultId::SerialComms, self.pack.comms_fault(), threshold, now);
        faults.observe(FaultId::ModuleFaultLoop, inputs.module_fault_loop, threshold, now);
        faults.observe(FaultId::BatteryMonitor, inputs.battery_monitor_fault, threshold, now);

        let high_cell = self.pack.high_cell_voltage();
        let low_cell = self.pack.low_cell_voltage();
        if faults.observe(FaultId::PackOverVoltage, high_cell > setpoints.over_v, threshold, now) {
            error!("over_v {:.2}V, highest cell {high_cell:.2}V", setpoints.over_v);
        }
        if faults.observe(FaultId::PackUnderVoltage, low_cell < setpoints.under_v, threshold, now) {
            error!("under_v {:.2}V, lowest cell {low_cell:.2}V", setpoints.under_v);
        }

        let high_temp = self.pack.high_temperature();
        let low_temp = self.pack.low_temperature();
        if faults.observe(FaultId::PackOverTemperature, high_temp > setpoints.over_t, threshold, now)
        {
            error!("over_t {:.1}C, hottest module {high_temp:.1}C", setpoints.over_t);
        }
        if faults.observe(FaultId::PackUnderTemperature, low_temp < setpoints.under_t, threshold, now)
        {
            error!("under_t {:.1}C, coldest module {low_temp:.1}C", setpoints.under_t);
        }

        self.bat12v_volts = f32::from(inputs.bat12v_raw) / setpoints.bat12v_scaling_divisor;
        faults.observe(
            FaultId::Bat12vOverVoltage,
            self.bat12v_volts > setpoints.bat12v_over_v,
            threshold,
            now,
        );
        faults.observe(
            FaultId::Bat12vUnderVoltage,
            self.bat12v_volts < setpoints.bat12v_under_v,
            threshold,
            now,
        );

        faults.observe(FaultId::WaterSensor1, inputs.water_sensor_1, threshold, now);
        faults.observe(FaultId::WaterSensor2, inputs.water_sensor_2, threshold, now);
        faults.observe(
            FaultId::ModuleCountShortfall,
            reached < setpoints.module_count as usize,
            threshold,
            now,
        );

        // Both aggregates also trip once the highest cell can take no more
        // charge, independent of any fault.
        let over_charge = high_cell >= setpoints.max_charge_v;
        self.charger_inhibit = self.faults.charger_inhibit() || over_charge;
        self.power_limiter = self.faults.power_limiter() || over_charge;

        self.balance_cells(bus, setpoints);
        self.pack.clear_faults(bus);
    }

    /// Precision offset near full charge, rough offset above the lower
    /// threshold, nothing below either.
    fn balance_cells<L: SerialLink>(&mut self, bus: &mut ModuleBus<L>, setpoints: &Setpoints) {
        let high_cell = self.pack.high_cell_voltage();
        if high_cell > setpoints.precision_balance_v {
            self.pack
                .balance(bus, BALANCE_DURATION_S, setpoints.precision_balance_cell_v_offset);
        } else if high_cell > setpoints.rough_balance_v {
            self.pack
                .balance(bus, BALANCE_DURATION_S, setpoints.rough_balance_cell_v_offset);
        }
    }

    /// Time-boxed 12 V battery charge cycle, independent of the main state.
    ///
    /// Engages when the battery sags below the cycle setpoint, runs for the
    /// configured wall-clock duration, and re-arms only after the battery
    /// has been seen healthy again.
    fn update_dc2dc(&mut self, setpoints: &Setpoints) {
        if self.dc2dc_remaining_ms > 0 {
            self.dc2dc_remaining_ms = self.dc2dc_remaining_ms.saturating_sub(self.last_period_ms);
            if self.dc2dc_remaining_ms == 0 {
                info!("12V battery charge cycle complete");
            }
            return;
        }
        if self.bat12v_volts >= setpoints.dc2dc_cycle_v {
            self.dc2dc_armed = true;
        } else if self.dc2dc_armed {
            self.dc2dc_armed = false;
            self.dc2dc_remaining_ms = setpoints.dc2dc_cycle_time_s.saturating_mul(1000);
            info!(
                "12V battery at {:.2}V, starting charge cycle",
                self.bat12v_volts
            );
        }
    }

    fn next_state(&mut self, inputs: &TickInputs, setpoints: &Setpoints) -> ControllerState {
        use ControllerState as S;

        let charge_dropped = matches!(self.state, S::Charging | S::TrickleCharging) && {
            if inputs.evse_disconnected || !inputs.charging_active {
                self.charge_drop_ticks = self.charge_drop_ticks.saturating_add(1);
            } else {
                self.charge_drop_ticks = 0;
            }
            self.charge_drop_ticks >= CHARGE_DROP_DEBOUNCE_TICKS
        };

        match self.state {
            S::Init => {
                if self.ticks_in_state >= INIT_SETTLE_TICKS {
                    S::Standby
                } else {
                    S::Init
                }
            }
            S::Standby => {
                let high_cell = self.pack.high_cell_voltage();
                if inputs.run_request {
                    S::Run
                } else if inputs.charging_active {
                    // A charger already actively asserting charging enters
                    // directly, bypassing precharge.
                    S::Charging
                } else if high_cell < setpoints.charger_cycle_v
                    && high_cell < setpoints.max_charge_v
                    && self.ticks_in_state >= STANDBY_DWELL_TICKS
                {
                    S::PreCharge
                } else {
                    S::Standby
                }
            }
            S::PreCharge => {
                if inputs.evse_disconnected {
                    S::Standby
                } else if inputs.charging_active {
                    S::Charging
                } else if self.ticks_in_state >= PRECHARGE_WINDOW_TICKS {
                    warn!("charger did not start within the precharge window");
                    S::Standby
                } else {
                    S::PreCharge
                }
            }
            S::Charging => {
                if charge_dropped {
                    S::PostCharge
                } else if self.pack.high_cell_voltage() >= setpoints.trickle_charge_v {
                    S::TrickleCharging
                } else {
                    S::Charging
                }
            }
            S::TrickleCharging => {
                if charge_dropped {
                    S::PostCharge
                } else {
                    S::TrickleCharging
                }
            }
            S::PostCharge => {
                if !inputs.charging_active || self.ticks_in_state >= POSTCHARGE_WINDOW_TICKS {
                    S::Standby
                } else {
                    S::PostCharge
                }
            }
            S::Run => {
                if inputs.run_request {
                    S::Run
                } else {
                    S::Standby
                }
            }
        }
    }

    fn state_outputs(&self, setpoints: &Setpoints) -> OutputFrame {
        use ControllerState as S;

        let dc2dc_enable = self.dc2dc_remaining_ms > 0;
        let inhibit_line = LineDrive::from_fault(self.charger_inhibit);
        match self.state {
            S::Init | S::Standby => OutputFrame {
                charger_enable: false,
                fault_line: inhibit_line,
                dc2dc_enable,
                pump_duty: 0,
            },
            S::PreCharge | S::Charging | S::TrickleCharging => OutputFrame {
                charger_enable: true,
                fault_line: inhibit_line,
                dc2dc_enable,
                pump_duty: cooling_duty(self.pack.high_temperature(), setpoints),
            },
            S::PostCharge => OutputFrame {
                charger_enable: false,
                fault_line: inhibit_line,
                dc2dc_enable,
                pump_duty: cooling_duty(self.pack.high_temperature(), setpoints),
            },
            // Run reports the run/power-limiter aggregate instead.
            S::Run => OutputFrame {
                charger_enable: false,
                fault_line: LineDrive::from_fault(self.power_limiter),
                dc2dc_enable,
                pump_duty: cooling_duty(self.pack.high_temperature(), setpoints),
            },
        }
    }

    fn period(&self, inputs: &TickInputs) -> LoopPeriod {
        match self.state {
            ControllerState::Init | ControllerState::Standby => {
                if inputs.console_attached {
                    LoopPeriod::Active
                } else {
                    LoopPeriod::Standby
                }
            }
            _ => LoopPeriod::Active,
        }
    }

    pub const fn state(&self) -> ControllerState {
        self.state
    }

    pub const fn pack(&self) -> &PackAggregator {
        &self.pack
    }

    /// Mutable pack access for operator paths (watermark reset and the
    /// like); must only run between ticks.
    pub fn pack_mut(&mut self) -> &mut PackAggregator {
        &mut self.pack
    }

    pub const fn faults(&self) -> &FaultPanel {
        &self.faults
    }

    /// Operator action clearing every sticky flag.
    pub fn clear_sticky_faults(&mut self) {
        self.faults.clear_sticky_all();
    }

    pub const fn charger_inhibit(&self) -> bool {
        self.charger_inhibit
    }

    pub const fn power_limiter(&self) -> bool {
        self.power_limiter
    }

    pub fn is_faulted(&self) -> bool {
        self.faults.any_active() || self.charger_inhibit || self.power_limiter
    }

    pub fn sticky_faulted(&self) -> bool {
        self.faults.any_sticky()
    }

    pub const fn bat12v_voltage(&self) -> f32 {
        self.bat12v_volts
    }

    pub const fn tick_count(&self) -> u32 {
        self.tick_count
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}
