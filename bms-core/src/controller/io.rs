//! Discrete I/O snapshot and buffered actuator outputs.
//!
//! Inputs arrive already normalized to logical levels (the target's pin
//! layer handles pull-up/pull-down polarity). Outputs are buffered in an
//! [`OutputFrame`] so the whole set commits to hardware atomically at tick
//! end.

/// Drive state for the open-collector fault/inhibit line.
///
/// The physical pin emulates open-collector by toggling pin direction:
/// driven low signals "no fault"; floating high releases the line and
/// signals the fault to the charge controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LineDrive {
    DriveLow,
    FloatHigh,
}

impl LineDrive {
    /// Maps a fault aggregate onto the line: asserted faults float high.
    #[must_use]
    pub const fn from_fault(faulted: bool) -> Self {
        if faulted {
            LineDrive::FloatHigh
        } else {
            LineDrive::DriveLow
        }
    }
}

/// Logical input levels sampled once per tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TickInputs {
    /// Run request from the power relay.
    pub run_request: bool,
    /// Charging signal from the charge controller.
    pub charging_active: bool,
    /// EVSE unplugged.
    pub evse_disconnected: bool,
    /// One or more modules asserting the hardware fault loop.
    pub module_fault_loop: bool,
    /// External battery monitor fault line.
    pub battery_monitor_fault: bool,
    /// Water intrusion sensors in the battery enclosure.
    pub water_sensor_1: bool,
    pub water_sensor_2: bool,
    /// An operator console is connected; keeps the loop on the short period.
    pub console_attached: bool,
    /// Raw ADC counts from the 12 V battery sense divider.
    pub bat12v_raw: u16,
}

impl Default for TickInputs {
    fn default() -> Self {
        Self {
            run_request: false,
            charging_active: false,
            evse_disconnected: false,
            module_fault_loop: false,
            battery_monitor_fault: false,
            water_sensor_1: false,
            water_sensor_2: false,
            console_attached: false,
            // A healthy 12 V battery at the default scaling divisor.
            bat12v_raw: 790,
        }
    }
}

/// Actuator outputs latched at the end of every tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OutputFrame {
    /// Powers the external charge controller.
    pub charger_enable: bool,
    /// Open-collector fault/inhibit line.
    pub fault_line: LineDrive,
    /// Enables the DC-DC converter charging the 12 V battery.
    pub dc2dc_enable: bool,
    /// Coolant pump PWM duty, 0-255.
    pub pump_duty: u8,
}

/// Scheduling class for the next tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoopPeriod {
    /// Short period while charging, running, or serving a console.
    Active,
    /// Long period to save power when idle.
    Standby,
}

impl LoopPeriod {
    #[must_use]
    pub const fn millis(self) -> u32 {
        match self {
            LoopPeriod::Active => 200,
            LoopPeriod::Standby => 2500,
        }
    }
}
