//! Input polarity normalization.
//!
//! The discrete inputs arrive with mixed polarities: the fault loop, battery
//! monitor, EVSE-disconnect, and water sensors are pulled up and assert low,
//! while the run and charging signals arrive through 12 V-to-3.3 V dividers
//! and assert high. The controller core only sees logical levels; this is
//! the one place wiring polarity is decided.

// The host build compiles this module without the runtime that consumes it.
#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use bms_core::controller::TickInputs;

/// Raw electrical levels as sampled from the pins (`true` = high).
#[derive(Copy, Clone, Debug, Default)]
pub struct PinLevels {
    pub bat_pack_fault: bool,
    pub bat_mon_fault: bool,
    pub evse_disc: bool,
    pub run: bool,
    pub charging: bool,
    pub water_sens1: bool,
    pub water_sens2: bool,
}

/// Builds the controller's input snapshot from raw pin levels.
pub fn tick_inputs(levels: &PinLevels, bat12v_raw: u16, console_attached: bool) -> TickInputs {
    TickInputs {
        run_request: levels.run,
        charging_active: levels.charging,
        // Active-low, pulled up: low means asserted.
        evse_disconnected: !levels.evse_disc,
        module_fault_loop: !levels.bat_pack_fault,
        battery_monitor_fault: !levels.bat_mon_fault,
        water_sensor_1: !levels.water_sens1,
        water_sensor_2: !levels.water_sens2,
        console_attached,
        bat12v_raw,
    }
}
