//! Operating setpoints, addressable by name for the console.
//!
//! Values live in memory; loading and storing them is the job of whatever
//! persistence layer the target provides. Every parameter carries its
//! default and an accepted range so a console `set` can be validated before
//! it lands.

use core::fmt;

/// A parameter value as handed to/from the console.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Int(u32),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Float(value) => write!(f, "{value:.3}"),
            ParamValue::Int(value) => write!(f, "{value}"),
        }
    }
}

/// Catalog entry describing one named parameter.
pub struct ParamInfo {
    pub name: &'static str,
    pub min: f32,
    pub max: f32,
    pub description: &'static str,
}

/// Rejected console writes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SetpointError {
    UnknownParam,
    InvalidValue,
    OutOfRange,
}

impl fmt::Display for SetpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetpointError::UnknownParam => f.write_str("unknown parameter"),
            SetpointError::InvalidValue => f.write_str("value does not parse"),
            SetpointError::OutOfRange => f.write_str("value outside accepted range"),
        }
    }
}

/// Every tunable the controller consults, with its power-on default.
#[derive(Clone, Debug)]
pub struct Setpoints {
    /// Cell voltage that trips the pack overvoltage fault.
    pub over_v: f32,
    /// Cell voltage that trips the pack undervoltage fault.
    pub under_v: f32,
    /// Highest cell voltage at which charging is still allowed.
    pub max_charge_v: f32,
    /// Below this cell voltage standby starts a new charge cycle.
    pub charger_cycle_v: f32,
    /// Highest-cell voltage that moves charging into trickle.
    pub trickle_charge_v: f32,
    /// Lowest coolant pump duty while running or charging, 0..1.
    pub floor_duty_coolant_pump: f32,
    /// Pack temperature where the pump starts ramping off its floor.
    pub cooling_lowt: f32,
    /// Pack temperature where the pump reaches full duty.
    pub cooling_hight: f32,
    /// Module temperature that trips the overtemperature fault.
    pub over_t: f32,
    /// Module temperature that trips the undertemperature fault.
    pub under_t: f32,
    /// Highest-cell voltage that enables precision balancing.
    pub precision_balance_v: f32,
    /// Precision balancing bleeds cells this far above the lowest cell.
    pub precision_balance_cell_v_offset: f32,
    /// Highest-cell voltage that enables rough balancing.
    pub rough_balance_v: f32,
    /// Rough balancing bleeds cells this far above the lowest cell.
    pub rough_balance_cell_v_offset: f32,
    /// 12 V battery voltage that engages the DC-DC charge cycle.
    pub dc2dc_cycle_v: f32,
    /// DC-DC charge cycle duration in seconds.
    pub dc2dc_cycle_time_s: u32,
    /// 12 V battery overvoltage fault threshold.
    pub bat12v_over_v: f32,
    /// 12 V battery undervoltage fault threshold.
    pub bat12v_under_v: f32,
    /// ADC counts per volt on the 12 V battery sense divider.
    pub bat12v_scaling_divisor: f32,
    /// Consecutive bad samples required before a fault asserts.
    pub fault_debounce_count: u32,
    /// Modules expected on the chain; fewer trips the shortfall fault.
    pub module_count: u32,
    /// Parallel strings sharing the bus, for voltage normalization.
    pub pack_strings: u32,
}

impl Default for Setpoints {
    fn default() -> Self {
        Self {
            over_v: 4.25,
            under_v: 3.0,
            max_charge_v: 4.2,
            charger_cycle_v: 4.17,
            trickle_charge_v: 4.19,
            floor_duty_coolant_pump: 0.25,
            cooling_lowt: 25.0,
            cooling_hight: 35.0,
            over_t: 35.0,
            under_t: -10.0,
            precision_balance_v: 4.0,
            precision_balance_cell_v_offset: 0.005,
            rough_balance_v: 3.4,
            rough_balance_cell_v_offset: 0.1,
            dc2dc_cycle_v: 12.5,
            dc2dc_cycle_time_s: 3600,
            bat12v_over_v: 14.5,
            bat12v_under_v: 10.0,
            bat12v_scaling_divisor: 61.78,
            fault_debounce_count: 3,
            module_count: 4,
            pack_strings: 1,
        }
    }
}

/// Full catalog, in display order.
pub const PARAMS: &[ParamInfo] = &[
    ParamInfo { name: "over_v", min: 3.8, max: 4.25, description: "triggers the pack over-voltage fault" },
    ParamInfo { name: "under_v", min: 2.5, max: 3.5, description: "triggers the pack under-voltage fault" },
    ParamInfo { name: "max_charge_v", min: 3.8, max: 4.25, description: "stops charging" },
    ParamInfo { name: "charger_cycle_v", min: 2.5, max: 4.25, description: "cycle charger to force a charging cycle" },
    ParamInfo { name: "trickle_charge_v", min: 2.5, max: 4.25, description: "transition to trickle charging at this highest-cell voltage" },
    ParamInfo { name: "floor_duty_coolant_pump", min: 0.0, max: 1.0, description: "lowest pump duty cycle while running or charging" },
    ParamInfo { name: "cooling_lowt", min: -20.0, max: 65.0, description: "temperature where pump duty ramps off its floor" },
    ParamInfo { name: "cooling_hight", min: -20.0, max: 65.0, description: "temperature where pump duty is at maximum" },
    ParamInfo { name: "over_t", min: 30.0, max: 60.0, description: "triggers the over-temperature fault" },
    ParamInfo { name: "under_t", min: -40.0, max: 10.0, description: "triggers the under-temperature fault" },
    ParamInfo { name: "precision_balance_v", min: 3.0, max: 4.2, description: "start precision balancing at this highest-cell voltage" },
    ParamInfo { name: "precision_balance_cell_v_offset", min: 0.001, max: 0.1, description: "precision balance cells above lowest cell by this offset" },
    ParamInfo { name: "rough_balance_v", min: 3.0, max: 4.0, description: "start rough balancing at this highest-cell voltage" },
    ParamInfo { name: "rough_balance_cell_v_offset", min: 0.05, max: 0.5, description: "rough balance cells above lowest cell by this offset" },
    ParamInfo { name: "dc2dc_cycle_v", min: 12.0, max: 13.0, description: "12V battery voltage engaging the DC-DC charge cycle" },
    ParamInfo { name: "dc2dc_cycle_time_s", min: 60.0, max: 14400.0, description: "DC-DC charge cycle duration in seconds" },
    ParamInfo { name: "bat12v_over_v", min: 13.0, max: 15.0, description: "triggers the 12V battery over-voltage fault" },
    ParamInfo { name: "bat12v_under_v", min: 9.0, max: 12.5, description: "triggers the 12V battery under-voltage fault" },
    ParamInfo { name: "bat12v_scaling_divisor", min: 50.0, max: 70.0, description: "12V battery ADC counts per volt" },
    ParamInfo { name: "fault_debounce_count", min: 1.0, max: 20.0, description: "consecutive samples before a fault asserts" },
    ParamInfo { name: "module_count", min: 1.0, max: 62.0, description: "modules expected on the chain" },
    ParamInfo { name: "pack_strings", min: 1.0, max: 8.0, description: "parallel strings for voltage normalization" },
];

impl Setpoints {
    /// Looks up a parameter by name.
    pub fn get(&self, name: &str) -> Option<ParamValue> {
        let value = match name {
            "over_v" => ParamValue::Float(self.over_v),
            "under_v" => ParamValue::Float(self.under_v),
            "max_charge_v" => ParamValue::Float(self.max_charge_v),
            "charger_cycle_v" => ParamValue::Float(self.charger_cycle_v),
            "trickle_charge_v" => ParamValue::Float(self.trickle_charge_v),
            "floor_duty_coolant_pump" => ParamValue::Float(self.floor_duty_coolant_pump),
            "cooling_lowt" => ParamValue::Float(self.cooling_lowt),
            "cooling_hight" => ParamValue::Float(self.cooling_hight),
            "over_t" => ParamValue::Float(self.over_t),
            "under_t" => ParamValue::Float(self.under_t),
            "precision_balance_v" => ParamValue::Float(self.precision_balance_v),
            "precision_balance_cell_v_offset" => {
                ParamValue::Float(self.precision_balance_cell_v_offset)
            }
            "rough_balance_v" => ParamValue::Float(self.rough_balance_v),
            "rough_balance_cell_v_offset" => ParamValue::Float(self.rough_balance_cell_v_offset),
            "dc2dc_cycle_v" => ParamValue::Float(self.dc2dc_cycle_v),
            "dc2dc_cycle_time_s" => ParamValue::Int(self.dc2dc_cycle_time_s),
            "bat12v_over_v" => ParamValue::Float(self.bat12v_over_v),
            "bat12v_under_v" => ParamValue::Float(self.bat12v_under_v),
            "bat12v_scaling_divisor" => ParamValue::Float(self.bat12v_scaling_divisor),
            "fault_debounce_count" => ParamValue::Int(self.fault_debounce_count),
            "module_count" => ParamValue::Int(self.module_count),
            "pack_strings" => ParamValue::Int(self.pack_strings),
            _ => return None,
        };
        Some(value)
    }

    /// Parses and stores a parameter, range-checking against the catalog.
    pub fn set(&mut self, name: &str, value: &str) -> Result<ParamValue, SetpointError> {
        let info = PARAMS
            .iter()
            .find(|info| info.name == name)
            .ok_or(SetpointError::UnknownParam)?;

        let parsed: f32 = value.trim().parse().map_err(|_| SetpointError::InvalidValue)?;
        if parsed < info.min || parsed > info.max {
            return Err(SetpointError::OutOfRange);
        }

        let slot: &mut f32 = match name {
            "over_v" => &mut self.over_v,
            "under_v" => &mut self.under_v,
            "max_charge_v" => &mut self.max_charge_v,
            "charger_cycle_v" => &mut self.charger_cycle_v,
            "trickle_charge_v" => &mut self.trickle_charge_v,
            "floor_duty_coolant_pump" => &mut self.floor_duty_coolant_pump,
            "cooling_lowt" => &mut self.cooling_lowt,
            "cooling_hight" => &mut self.cooling_hight,
            "over_t" => &mut self.over_t,
            "under_t" => &mut self.under_t,
            "precision_balance_v" => &mut self.precision_balance_v,
            "precision_balance_cell_v_offset" => &mut self.precision_balance_cell_v_offset,
            "rough_balance_v" => &mut self.rough_balance_v,
            "rough_balance_cell_v_offset" => &mut self.rough_balance_cell_v_offset,
            "dc2dc_cycle_v" => &mut self.dc2dc_cycle_v,
            "bat12v_over_v" => &mut self.bat12v_over_v,
            "bat12v_under_v" => &mut self.bat12v_under_v,
            "bat12v_scaling_divisor" => &mut self.bat12v_scaling_divisor,
            "dc2dc_cycle_time_s" => {
                self.dc2dc_cycle_time_s = parsed as u32;
                return Ok(ParamValue::Int(self.dc2dc_cycle_time_s));
            }
            "fault_debounce_count" => {
                self.fault_debounce_count = parsed as u32;
                return Ok(ParamValue::Int(self.fault_debounce_count));
            }
            "module_count" => {
                self.module_count = parsed as u32;
                return Ok(ParamValue::Int(self.module_count));
            }
            "pack_strings" => {
                self.pack_strings = parsed as u32;
                return Ok(ParamValue::Int(self.pack_strings));
            }
            _ => return Err(SetpointError::UnknownParam),
        };
        *slot = parsed;
        Ok(ParamValue::Float(parsed))
    }

    /// Restores every parameter to its power-on default.
    pub fn reset_defaults(&mut self) {
        *self = Self::default();
    }
}
