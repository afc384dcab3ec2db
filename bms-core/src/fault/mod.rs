//! Debounced, named, sticky fault primitive and the panel of monitored
//! conditions.
//!
//! Raw threshold comparisons are noisy: ADC jitter or a single garbled bus
//! transaction must not trip a fault. Each condition therefore requires
//! `debounce` consecutive bad samples before asserting, while one good
//! sample clears it immediately. The sticky flag records that a fault was
//! ever live and survives until an explicit operator reset, supporting
//! postmortem diagnosis.

use log::{error, info};

/// One monitored condition with debounce and sticky bookkeeping.
#[derive(Clone, Debug)]
pub struct Fault {
    name: &'static str,
    affects_charging: bool,
    affects_running: bool,
    counter: u8,
    active: bool,
    sticky: bool,
    asserted_at: Option<u32>,
}

impl Fault {
    pub const fn new(name: &'static str, affects_charging: bool, affects_running: bool) -> Self {
        Self {
            name,
            affects_charging,
            affects_running,
            counter: 0,
            active: false,
            sticky: false,
            asserted_at: None,
        }
    }

    /// Records one bad sample at tick `now`.
    ///
    /// Once `threshold` consecutive bad samples accumulate the fault latches
    /// asserted, the sticky flag is set permanently, and the transition is
    /// logged exactly once. The counter clamps at the threshold so a
    /// condition held for hours still clears after a single good sample.
    /// Returns `true` on the tick the fault transitions into asserted.
    pub fn count(&mut self, threshold: u8, now: u32) -> bool {
        if self.counter < threshold {
            self.counter += 1;
        }
        if self.counter >= threshold {
            self.sticky = true;
            if !self.active {
                self.active = true;
                self.asserted_at = Some(now);
                error!("fault asserted: {}", self.name);
                return true;
            }
        }
        false
    }

    /// Records one good sample: the debounce counter restarts and an active
    /// fault deasserts (logged once). The sticky flag is never touched here.
    pub fn reset(&mut self) -> bool {
        self.counter = 0;
        if self.active {
            self.active = false;
            info!("fault cleared: {}", self.name);
            return true;
        }
        false
    }

    /// Operator-initiated sticky clear.
    pub fn clear_sticky(&mut self) {
        self.sticky = false;
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn is_active(&self) -> bool {
        self.active
    }

    pub const fn is_sticky(&self) -> bool {
        self.sticky
    }

    pub const fn affects_charging(&self) -> bool {
        self.affects_charging
    }

    pub const fn affects_running(&self) -> bool {
        self.affects_running
    }

    /// Tick at which the fault last transitioned into asserted.
    pub const fn asserted_at(&self) -> Option<u32> {
        self.asserted_at
    }
}

/// Identifier for every condition the controller monitors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultId {
    SerialComms,
    ModuleFaultLoop,
    BatteryMonitor,
    PackOverVoltage,
    PackUnderVoltage,
    PackOverTemperature,
    PackUnderTemperature,
    Bat12vOverVoltage,
    Bat12vUnderVoltage,
    WaterSensor1,
    WaterSensor2,
    ModuleCountShortfall,
}

impl FaultId {
    pub const COUNT: usize = 12;

    pub const ALL: [FaultId; Self::COUNT] = [
        FaultId::SerialComms,
        FaultId::ModuleFaultLoop,
        FaultId::BatteryMonitor,
        FaultId::PackOverVoltage,
        FaultId::PackUnderVoltage,
        FaultId::PackOverTemperature,
        FaultId::PackUnderTemperature,
        FaultId::Bat12vOverVoltage,
        FaultId::Bat12vUnderVoltage,
        FaultId::WaterSensor1,
        FaultId::WaterSensor2,
        FaultId::ModuleCountShortfall,
    ];

    const fn index(self) -> usize {
        match self {
            FaultId::SerialComms => 0,
            FaultId::ModuleFaultLoop => 1,
            FaultId::BatteryMonitor => 2,
            FaultId::PackOverVoltage => 3,
            FaultId::PackUnderVoltage => 4,
            FaultId::PackOverTemperature => 5,
            FaultId::PackUnderTemperature => 6,
            FaultId::Bat12vOverVoltage => 7,
            FaultId::Bat12vUnderVoltage => 8,
            FaultId::WaterSensor1 => 9,
            FaultId::WaterSensor2 => 10,
            FaultId::ModuleCountShortfall => 11,
        }
    }
}

/// Holds one [`Fault`] per monitored condition.
///
/// Classification decides which aggregate a fault feeds: charge-blocking
/// faults inhibit the charger, run-blocking faults engage the power limiter.
/// The 12 V battery thresholds are report-only.
pub struct FaultPanel {
    faults: [Fault; FaultId::COUNT],
}

impl FaultPanel {
    pub const fn new() -> Self {
        Self {
            faults: [
                Fault::new("bms-serial-comms", true, true),
                Fault::new("module-fault-loop", true, true),
                Fault::new("battery-monitor", true, true),
                Fault::new("pack-over-voltage", true, false),
                Fault::new("pack-under-voltage", false, true),
                Fault::new("pack-over-temperature", true, true),
                Fault::new("pack-under-temperature", true, false),
                Fault::new("12v-battery-over-voltage", false, false),
                Fault::new("12v-battery-under-voltage", false, false),
                Fault::new("water-sensor-1", true, true),
                Fault::new("water-sensor-2", true, true),
                Fault::new("module-count-shortfall", true, true),
            ],
        }
    }

    pub fn get(&self, id: FaultId) -> &Fault {
        &self.faults[id.index()]
    }

    /// Feeds one observation into a condition: bad samples count toward the
    /// debounce threshold, a good sample resets it.
    pub fn observe(&mut self, id: FaultId, bad: bool, threshold: u8, now: u32) -> bool {
        let fault = &mut self.faults[id.index()];
        if bad {
            fault.count(threshold, now)
        } else {
            fault.reset();
            false
        }
    }

    /// OR of every active charge-blocking fault.
    pub fn charger_inhibit(&self) -> bool {
        self.faults
            .iter()
            .any(|f| f.is_active() && f.affects_charging())
    }

    /// OR of every active run-blocking fault.
    pub fn power_limiter(&self) -> bool {
        self.faults
            .iter()
            .any(|f| f.is_active() && f.affects_running())
    }

    pub fn any_active(&self) -> bool {
        self.faults.iter().any(Fault::is_active)
    }

    pub fn any_sticky(&self) -> bool {
        self.faults.iter().any(Fault::is_sticky)
    }

    /// Restores every fault to its power-on state, sticky flags included.
    pub fn reset_all(&mut self) {
        for fault in &mut self.faults {
            fault.reset();
            fault.clear_sticky();
        }
    }

    /// Operator sticky clear across the panel; live faults stay asserted.
    pub fn clear_sticky_all(&mut self) {
        for fault in &mut self.faults {
            fault.clear_sticky();
        }
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Fault> {
        self.faults.iter()
    }
}

impl Default for FaultPanel {
    fn default() -> Self {
        Self::new()
    }
}
