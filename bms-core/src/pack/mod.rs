//! Pack aggregation: the arena of module records, bus renumbering, the
//! polling sweep, and pack-level derived values with historical watermarks.
//!
//! The arena is a fixed-capacity array indexed by assigned address minus one.
//! Addresses are contiguous from 1 in physical daisy-chain order, so every
//! scan can stop at the first unassigned slot.

use log::{debug, info, warn};

use crate::bus::{BROADCAST_ADDR, BusError, MAX_MODULE_ADDR, ModuleBus, SerialLink, registers};
use crate::module::ModuleRecord;

/// Capacity of the module arena (one slot per assignable address).
pub const MAX_MODULES: usize = MAX_MODULE_ADDR as usize;

/// Checksum-failure probes tolerated per slot during renumbering before the
/// responder is assumed present anyway.
const RENUMBER_SLOT_RETRIES: u8 = 3;

/// A cumulative extreme that only ever widens, stamped with the tick that
/// last moved it.
#[derive(Copy, Clone, Debug)]
pub struct Watermark {
    value: f32,
    tick: Option<u32>,
}

impl Watermark {
    const fn new(sentinel: f32) -> Self {
        Self {
            value: sentinel,
            tick: None,
        }
    }

    fn raise_to(&mut self, value: f32, now: u32) {
        if value > self.value {
            self.value = value;
            self.tick = Some(now);
        }
    }

    fn lower_to(&mut self, value: f32, now: u32) {
        if value < self.value {
            self.value = value;
            self.tick = Some(now);
        }
    }

    pub const fn value(&self) -> f32 {
        self.value
    }

    pub const fn tick(&self) -> Option<u32> {
        self.tick
    }
}

/// Owns every module record and the pack-level aggregates.
pub struct PackAggregator {
    modules: [ModuleRecord; MAX_MODULES],
    found_count: usize,
    strings: u32,
    line_fault: bool,
    refresh_failures: usize,
    pack_volt: f32,
    low_cell_volt: f32,
    high_cell_volt: f32,
    low_temp: f32,
    high_temp: f32,
    hist_lowest_pack_volt: Watermark,
    hist_highest_pack_volt: Watermark,
    hist_lowest_cell_volt: Watermark,
    hist_highest_cell_volt: Watermark,
    hist_highest_cell_delta: Watermark,
    hist_lowest_pack_temp: Watermark,
    hist_highest_pack_temp: Watermark,
}

impl PackAggregator {
    pub fn new() -> Self {
        Self {
            modules: core::array::from_fn(|_| ModuleRecord::new()),
            found_count: 0,
            strings: 1,
            line_fault: false,
            refresh_failures: 0,
            pack_volt: 0.0,
            low_cell_volt: 0.0,
            high_cell_volt: 0.0,
            low_temp: 0.0,
            high_temp: 0.0,
            hist_lowest_pack_volt: Watermark::new(1000.0),
            hist_highest_pack_volt: Watermark::new(0.0),
            hist_lowest_cell_volt: Watermark::new(5.0),
            hist_highest_cell_volt: Watermark::new(0.0),
            hist_highest_cell_delta: Watermark::new(0.0),
            hist_lowest_pack_temp: Watermark::new(200.0),
            hist_highest_pack_temp: Watermark::new(-100.0),
        }
    }

    /// Resets the chain and reassigns contiguous addresses from 1 in
    /// daisy-chain order (closest module to the controller first).
    ///
    /// Every module is broadcast back to address 0, then slots are claimed
    /// one by one: whichever module answers a probe on address 0 gets the
    /// next address. A probe that fails its checksum is retried — garbage on
    /// the line still means something answered — and after
    /// [`RENUMBER_SLOT_RETRIES`] garbled probes the responder is assigned
    /// regardless. Silence (a short response) ends the scan: nothing left
    /// unaddressed on the chain.
    pub fn renumber<L: SerialLink>(&mut self, bus: &mut ModuleBus<L>) {
        info!("resetting all modules for renumbering");
        if let Err(err) = bus.write(BROADCAST_ADDR, registers::RESET, registers::RESET_MAGIC) {
            warn!("renumber reset broadcast failed: {err}");
        }
        for record in &mut self.modules {
            record.set_address(0);
        }

        let mut found = 0;
        'scan: for slot in 0..MAX_MODULES {
            let mut retries = RENUMBER_SLOT_RETRIES;
            loop {
                let mut probe = [0u8; 1];
                match bus.read(0, registers::DEV_STATUS, &mut probe) {
                    Ok(()) => break,
                    Err(BusError::Crc { .. }) if retries > 0 => {
                        retries -= 1;
                    }
                    Err(BusError::Crc { .. }) => {
                        debug!("slot {slot}: probes keep failing crc, assuming a module");
                        break;
                    }
                    Err(BusError::ShortResponse { .. }) => {
                        info!("no response on address 0, done assigning addresses");
                        break 'scan;
                    }
                    Err(err) => {
                        warn!("renumber probe failed: {err}");
                        break 'scan;
                    }
                }
            }

            let address = slot as u8 + 1;
            if let Err(err) = bus.write(0, registers::ADDR_CTRL, address | registers::ADDR_ASSIGN) {
                warn!("module {address}: address assignment write failed: {err}");
            }
            self.modules[slot].set_address(address);
            info!("assigned module address {address}");
            found += 1;
        }
        self.found_count = found;
    }

    /// One full polling pass; returns how many modules were reached.
    ///
    /// Renumbers first when the line faulted last tick or nothing has been
    /// addressed yet. A failed refresh is logged and skipped so one bad
    /// module cannot block telemetry for the rest of the string.
    pub fn sweep<L: SerialLink>(&mut self, bus: &mut ModuleBus<L>, now: u32) -> usize {
        if self.line_fault || self.modules[0].address() == 0 {
            self.renumber(bus);
        }

        match bus.write(BROADCAST_ADDR, registers::BAL_CTRL, 0) {
            Ok(()) => self.line_fault = false,
            Err(err) => {
                warn!("stop-balancing broadcast failed: {err}");
                self.line_fault = true;
            }
        }

        let mut reached = 0;
        let mut failures = 0;
        let mut pack_volt = 0.0;
        for record in &mut self.modules {
            if record.address() == 0 {
                break;
            }
            match record.refresh(bus) {
                Ok(()) => {
                    reached += 1;
                    self.hist_lowest_pack_temp.lower_to(record.low_temperature(), now);
                    self.hist_highest_pack_temp.raise_to(record.high_temperature(), now);
                }
                Err(err) => {
                    failures += 1;
                    warn!("module {}: refresh failed: {err}", record.address());
                }
            }
            pack_volt += record.module_voltage();
        }
        self.refresh_failures = failures;

        pack_volt /= self.strings as f32;
        self.pack_volt = pack_volt;
        self.hist_highest_pack_volt.raise_to(pack_volt, now);
        self.hist_lowest_pack_volt.lower_to(pack_volt, now);

        let mut high_cell: f32 = 0.0;
        let mut low_cell: f32 = 5.0;
        let mut high_temp: f32 = -100.0;
        let mut low_temp: f32 = 999.0;
        for record in self.discovered() {
            high_cell = high_cell.max(record.high_cell_voltage());
            low_cell = low_cell.min(record.low_cell_voltage());
            // Modules with no thermistor attached sit far below -70 C.
            let avg = record.avg_temperature();
            if avg > -70.0 {
                high_temp = high_temp.max(avg);
                low_temp = low_temp.min(avg);
            }
        }
        self.high_cell_volt = high_cell;
        self.low_cell_volt = low_cell;
        self.high_temp = high_temp;
        self.low_temp = low_temp;

        self.hist_lowest_cell_volt.lower_to(low_cell, now);
        self.hist_highest_cell_volt.raise_to(high_cell, now);
        self.hist_highest_cell_delta.raise_to(high_cell - low_cell, now);

        reached
    }

    /// One balancing pass: every cell strictly above the pack's lowest cell
    /// plus `cell_v_offset` bleeds for `duration_s` seconds.
    pub fn balance<L: SerialLink>(
        &mut self,
        bus: &mut ModuleBus<L>,
        duration_s: u8,
        cell_v_offset: f32,
    ) {
        let threshold = self.low_cell_volt + cell_v_offset;
        for record in &mut self.modules {
            if record.address() == 0 {
                break;
            }
            let mask = record.balance_mask(threshold);
            debug!("balancing module {} mask {mask:#04x}", record.address());
            if let Err(err) = record.balance(bus, mask, duration_s) {
                warn!("module {}: balance command failed: {err}", record.address());
            }
        }
    }

    fn broadcast<L: SerialLink>(
        &mut self,
        bus: &mut ModuleBus<L>,
        register: u8,
        value: u8,
        what: &str,
    ) {
        if let Err(err) = bus.write(BROADCAST_ADDR, register, value) {
            warn!("{what} broadcast failed: {err}");
        }
    }

    /// Best-effort reset-then-clear of every module's alert and fault status.
    pub fn clear_faults<L: SerialLink>(&mut self, bus: &mut ModuleBus<L>) {
        self.broadcast(bus, registers::ALERT_STATUS, 0xFF, "alert reset");
        self.broadcast(bus, registers::ALERT_STATUS, 0x00, "alert clear");
        self.broadcast(bus, registers::FAULT_STATUS, 0xFF, "fault reset");
        self.broadcast(bus, registers::FAULT_STATUS, 0x00, "fault clear");
    }

    /// Puts every module to sleep (vehicle at rest).
    pub fn sleep_boards<L: SerialLink>(&mut self, bus: &mut ModuleBus<L>) {
        self.broadcast(bus, registers::IO_CTRL, registers::IO_SLEEP, "sleep");
    }

    /// Wakes every module and clears the sleep alert it raises.
    pub fn wake_boards<L: SerialLink>(&mut self, bus: &mut ModuleBus<L>) {
        self.broadcast(bus, registers::IO_CTRL, registers::IO_AWAKE, "wake");
        self.broadcast(bus, registers::ALERT_STATUS, registers::ALERT_SLEEP_BIT, "sleep-alert reset");
        self.broadcast(bus, registers::ALERT_STATUS, 0x00, "sleep-alert clear");
    }

    /// Operator action: watermarks back to their sentinel extremes, modules
    /// and pack level alike.
    pub fn reset_watermarks(&mut self) {
        for record in &mut self.modules {
            record.reset_watermarks();
        }
        self.hist_lowest_pack_volt = Watermark::new(1000.0);
        self.hist_highest_pack_volt = Watermark::new(0.0);
        self.hist_lowest_cell_volt = Watermark::new(5.0);
        self.hist_highest_cell_volt = Watermark::new(0.0);
        self.hist_highest_cell_delta = Watermark::new(0.0);
        self.hist_lowest_pack_temp = Watermark::new(200.0);
        self.hist_highest_pack_temp = Watermark::new(-100.0);
    }

    /// Modules discovered by the last renumbering, in address order.
    pub fn discovered(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.modules.iter().take_while(|m| m.address() != 0)
    }

    pub fn found_count(&self) -> usize {
        self.found_count
    }

    /// True when the last sweep's broadcast failed outright.
    pub const fn line_fault(&self) -> bool {
        self.line_fault
    }

    /// True when the last sweep saw any bus trouble: a dead line or one or
    /// more modules failing their refresh.
    pub const fn comms_fault(&self) -> bool {
        self.line_fault || self.refresh_failures > 0
    }

    pub const fn pack_voltage(&self) -> f32 {
        self.pack_volt
    }

    pub const fn low_cell_voltage(&self) -> f32 {
        self.low_cell_volt
    }

    pub const fn high_cell_voltage(&self) -> f32 {
        self.high_cell_volt
    }

    pub const fn low_temperature(&self) -> f32 {
        self.low_temp
    }

    pub const fn high_temperature(&self) -> f32 {
        self.high_temp
    }

    /// Mean of the per-module average cell voltages.
    pub fn avg_cell_voltage(&self) -> f32 {
        if self.found_count == 0 {
            return 0.0;
        }
        let sum: f32 = self.discovered().map(ModuleRecord::avg_cell_voltage).sum();
        sum / self.found_count as f32
    }

    /// Mean module temperature, skipping disconnected sensors.
    pub fn avg_temperature(&self) -> f32 {
        let mut sum = 0.0;
        let mut counted = 0u32;
        for record in self.discovered() {
            let avg = record.avg_temperature();
            if avg > -70.0 {
                sum += avg;
                counted += 1;
            }
        }
        if counted == 0 {
            return 0.0;
        }
        sum / counted as f32
    }

    pub const fn strings(&self) -> u32 {
        self.strings
    }

    /// Parallel-string count used to normalize the summed pack voltage.
    pub fn set_strings(&mut self, strings: u32) {
        self.strings = strings.max(1);
    }

    pub const fn hist_lowest_pack_voltage(&self) -> Watermark {
        self.hist_lowest_pack_volt
    }

    pub const fn hist_highest_pack_voltage(&self) -> Watermark {
        self.hist_highest_pack_volt
    }

    pub const fn hist_lowest_cell_voltage(&self) -> Watermark {
        self.hist_lowest_cell_volt
    }

    pub const fn hist_highest_cell_voltage(&self) -> Watermark {
        self.hist_highest_cell_volt
    }

    pub const fn hist_highest_cell_delta(&self) -> Watermark {
        self.hist_highest_cell_delta
    }

    pub const fn hist_lowest_pack_temperature(&self) -> Watermark {
        self.hist_lowest_pack_temp
    }

    pub const fn hist_highest_pack_temperature(&self) -> Watermark {
        self.hist_highest_pack_temp
    }
}

impl Default for PackAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_only_widens_and_stamps_the_moving_tick() {
        let mut high = Watermark::new(0.0);
        high.raise_to(3.9, 7);
        assert!((high.value() - 3.9).abs() < 1e-6);
        assert_eq!(high.tick(), Some(7));

        high.raise_to(3.5, 9);
        assert!((high.value() - 3.9).abs() < 1e-6);
        assert_eq!(high.tick(), Some(7));

        let mut low = Watermark::new(5.0);
        low.lower_to(3.1, 2);
        low.lower_to(3.4, 3);
        assert!((low.value() - 3.1).abs() < 1e-6);
        assert_eq!(low.tick(), Some(2));
    }

    #[test]
    fn strings_count_never_drops_below_one() {
        let mut pack = PackAggregator::new();
        pack.set_strings(0);
        assert_eq!(pack.strings(), 1);
        pack.set_strings(2);
        assert_eq!(pack.strings(), 2);
    }
}
