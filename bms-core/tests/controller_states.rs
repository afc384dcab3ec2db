//! Controller state machine scenarios against the simulated chain.

mod common;

use bms_core::bus::ModuleBus;
use bms_core::controller::{
    CHARGE_DROP_DEBOUNCE_TICKS, Controller, ControllerState, LineDrive, LoopPeriod,
    PRECHARGE_WINDOW_TICKS, TickInputs,
};
use bms_core::fault::FaultId;
use bms_core::setpoints::Setpoints;
use common::{FailureMode, SimChain, SimModule, uniform_chain};

struct Rig {
    controller: Controller,
    bus: ModuleBus<SimChain>,
    setpoints: Setpoints,
}

impl Rig {
    fn new(chain: SimChain) -> Self {
        common::init_logging();
        let setpoints = Setpoints {
            module_count: chain.modules.len() as u32,
            ..Setpoints::default()
        };
        Self {
            controller: Controller::new(),
            bus: ModuleBus::new(chain),
            setpoints,
        }
    }

    fn uniform(labels: &[char], cell_volts: f32) -> Self {
        Self::new(uniform_chain(labels, cell_volts))
    }

    fn tick(&mut self, inputs: &TickInputs) -> (bms_core::controller::OutputFrame, LoopPeriod) {
        self.controller.tick(&mut self.bus, inputs, &self.setpoints)
    }

    fn tick_n(&mut self, inputs: &TickInputs, n: u32) {
        for _ in 0..n {
            self.tick(inputs);
        }
    }

    /// Ticks until the controller reaches `target`, panicking after `max`.
    fn run_until(&mut self, inputs: &TickInputs, target: ControllerState, max: u32) {
        for _ in 0..max {
            if self.controller.state() == target {
                return;
            }
            self.tick(inputs);
        }
        panic!(
            "never reached {target:?}, stuck in {:?}",
            self.controller.state()
        );
    }
}

/// Idle voltage: above the charge-cycle setpoint so standby stays put.
const IDLE_V: f32 = 4.18;
/// Low enough for standby to start a charge cycle.
const NEEDS_CHARGE_V: f32 = 3.5;

#[test]
fn init_discovers_the_chain_then_settles_into_standby() {
    let mut rig = Rig::uniform(&['A', 'B'], IDLE_V);
    let inputs = TickInputs::default();

    rig.tick(&inputs);
    assert_eq!(rig.controller.state(), ControllerState::Init);
    assert_eq!(rig.controller.pack().found_count(), 2);

    rig.run_until(&inputs, ControllerState::Standby, 10);
    assert!(!rig.controller.is_faulted());
}

#[test]
fn standby_outputs_are_quiescent() {
    let mut rig = Rig::uniform(&['A', 'B'], IDLE_V);
    let inputs = TickInputs::default();
    rig.run_until(&inputs, ControllerState::Standby, 10);

    let (outputs, period) = rig.tick(&inputs);
    assert!(!outputs.charger_enable);
    assert_eq!(outputs.fault_line, LineDrive::DriveLow);
    assert_eq!(outputs.pump_duty, 0);
    assert_eq!(period, LoopPeriod::Standby);
}

#[test]
fn console_attachment_keeps_the_loop_on_the_short_period() {
    let mut rig = Rig::uniform(&['A', 'B'], IDLE_V);
    let mut inputs = TickInputs::default();
    rig.run_until(&inputs, ControllerState::Standby, 10);

    inputs.console_attached = true;
    let (_, period) = rig.tick(&inputs);
    assert_eq!(period, LoopPeriod::Active);
}

#[test]
fn run_request_enters_run_and_dropping_it_returns_to_standby() {
    let mut rig = Rig::uniform(&['A', 'B'], IDLE_V);
    let mut inputs = TickInputs::default();
    rig.run_until(&inputs, ControllerState::Standby, 10);

    inputs.run_request = true;
    rig.tick(&inputs);
    assert_eq!(rig.controller.state(), ControllerState::Run);

    let (outputs, period) = rig.tick(&inputs);
    assert!(!outputs.charger_enable);
    assert_eq!(period, LoopPeriod::Active);
    // 25 C pack: pump holds its floor duty while running.
    assert_eq!(outputs.pump_duty, 63);

    inputs.run_request = false;
    rig.tick(&inputs);
    assert_eq!(rig.controller.state(), ControllerState::Standby);
}

#[test]
fn an_already_charging_charger_bypasses_precharge() {
    let mut rig = Rig::uniform(&['A', 'B'], IDLE_V);
    let mut inputs = TickInputs::default();
    rig.run_until(&inputs, ControllerState::Standby, 10);

    inputs.charging_active = true;
    rig.tick(&inputs);
    assert_eq!(rig.controller.state(), ControllerState::Charging);

    let (outputs, _) = rig.tick(&inputs);
    assert!(outputs.charger_enable);
}

#[test]
fn low_pack_starts_a_charge_cycle_after_the_standby_dwell() {
    let mut rig = Rig::uniform(&['A', 'B'], NEEDS_CHARGE_V);
    let inputs = TickInputs::default();

    rig.run_until(&inputs, ControllerState::Standby, 10);
    rig.run_until(&inputs, ControllerState::PreCharge, 10);

    let (outputs, _) = rig.tick(&inputs);
    assert!(outputs.charger_enable, "precharge powers the charger");
}

#[test]
fn precharge_gives_up_after_its_window() {
    let mut rig = Rig::uniform(&['A', 'B'], NEEDS_CHARGE_V);
    let inputs = TickInputs::default();
    rig.run_until(&inputs, ControllerState::PreCharge, 20);

    rig.tick_n(&inputs, PRECHARGE_WINDOW_TICKS + 2);
    assert_eq!(rig.controller.state(), ControllerState::Standby);
}

#[test]
fn precharge_aborts_when_the_evse_disconnects() {
    let mut rig = Rig::uniform(&['A', 'B'], NEEDS_CHARGE_V);
    let mut inputs = TickInputs::default();
    rig.run_until(&inputs, ControllerState::PreCharge, 20);

    inputs.evse_disconnected = true;
    rig.tick(&inputs);
    assert_eq!(rig.controller.state(), ControllerState::Standby);
}

#[test]
fn charging_ramps_into_trickle_and_winds_down_through_postcharge() {
    let mut rig = Rig::uniform(&['A', 'B'], NEEDS_CHARGE_V);
    let mut inputs = TickInputs::default();
    rig.run_until(&inputs, ControllerState::PreCharge, 20);

    inputs.charging_active = true;
    rig.tick(&inputs);
    assert_eq!(rig.controller.state(), ControllerState::Charging);

    // The pack fills up past the trickle setpoint.
    for module in &mut rig.bus.link_mut().modules {
        module.set_cells([4.1964; 6]);
    }
    rig.tick(&inputs);
    assert_eq!(rig.controller.state(), ControllerState::TrickleCharging);

    // Charger shuts down: the drop debounces, then postcharge drains back
    // to standby once the signal is gone.
    inputs.charging_active = false;
    rig.tick_n(&inputs, u32::from(CHARGE_DROP_DEBOUNCE_TICKS));
    assert_eq!(rig.controller.state(), ControllerState::PostCharge);

    rig.tick(&inputs);
    assert_eq!(rig.controller.state(), ControllerState::Standby);
}

#[test]
fn charge_drop_debounce_tolerates_a_short_blip() {
    let mut rig = Rig::uniform(&['A', 'B'], NEEDS_CHARGE_V);
    let mut inputs = TickInputs::default();
    rig.run_until(&inputs, ControllerState::PreCharge, 20);
    inputs.charging_active = true;
    rig.tick(&inputs);
    assert_eq!(rig.controller.state(), ControllerState::Charging);

    // Two dropped ticks stay under the debounce threshold.
    inputs.charging_active = false;
    rig.tick_n(&inputs, 2);
    assert_eq!(rig.controller.state(), ControllerState::Charging);

    inputs.charging_active = true;
    rig.tick(&inputs);
    assert_eq!(rig.controller.state(), ControllerState::Charging);

    // The counter restarted: two more dropped ticks still do not transition.
    inputs.charging_active = false;
    rig.tick_n(&inputs, 2);
    assert_eq!(rig.controller.state(), ControllerState::Charging);
}

#[test]
fn serial_comms_fault_debounces_one_count_per_tick() {
    let mut rig = Rig::uniform(&['A', 'B'], IDLE_V);
    let inputs = TickInputs::default();
    rig.run_until(&inputs, ControllerState::Standby, 10);

    rig.bus.link_mut().module_by_label_mut('A').mode = FailureMode::CorruptCrc;

    // Two bad sweeps: still under the debounce threshold of three.
    rig.tick_n(&inputs, 2);
    assert!(!rig.controller.faults().get(FaultId::SerialComms).is_active());
    assert!(!rig.controller.charger_inhibit());

    // Third bad sweep asserts: charging inhibited, run power limited.
    rig.tick(&inputs);
    assert!(rig.controller.faults().get(FaultId::SerialComms).is_active());
    assert!(rig.controller.charger_inhibit());
    assert!(rig.controller.power_limiter());

    let (outputs, _) = rig.tick(&inputs);
    assert_eq!(outputs.fault_line, LineDrive::FloatHigh);

    // One healthy sweep clears the transient but never the sticky flag.
    rig.bus.link_mut().module_by_label_mut('A').mode = FailureMode::Healthy;
    rig.tick(&inputs);
    assert!(!rig.controller.faults().get(FaultId::SerialComms).is_active());
    assert!(rig.controller.faults().get(FaultId::SerialComms).is_sticky());

    rig.controller.clear_sticky_faults();
    assert!(!rig.controller.sticky_faulted());
}

#[test]
fn overvoltage_inhibits_immediately_and_faults_after_debounce() {
    // 4.2727 V per cell: above both max_charge_v and over_v.
    let mut rig = Rig::uniform(&['A', 'B'], 4.2727);
    let inputs = TickInputs::default();

    rig.tick(&inputs);
    // The max-charge comparison is immediate, no debounce.
    assert!(rig.controller.charger_inhibit());
    assert!(rig.controller.power_limiter());
    assert!(!rig.controller.faults().get(FaultId::PackOverVoltage).is_active());

    rig.tick_n(&inputs, 2);
    assert!(rig.controller.faults().get(FaultId::PackOverVoltage).is_active());
    assert!(rig.controller.faults().get(FaultId::PackOverVoltage).is_sticky());
}

#[test]
fn water_intrusion_blocks_charging_and_running() {
    let mut rig = Rig::uniform(&['A', 'B'], IDLE_V);
    let mut inputs = TickInputs::default();
    rig.run_until(&inputs, ControllerState::Standby, 10);

    inputs.water_sensor_2 = true;
    rig.tick_n(&inputs, 3);
    assert!(rig.controller.faults().get(FaultId::WaterSensor2).is_active());
    assert!(rig.controller.charger_inhibit());
    assert!(rig.controller.power_limiter());
}

#[test]
fn module_count_shortfall_is_a_debounced_fault() {
    let mut rig = Rig::uniform(&['A', 'B'], IDLE_V);
    rig.setpoints.module_count = 3;
    let inputs = TickInputs::default();

    rig.tick_n(&inputs, 2);
    assert!(
        !rig.controller
            .faults()
            .get(FaultId::ModuleCountShortfall)
            .is_active()
    );
    rig.tick(&inputs);
    assert!(
        rig.controller
            .faults()
            .get(FaultId::ModuleCountShortfall)
            .is_active()
    );
}

#[test]
fn dc2dc_cycle_is_time_boxed_and_rearms_after_recovery() {
    let mut rig = Rig::uniform(&['A', 'B'], IDLE_V);
    rig.setpoints.dc2dc_cycle_time_s = 60;
    let mut inputs = TickInputs::default();
    rig.run_until(&inputs, ControllerState::Standby, 10);

    // Battery sags below the cycle setpoint: the converter engages.
    inputs.bat12v_raw = 600;
    let (outputs, _) = rig.tick(&inputs);
    assert!(outputs.dc2dc_enable);

    // 60 s at the 2.5 s standby period: 24 ticks drain the budget.
    let mut stopped_after = None;
    for tick in 0..30 {
        let (outputs, _) = rig.tick(&inputs);
        if !outputs.dc2dc_enable {
            stopped_after = Some(tick);
            break;
        }
    }
    let stopped_after = stopped_after.expect("cycle never timed out");
    assert!((20..=26).contains(&stopped_after), "stopped after {stopped_after}");

    // Still sagging: no re-engage until the battery has recovered once.
    let (outputs, _) = rig.tick(&inputs);
    assert!(!outputs.dc2dc_enable);

    inputs.bat12v_raw = 800;
    rig.tick(&inputs);
    inputs.bat12v_raw = 600;
    let (outputs, _) = rig.tick(&inputs);
    assert!(outputs.dc2dc_enable);
}

#[test]
fn rough_balancing_selects_only_the_high_cell() {
    let mut rig = Rig::new(SimChain::new(vec![SimModule::new(
        'A',
        [3.48, 3.48, 3.62, 3.48, 3.48, 3.48],
    )]));
    let inputs = TickInputs::default();

    rig.tick(&inputs);
    let module = rig.bus.link_mut().module_by_label('A');
    assert_eq!(module.balance_mask, Some(1 << 2));
    assert_eq!(module.balance_time, Some(5));
}

#[test]
fn no_balancing_below_the_rough_setpoint() {
    let mut rig = Rig::uniform(&['A'], 3.35);
    let inputs = TickInputs::default();

    rig.tick(&inputs);
    let module = rig.bus.link_mut().module_by_label('A');
    // The sweep's stop-balancing broadcast is the only balance write.
    assert_eq!(module.balance_mask, Some(0));
    assert_eq!(module.balance_time, None);
}

#[test]
fn precision_balancing_uses_the_tight_offset() {
    let mut rig = Rig::new(SimChain::new(vec![SimModule::new(
        'A',
        [4.01, 4.01, 4.05, 4.01, 4.01, 4.01],
    )]));
    let inputs = TickInputs::default();

    rig.tick(&inputs);
    // Precision offset 0.005 over the 4.01 low cell: only the 4.05 cell
    // exceeds it (rough offset 0.1 would have selected nothing).
    let module = rig.bus.link_mut().module_by_label('A');
    assert_eq!(module.balance_mask, Some(1 << 2));
}
