//! MCU runtime: peripheral bring-up and the fixed-period tick task.
//!
//! Everything here only compiles for the target; the host build of this
//! crate stops at `main.rs`. The controller core never touches a peripheral
//! directly: the USART is adapted to the [`SerialLink`] trait and the pin
//! block is sampled into a [`TickInputs`] snapshot each tick.

use defmt::info;
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::Adc;
use embassy_stm32::gpio::{Input, Level, Output, OutputOpenDrain, Pull, Speed};
use embassy_stm32::time::hz;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use embassy_stm32::usart::{Config as UartConfig, Uart};
use embassy_time::{Duration, Timer, block_for};

use bms_core::bus::{ModuleBus, SerialLink};
use bms_core::controller::{Controller, LineDrive, LoopPeriod, OutputFrame};
use bms_core::setpoints::Setpoints;

use crate::pins::{PinLevels, tick_inputs};

/// Module chain baud rate fixed by the module firmware.
const BMS_BAUD: u32 = 612_500;

/// Blocking USART adapter for the module chain.
struct UartLink<'d> {
    uart: Uart<'d, hal::mode::Blocking>,
}

impl SerialLink for UartLink<'_> {
    fn send(&mut self, bytes: &[u8]) {
        let _ = self.uart.blocking_write(bytes);
    }

    fn recv(&mut self, buf: &mut [u8]) -> usize {
        let mut received = 0;
        while received < buf.len() {
            match self.uart.nb_read() {
                Ok(byte) => {
                    buf[received] = byte;
                    received += 1;
                }
                Err(_) => break,
            }
        }
        received
    }

    fn flush_input(&mut self) {
        while self.uart.nb_read().is_ok() {}
    }

    fn settle(&mut self, ms: u32) {
        block_for(Duration::from_millis(u64::from(ms)));
    }
}

#[embassy_executor::main]
pub async fn main(_spawner: Spawner) {
    let p = hal::init(hal::Config::default());
    info!("bms-firmware starting");

    let mut uart_config = UartConfig::default();
    uart_config.baudrate = BMS_BAUD;
    let uart = Uart::new_blocking(p.USART1, p.PB7, p.PB6, uart_config)
        .expect("usart init");
    let mut bus = ModuleBus::new(UartLink { uart });

    // Discrete inputs; pulls mirror the board wiring.
    let bat_pack_fault = Input::new(p.PA0, Pull::Up);
    let bat_mon_fault = Input::new(p.PA1, Pull::Up);
    let evse_disc = Input::new(p.PA4, Pull::Up);
    let run_request = Input::new(p.PA5, Pull::Down);
    let charging = Input::new(p.PA6, Pull::Down);
    let water_sens1 = Input::new(p.PA7, Pull::Up);
    let water_sens2 = Input::new(p.PB0, Pull::Up);

    // Actuators. The fault line is open-drain: driven low means no fault,
    // released (floating high) signals the inhibit.
    let mut charger_enable = Output::new(p.PB1, Level::High, Speed::Low);
    let mut dc2dc_enable = Output::new(p.PB2, Level::High, Speed::Low);
    let mut fault_line = OutputOpenDrain::new(p.PA8, Level::Low, Speed::Low);

    let pump_pin = PwmPin::new_ch1(p.PA15, hal::gpio::OutputType::PushPull);
    let mut pump = SimplePwm::new(
        p.TIM2,
        Some(pump_pin),
        None,
        None,
        None,
        hz(1_000),
        Default::default(),
    );
    let mut pump_ch = pump.ch1();
    pump_ch.enable();

    let mut adc = Adc::new(p.ADC1);
    let mut bat12v_pin = p.PA2;

    let mut controller = Controller::new();
    let setpoints = Setpoints::default();

    loop {
        let levels = PinLevels {
            bat_pack_fault: bat_pack_fault.is_high(),
            bat_mon_fault: bat_mon_fault.is_high(),
            evse_disc: evse_disc.is_high(),
            run: run_request.is_high(),
            charging: charging.is_high(),
            water_sens1: water_sens1.is_high(),
            water_sens2: water_sens2.is_high(),
        };
        let bat12v_raw = adc.blocking_read(&mut bat12v_pin);
        let inputs = tick_inputs(&levels, bat12v_raw, false);

        let (outputs, period) = controller.tick(&mut bus, &inputs, &setpoints);
        latch_outputs(
            &outputs,
            &mut charger_enable,
            &mut dc2dc_enable,
            &mut fault_line,
            &mut pump_ch,
        );

        let millis = match period {
            LoopPeriod::Active => LoopPeriod::Active.millis(),
            LoopPeriod::Standby => LoopPeriod::Standby.millis(),
        };
        Timer::after_millis(u64::from(millis)).await;
    }
}

fn latch_outputs(
    outputs: &OutputFrame,
    charger_enable: &mut Output<'_>,
    dc2dc_enable: &mut Output<'_>,
    fault_line: &mut OutputOpenDrain<'_>,
    pump: &mut embassy_stm32::timer::simple_pwm::SimplePwmChannel<'_, hal::peripherals::TIM2>,
) {
    // Both enables are active low on the board.
    charger_enable.set_level(if outputs.charger_enable {
        Level::Low
    } else {
        Level::High
    });
    dc2dc_enable.set_level(if outputs.dc2dc_enable {
        Level::Low
    } else {
        Level::High
    });
    match outputs.fault_line {
        LineDrive::DriveLow => fault_line.set_low(),
        LineDrive::FloatHigh => fault_line.set_high(),
    }
    let max = pump.max_duty_cycle();
    let duty = u32::from(outputs.pump_duty) * u32::from(max) / 255;
    pump.set_duty_cycle(duty as u16);
}
