//! Console renderers for pack and controller snapshots.
//!
//! Everything writes into a caller-supplied [`fmt::Write`] sink so the same
//! code serves the emulator's stdout and a firmware serial console.

use core::fmt;
use core::fmt::Write;

use crate::controller::Controller;
use crate::module::{ALERT_LABELS, CELLS_PER_MODULE, FAULT_LABELS, ModuleRecord};
use crate::pack::Watermark;
use crate::setpoints::{PARAMS, Setpoints};

fn write_watermark<W: Write>(out: &mut W, label: &str, mark: Watermark) -> fmt::Result {
    write!(out, "{label}: {:.3}", mark.value())?;
    match mark.tick() {
        Some(tick) => writeln!(out, " (tick {tick})"),
        None => writeln!(out, " (never moved)"),
    }
}

fn write_module_status<W: Write>(out: &mut W, module: &ModuleRecord) -> fmt::Result {
    if module.faults() != 0 {
        writeln!(out, "  MODULE IS FAULTED:")?;
        for (bit, label) in FAULT_LABELS {
            if module.faults() & bit != 0 {
                writeln!(out, "    {label}")?;
            }
        }
        let cells = [module.cov_faults(), module.cuv_faults()];
        for (mask, what) in cells.iter().zip(["overvoltage", "undervoltage"]) {
            if *mask != 0 {
                write!(out, "    {what} cells:")?;
                for cell in 0..CELLS_PER_MODULE {
                    if mask & (1 << cell) != 0 {
                        write!(out, " {}", cell + 1)?;
                    }
                }
                writeln!(out)?;
            }
        }
    }
    if module.alerts() != 0 {
        writeln!(out, "  MODULE HAS ALERTS:")?;
        for (bit, label) in ALERT_LABELS {
            if module.alerts() & bit != 0 {
                writeln!(out, "    {label}")?;
            }
        }
    }
    Ok(())
}

/// Pack overview: aggregates, watermarks, then one block per module.
pub fn write_summary<W: Write>(out: &mut W, controller: &Controller) -> fmt::Result {
    let pack = controller.pack();
    writeln!(
        out,
        "State: {}   12V battery: {:.2}V   Charger inhibit: {}   Power limiter: {}",
        controller.state(),
        controller.bat12v_voltage(),
        controller.charger_inhibit(),
        controller.power_limiter(),
    )?;
    writeln!(
        out,
        "Modules: {}   Voltage: {:.2}V   Avg cell: {:.3}V   Avg temp: {:.2}C",
        pack.found_count(),
        pack.pack_voltage(),
        pack.avg_cell_voltage(),
        pack.avg_temperature(),
    )?;
    writeln!(
        out,
        "Cells: {:.3}V - {:.3}V (delta {:.3}V)   Temps: {:.2}C - {:.2}C",
        pack.low_cell_voltage(),
        pack.high_cell_voltage(),
        pack.high_cell_voltage() - pack.low_cell_voltage(),
        pack.low_temperature(),
        pack.high_temperature(),
    )?;

    write_watermark(out, "Hist low pack V", pack.hist_lowest_pack_voltage())?;
    write_watermark(out, "Hist high pack V", pack.hist_highest_pack_voltage())?;
    write_watermark(out, "Hist low cell V", pack.hist_lowest_cell_voltage())?;
    write_watermark(out, "Hist high cell V", pack.hist_highest_cell_voltage())?;
    write_watermark(out, "Hist cell delta", pack.hist_highest_cell_delta())?;
    write_watermark(out, "Hist low temp", pack.hist_lowest_pack_temperature())?;
    write_watermark(out, "Hist high temp", pack.hist_highest_pack_temperature())?;

    for module in pack.discovered() {
        writeln!(out, "Module #{}", module.address())?;
        writeln!(
            out,
            "  Voltage: {:.2}V ({:.3}V-{:.3}V)   Temps: {:.2}C-{:.2}C",
            module.module_voltage(),
            module.low_cell_voltage(),
            module.high_cell_voltage(),
            module.low_temperature(),
            module.high_temperature(),
        )?;
        writeln!(
            out,
            "  Historic: ({:.2}V-{:.2}V)   Temps: {:.2}C-{:.2}C",
            module.lowest_reported_voltage(),
            module.highest_reported_voltage(),
            module.lowest_temperature(),
            module.highest_temperature(),
        )?;
        for cell in 0..CELLS_PER_MODULE {
            writeln!(
                out,
                "  Cell{:2}: {:.3}V | low {:.3}V | high {:.3}V",
                cell + 1,
                module.cell_voltage(cell),
                module.lowest_cell_voltage(cell),
                module.highest_cell_voltage(cell),
            )?;
        }
        write_module_status(out, module)?;
    }
    Ok(())
}

/// Per-cell voltage bars between 2.0 V and 4.5 V.
pub fn write_graph<W: Write>(out: &mut W, controller: &Controller) -> fmt::Result {
    const SPAN_LOW: f32 = 2.0;
    const SPAN_HIGH: f32 = 4.5;
    const WIDTH: f32 = 40.0;

    for module in controller.pack().discovered() {
        for cell in 0..CELLS_PER_MODULE {
            let volts = module.cell_voltage(cell);
            let fill = ((volts - SPAN_LOW) / (SPAN_HIGH - SPAN_LOW) * WIDTH).clamp(0.0, WIDTH);
            write!(out, "{}.{} |", module.address(), cell + 1)?;
            for _ in 0..fill as u32 {
                out.write_char('=')?;
            }
            writeln!(out, " {volts:.3}V")?;
        }
    }
    Ok(())
}

/// One CSV row per module: address, six cells, two temperatures.
pub fn write_csv<W: Write>(out: &mut W, controller: &Controller) -> fmt::Result {
    for module in controller.pack().discovered() {
        write!(out, "{}", module.address())?;
        for cell in 0..CELLS_PER_MODULE {
            write!(out, ",{:.2}", module.cell_voltage(cell))?;
        }
        writeln!(
            out,
            ",{:.2},{:.2}",
            module.temperature(0),
            module.temperature(1)
        )?;
    }
    Ok(())
}

/// Live/sticky table across the whole fault panel.
pub fn write_faults<W: Write>(out: &mut W, controller: &Controller) -> fmt::Result {
    writeln!(
        out,
        "{:26} {:7} {:7} {:9} class",
        "fault", "active", "sticky", "tick"
    )?;
    for fault in controller.faults().iter() {
        let class = match (fault.affects_charging(), fault.affects_running()) {
            (true, true) => "charge+run",
            (true, false) => "charge",
            (false, true) => "run",
            (false, false) => "report",
        };
        write!(
            out,
            "{:26} {:7} {:7} ",
            fault.name(),
            fault.is_active(),
            fault.is_sticky()
        )?;
        match fault.asserted_at() {
            Some(tick) => write!(out, "{tick:<9} ")?,
            None => write!(out, "{:9} ", "-")?,
        }
        writeln!(out, "{class}")?;
    }
    Ok(())
}

/// Full parameter listing with ranges and descriptions.
pub fn write_settings<W: Write>(out: &mut W, setpoints: &Setpoints) -> fmt::Result {
    for info in PARAMS {
        let Some(value) = setpoints.get(info.name) else {
            continue;
        };
        writeln!(
            out,
            "{:32} = {:10} [{} , {}] {}",
            info.name, value, info.min, info.max, info.description
        )?;
    }
    Ok(())
}
