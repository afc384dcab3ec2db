//! Console command dispatch.
//!
//! Runs between ticks on the same thread as the controller, so every mutation
//! goes through the controller's own write paths and the single-writer
//! discipline holds.

use core::fmt;
use core::fmt::Write;

use crate::bus::{ModuleBus, SerialLink};
use crate::controller::Controller;
use crate::setpoints::Setpoints;

use super::{Command, HELP_TOPICS, render};

/// Executes one parsed command, writing any response into `out`.
pub fn dispatch<L: SerialLink, W: Write>(
    command: &Command<'_>,
    controller: &mut Controller,
    setpoints: &mut Setpoints,
    bus: &mut ModuleBus<L>,
    out: &mut W,
) -> fmt::Result {
    match command {
        Command::Summary => render::write_summary(out, controller),
        Command::Graph => render::write_graph(out, controller),
        Command::Csv => render::write_csv(out, controller),
        Command::Faults => render::write_faults(out, controller),
        Command::Settings => render::write_settings(out, setpoints),
        Command::Get { name } => match setpoints.get(name) {
            Some(value) => writeln!(out, "{name} = {value}"),
            None => writeln!(out, "ERR unknown parameter `{name}`"),
        },
        Command::Set { name, value } => match setpoints.set(name, value) {
            Ok(stored) => writeln!(out, "OK {name} = {stored}"),
            Err(err) => writeln!(out, "ERR {err}"),
        },
        Command::Defaults => {
            setpoints.reset_defaults();
            writeln!(out, "OK parameters restored to defaults")
        }
        Command::Verbosity { level } => {
            log::set_max_level(*level);
            writeln!(out, "OK log level set to {level}")
        }
        Command::ResetWatermarks => {
            controller.pack_mut().reset_watermarks();
            writeln!(out, "OK recorded extremes reset")
        }
        Command::ClearSticky => {
            controller.clear_sticky_faults();
            writeln!(out, "OK sticky faults cleared")
        }
        Command::Sleep => {
            let pack = controller.pack_mut();
            pack.sleep_boards(bus);
            writeln!(out, "OK modules sleeping")
        }
        Command::Wake => {
            let pack = controller.pack_mut();
            pack.wake_boards(bus);
            writeln!(out, "OK modules awake")
        }
        Command::Renumber => {
            let pack = controller.pack_mut();
            pack.renumber(bus);
            writeln!(out, "OK {} modules addressed", pack.found_count())
        }
        Command::Help { topic } => write_help(out, *topic),
    }
}

fn write_help<W: Write>(out: &mut W, topic: Option<&str>) -> fmt::Result {
    if let Some(topic) = topic {
        for (name, usage) in HELP_TOPICS {
            if topic.eq_ignore_ascii_case(name) {
                return writeln!(out, "{usage}");
            }
        }
        return writeln!(out, "ERR no help for `{topic}`");
    }
    for (_, usage) in HELP_TOPICS {
        writeln!(out, "{usage}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repl::parse;

    struct DeadLink;

    impl SerialLink for DeadLink {
        fn send(&mut self, _bytes: &[u8]) {}

        fn recv(&mut self, _buf: &mut [u8]) -> usize {
            0
        }

        fn flush_input(&mut self) {}

        fn settle(&mut self, _ms: u32) {}
    }

    fn run(line: &str) -> std::string::String {
        let mut controller = Controller::new();
        let mut setpoints = Setpoints::default();
        let mut bus = ModuleBus::new(DeadLink);
        let mut out = std::string::String::new();
        let command = parse(line).unwrap().unwrap();
        dispatch(&command, &mut controller, &mut setpoints, &mut bus, &mut out).unwrap();
        out
    }

    #[test]
    fn get_set_and_defaults_round_trip_through_the_console() {
        assert!(run("get over_v").contains("over_v = 4.250"));
        assert!(run("set under_v 2.9").contains("OK under_v = 2.900"));
        assert!(run("set under_v 99").contains("ERR"));
        assert!(run("defaults").contains("OK"));
    }

    #[test]
    fn help_lists_every_topic_and_answers_lookups() {
        let all = run("help");
        for (name, _) in HELP_TOPICS {
            assert!(all.contains(name), "{name} missing from help");
        }
        assert!(run("help set").contains("set <param>"));
        assert!(run("help nonsense").contains("ERR"));
    }

    #[test]
    fn faults_table_renders_on_a_fresh_controller() {
        let table = run("faults");
        assert!(table.contains("pack-over-voltage"));
        assert!(table.contains("module-count-shortfall"));
    }

    #[test]
    fn settings_lists_the_full_catalog() {
        let listing = run("settings");
        assert!(listing.contains("precision_balance_v"));
        assert!(listing.contains("bat12v_scaling_divisor"));
    }
}
