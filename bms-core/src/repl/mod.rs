//! Line-oriented operator console shared by the emulator and firmware.
//!
//! Commands are short tokens dispatched through a match table; the session
//! I/O (prompting, line assembly) belongs to the target. Everything here is
//! `no_std`: parsing borrows from the input line and rendering writes into
//! any [`core::fmt::Write`] sink.

use core::fmt;

use log::LevelFilter;

pub mod commands;
pub mod render;

/// One-line usage strings for the `help` command.
pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("summary", "summary                - pack overview, watermarks, module status"),
    ("graph", "graph                  - per-cell voltage bars"),
    ("csv", "csv                    - per-module readings in CSV"),
    ("faults", "faults                 - live and sticky fault table"),
    ("settings", "settings               - list every parameter"),
    ("get", "get <param>            - read one parameter"),
    ("set", "set <param> <value>    - write one parameter"),
    ("defaults", "defaults               - restore default parameters"),
    ("verbosity", "verbosity <level>      - off|error|warn|info|debug|trace"),
    ("reset-watermarks", "reset-watermarks       - forget recorded extremes"),
    ("clear-sticky", "clear-sticky           - clear latched fault flags"),
    ("sleep", "sleep                  - put the module chain to sleep"),
    ("wake", "wake                   - wake the module chain"),
    ("renumber", "renumber               - re-run bus address assignment"),
    ("help", "help [topic]           - show help"),
];

/// A parsed console command borrowing from the input line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command<'a> {
    Summary,
    Graph,
    Csv,
    Faults,
    Settings,
    Get { name: &'a str },
    Set { name: &'a str, value: &'a str },
    Defaults,
    Verbosity { level: LevelFilter },
    ResetWatermarks,
    ClearSticky,
    Sleep,
    Wake,
    Renumber,
    Help { topic: Option<&'a str> },
}

/// Parse failures, each carrying enough to render a usable error line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParseError<'a> {
    Unknown(&'a str),
    MissingArgument(&'static str),
    UnexpectedArgument(&'a str),
    UnknownLevel(&'a str),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Unknown(token) => write!(f, "unknown command `{token}`"),
            ParseError::MissingArgument(what) => write!(f, "missing {what}"),
            ParseError::UnexpectedArgument(token) => write!(f, "unexpected `{token}`"),
            ParseError::UnknownLevel(token) => write!(f, "unknown level `{token}`"),
        }
    }
}

fn level_from_token(token: &str) -> Option<LevelFilter> {
    let level = if token.eq_ignore_ascii_case("off") {
        LevelFilter::Off
    } else if token.eq_ignore_ascii_case("error") {
        LevelFilter::Error
    } else if token.eq_ignore_ascii_case("warn") {
        LevelFilter::Warn
    } else if token.eq_ignore_ascii_case("info") {
        LevelFilter::Info
    } else if token.eq_ignore_ascii_case("debug") {
        LevelFilter::Debug
    } else if token.eq_ignore_ascii_case("trace") {
        LevelFilter::Trace
    } else {
        return None;
    };
    Some(level)
}

/// Parses one console line. Blank lines parse to `None`.
pub fn parse(line: &str) -> Result<Option<Command<'_>>, ParseError<'_>> {
    let mut tokens = line.split_whitespace();
    let Some(head) = tokens.next() else {
        return Ok(None);
    };

    let is = |name: &str| head.eq_ignore_ascii_case(name);

    let command = if is("summary") {
        Command::Summary
    } else if is("graph") {
        Command::Graph
    } else if is("csv") {
        Command::Csv
    } else if is("faults") {
        Command::Faults
    } else if is("settings") {
        Command::Settings
    } else if is("get") {
        let name = tokens.next().ok_or(ParseError::MissingArgument("parameter name"))?;
        Command::Get { name }
    } else if is("set") {
        let name = tokens.next().ok_or(ParseError::MissingArgument("parameter name"))?;
        let value = tokens.next().ok_or(ParseError::MissingArgument("parameter value"))?;
        Command::Set { name, value }
    } else if is("defaults") {
        Command::Defaults
    } else if is("verbosity") {
        let token = tokens.next().ok_or(ParseError::MissingArgument("level"))?;
        let level = level_from_token(token).ok_or(ParseError::UnknownLevel(token))?;
        Command::Verbosity { level }
    } else if is("reset-watermarks") {
        Command::ResetWatermarks
    } else if is("clear-sticky") {
        Command::ClearSticky
    } else if is("sleep") {
        Command::Sleep
    } else if is("wake") {
        Command::Wake
    } else if is("renumber") {
        Command::Renumber
    } else if is("help") || is("h") || is("?") {
        Command::Help {
            topic: tokens.next(),
        }
    } else {
        return Err(ParseError::Unknown(head));
    };

    if let Some(extra) = tokens.next() {
        return Err(ParseError::UnexpectedArgument(extra));
    }
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_commands_parse_case_insensitively() {
        assert_eq!(parse("summary").unwrap(), Some(Command::Summary));
        assert_eq!(parse("  CSV  ").unwrap(), Some(Command::Csv));
        assert_eq!(parse("Faults").unwrap(), Some(Command::Faults));
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn get_and_set_carry_their_arguments() {
        assert_eq!(
            parse("get over_v").unwrap(),
            Some(Command::Get { name: "over_v" })
        );
        assert_eq!(
            parse("set over_v 4.1").unwrap(),
            Some(Command::Set {
                name: "over_v",
                value: "4.1"
            })
        );
        assert_eq!(
            parse("set over_v"),
            Err(ParseError::MissingArgument("parameter value"))
        );
    }

    #[test]
    fn verbosity_levels_parse_and_reject_garbage() {
        assert_eq!(
            parse("verbosity debug").unwrap(),
            Some(Command::Verbosity {
                level: LevelFilter::Debug
            })
        );
        assert_eq!(
            parse("verbosity loud"),
            Err(ParseError::UnknownLevel("loud"))
        );
    }

    #[test]
    fn trailing_tokens_and_unknown_commands_are_rejected() {
        assert_eq!(
            parse("summary please"),
            Err(ParseError::UnexpectedArgument("please"))
        );
        assert_eq!(parse("frobnicate"), Err(ParseError::Unknown("frobnicate")));
    }

    #[test]
    fn help_accepts_an_optional_topic() {
        assert_eq!(parse("help").unwrap(), Some(Command::Help { topic: None }));
        assert_eq!(
            parse("? set").unwrap(),
            Some(Command::Help { topic: Some("set") })
        );
    }
}
