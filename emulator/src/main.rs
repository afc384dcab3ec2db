mod session;
mod sim;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use session::Session;

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let module_count = parse_module_count().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: bms-emulator [--modules <1-62>]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(module_count);
    let mut line = String::new();

    writeln!(
        writer,
        "BMS emulator ready with {module_count} simulated modules. \
         Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "BMS> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
            break;
        }

        let response = session.handle_line(trimmed);
        write!(writer, "{response}")?;
    }

    Ok(())
}

fn parse_module_count() -> Result<usize, String> {
    let mut args = env::args().skip(1);
    match args.next() {
        None => Ok(4),
        Some(flag) if flag == "--modules" => {
            let value = args.next().ok_or("--modules needs a count")?;
            let count: usize = value
                .parse()
                .map_err(|_| format!("`{value}` is not a module count"))?;
            if (1..=62).contains(&count) {
                Ok(count)
            } else {
                Err(format!("{count} is outside 1-62"))
            }
        }
        Some(other) => Err(format!("unknown argument `{other}`")),
    }
}
