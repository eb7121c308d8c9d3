use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use clamp_bench::cell::FitzHughNagumoCell;
use clamp_bench::config::{BenchConfig, USAGE};
use clamp_bench::session::Session;
use crossterm::style::Stylize;

fn main() -> io::Result<()> {
    let config = BenchConfig::from_args(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::start(&config, FitzHughNagumoCell::default())?;
    let mut line = String::new();

    writeln!(
        writer,
        "AP clamp bench ready ({} ms period). Type `help` for commands or `exit` to quit.",
        config.period.as_ms()
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_command(trimmed)? {
            print_response(&mut writer, &response)?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn print_response<W: Write>(writer: &mut W, response: &str) -> io::Result<()> {
    if response.starts_with("ERR") {
        writeln!(writer, "{}", response.red())
    } else if response.starts_with("OK") {
        writeln!(writer, "{}", response.green())
    } else if response.starts_with("EVENT") {
        writeln!(writer, "{}", response.cyan())
    } else {
        writeln!(writer, "{response}")
    }
}
