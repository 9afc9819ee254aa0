//! Colored stderr backend for the `log` facade.

use std::fmt;
use std::io::{IsTerminal, Write};
use std::str::FromStr;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Environment variable selecting the log level.
pub const LOG_ENV: &str = "FATCAT_LOG";

const DEFAULT_LEVEL: LevelFilter = LevelFilter::Warn;

#[repr(u8)]
#[derive(Clone, Copy)]
enum ColorCode {
    Red = 31,
    Yellow = 33,
    Green = 32,
    Cyan = 36,
    BrightBlack = 90,
}

fn level_color(level: Level) -> ColorCode {
    match level {
        Level::Error => ColorCode::Red,
        Level::Warn => ColorCode::Yellow,
        Level::Info => ColorCode::Green,
        Level::Debug => ColorCode::Cyan,
        Level::Trace => ColorCode::BrightBlack,
    }
}

struct Colored<T>(Option<ColorCode>, T);

impl<T: fmt::Display> fmt::Display for Colored<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(color) => write!(f, "\u{1B}[{}m{}\u{1B}[m", color as u8, self.1),
            None => write!(f, "{}", self.1),
        }
    }
}

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = record.level();
        let color = std::io::stderr().is_terminal().then(|| level_color(level));
        let mut err = std::io::stderr().lock();
        let _ = writeln!(
            err,
            "[{}] {}",
            Colored(color, format_args!("{level:<5}")),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Parse a level name; unknown names turn logging off.
pub fn parse_level(level: &str) -> LevelFilter {
    LevelFilter::from_str(level.trim()).unwrap_or(LevelFilter::Off)
}

/// Level from the environment, raised by `verbosity` steps.
pub fn level_for(env_value: Option<&str>, verbosity: usize) -> LevelFilter {
    let base = env_value.map(parse_level).unwrap_or(DEFAULT_LEVEL);
    let raised = match base {
        LevelFilter::Off => return base,
        LevelFilter::Error => 1,
        LevelFilter::Warn => 2,
        LevelFilter::Info => 3,
        LevelFilter::Debug => 4,
        LevelFilter::Trace => 5,
    } + verbosity;
    match raised {
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the logger. `verbosity` counts `-v` flags.
pub fn init(verbosity: usize) -> Result<(), SetLoggerError> {
    static LOGGER: StderrLogger = StderrLogger;
    log::set_logger(&LOGGER)?;
    let env = std::env::var(LOG_ENV).ok();
    log::set_max_level(level_for(env.as_deref(), verbosity));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_selection() {
        assert_eq!(level_for(None, 0), LevelFilter::Warn);
        assert_eq!(level_for(None, 1), LevelFilter::Info);
        assert_eq!(level_for(Some("debug"), 0), LevelFilter::Debug);
        assert_eq!(level_for(Some("error"), 9), LevelFilter::Trace);
        assert_eq!(level_for(Some("off"), 2), LevelFilter::Off);
        assert_eq!(level_for(Some("bogus"), 0), LevelFilter::Off);
    }

    #[test]
    fn test_colored() {
        assert_eq!(Colored(None, "x").to_string(), "x");
        assert_eq!(
            Colored(Some(ColorCode::Red), "x").to_string(),
            "\u{1B}[31mx\u{1B}[m"
        );
    }
}
