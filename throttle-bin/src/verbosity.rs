//! `-v` / `-q` flags controlling how much is logged to stderr.
//!
//! Without any flag, `info` and above is shown.
//! - `-v` adds debug output (one line per request)
//! - `-vv` adds trace output
//! - `-q` only shows warnings (failed requests)
//! - `-qq` only shows errors
//! - `-qqq` silences logging entirely
//!
//! The run summary is printed to stdout and is not affected by these flags.

use std::fmt;

use log::LevelFilter;
use serde::Deserialize;

#[derive(clap::Args, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Verbosity {
    /// More log output per occurrence (`-v` debug, `-vv` trace)
    #[arg(
        long,
        short = 'v',
        action = clap::ArgAction::Count,
        global = true,
        conflicts_with = "quiet",
    )]
    verbose: u8,

    /// Less log output per occurrence (`-q` warnings, `-qq` errors, `-qqq` nothing)
    #[arg(
        long,
        short = 'q',
        action = clap::ArgAction::Count,
        global = true,
        conflicts_with = "verbose",
    )]
    quiet: u8,
}

impl Verbosity {
    /// Level filter for the `throttle` and `throttle_lib` modules
    pub(crate) fn log_level_filter(self) -> LevelFilter {
        match i16::from(self.verbose) - i16::from(self.quiet) {
            i16::MIN..=-3 => LevelFilter::Off,
            -2 => LevelFilter::Error,
            -1 => LevelFilter::Warn,
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

// Config files name the level instead of counting flags, e.g. `verbose = "debug"`
impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let (verbose, quiet) = match s.to_lowercase().as_str() {
            "off" => (0, 3),
            "error" => (0, 2),
            "warn" | "warning" => (0, 1),
            "info" => (0, 0),
            "debug" => (1, 0),
            "trace" => (2, 0),
            level => {
                return Err(serde::de::Error::custom(format!(
                    "invalid log level `{level}`"
                )));
            }
        };
        Ok(Verbosity { verbose, quiet })
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.log_level_filter())
    }
}
