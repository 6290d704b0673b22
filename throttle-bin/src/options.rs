use crate::verbosity::Verbosity;
use anyhow::{Context, Error, Result, anyhow, ensure};
use clap::builder::PossibleValuesParser;
use clap::{Parser, builder::TypedValueParser};
use const_format::{concatcp, formatcp};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::{fs, path::PathBuf, str::FromStr, time::Duration};
use strum::{Display, EnumIter, EnumString, VariantNames};
use throttle_lib::{DEFAULT_USER_AGENT, INDEX_PLACEHOLDER};

pub(crate) const THROTTLE_CONFIG_FILE: &str = "throttle.toml";

const DEFAULT_CONCURRENCY: usize = 8;
const DEFAULT_TOTAL: usize = 100;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_URL_TEMPLATE: &str = concatcp!("https://httpbin.org/delay/1?i=", INDEX_PLACEHOLDER);

// this exists because clap requires `&str` type values for defaults
// whereas serde expects owned `String` types
const CONCURRENCY_STR: &str = concatcp!(DEFAULT_CONCURRENCY);
const TOTAL_STR: &str = concatcp!(DEFAULT_TOTAL);
const TIMEOUT_STR: &str = concatcp!(DEFAULT_TIMEOUT_SECS);
// Show the default config file in the help text while still being able to
// tell whether the user passed one explicitly. Only an explicit file has to
// exist.
const HELP_MSG_CONFIG_FILE: &str = formatcp!(
    "Configuration file to use\n\n[default: {}]",
    THROTTLE_CONFIG_FILE,
);

/// How work items are handed to the workers
#[derive(
    Debug, Deserialize, Default, Clone, Copy, Display, EnumIter, EnumString, VariantNames, PartialEq, Eq,
)]
#[non_exhaustive]
pub(crate) enum Mode {
    /// Every request is its own task, admitted through a gate of
    /// `concurrency` permits.
    #[serde(rename = "gate")]
    #[strum(serialize = "gate", ascii_case_insensitive)]
    #[default]
    Gate,

    /// A producer feeds request indices into a bounded queue drained by
    /// `concurrency` consumers. The producer is slowed down when the queue
    /// is full.
    #[serde(rename = "pipeline")]
    #[strum(serialize = "pipeline", ascii_case_insensitive)]
    Pipeline,
}

/// The format to use for the final run summary
#[derive(Debug, Deserialize, Default, Clone, Copy, Display, EnumIter, VariantNames, PartialEq, Eq)]
#[non_exhaustive]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub(crate) enum StatsFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for StatsFormat {
    type Err = Error;

    fn from_str(format: &str) -> Result<Self, Self::Err> {
        match format.to_lowercase().as_str() {
            "compact" | "string" => Ok(StatsFormat::Compact),
            "json" => Ok(StatsFormat::Json),
            _ => Err(anyhow!("Unknown format {format}")),
        }
    }
}

// Macro for generating default functions to be used by serde
macro_rules! default_function {
    ( $( $name:ident : $T:ty = $e:expr; )* ) => {
        $(
            #[allow(clippy::missing_const_for_fn)]
            fn $name() -> $T {
                $e
            }
        )*
    };
}

// Generate the functions for serde defaults
default_function! {
    concurrency: usize = DEFAULT_CONCURRENCY;
    total: usize = DEFAULT_TOTAL;
    timeout: f64 = DEFAULT_TIMEOUT_SECS as f64;
    url: String = DEFAULT_URL_TEMPLATE.to_string();
    user_agent: String = DEFAULT_USER_AGENT.to_string();
    verbosity: Verbosity = Verbosity::default();
}

// Macro for merging configuration values
macro_rules! fold_in {
    ($cli:ident , $toml:ident ; $ty:ident { $(..$ignore:ident,)* $( $key:ident : $default:expr, )* } ) => {
        if (false) {
            #[allow(dead_code, unused, clippy::diverging_sub_expression)]
            let _check_fold_in_exhaustivity = $ty {
                $($key: unreachable!(), )*
                $($ignore: unreachable!(), )*
            };
        };
        $(
            if $cli.$key == $default && $toml.$key != $default {
                $cli.$key = $toml.$key;
            }
        )*
    };
}

/// throttle fires a fixed number of HTTP requests against an endpoint while
/// never running more than a configured number at once.
///
/// The run ends when every request finished, when the global timeout elapses,
/// or on Ctrl+C. A summary of successes, failures, the highest concurrency
/// observed and the latency distribution is printed at the end.
#[derive(Parser, Debug)]
#[command(version, about, next_display_order = None)]
pub(crate) struct ThrottleOptions {
    /// Configuration file to use
    #[arg(long = "config")]
    #[arg(help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    #[clap(flatten)]
    pub(crate) config: Config,
}

/// The main configuration for throttle
#[derive(Parser, Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Verbose program output
    #[clap(flatten)]
    #[serde(default = "verbosity")]
    pub(crate) verbose: Verbosity,

    /// Maximum number of requests in flight at the same time
    #[arg(short, long, default_value = &CONCURRENCY_STR)]
    #[serde(default = "concurrency")]
    pub(crate) concurrency: usize,

    /// Total number of requests to send
    #[arg(short = 'n', long, default_value = &TOTAL_STR)]
    #[serde(default = "total")]
    pub(crate) total: usize,

    /// Global deadline for the whole run in seconds. Fractions are allowed.
    ///
    /// Requests still queued or in flight when it elapses are canceled and a
    /// partial summary is printed.
    #[arg(short, long, default_value = &TIMEOUT_STR)]
    #[serde(default = "timeout")]
    pub(crate) timeout: f64,

    /// URL template; every `{i}` is replaced by the index of the request
    #[arg(short, long, default_value = DEFAULT_URL_TEMPLATE)]
    #[serde(default = "url")]
    pub(crate) url: String,

    /// How requests are scheduled
    #[arg(long, default_value = "gate", value_parser = PossibleValuesParser::new(Mode::VARIANTS).map(|s| s.parse::<Mode>().unwrap()))]
    #[serde(default)]
    pub(crate) mode: Mode,

    /// Bound of the request queue in pipeline mode.
    /// Defaults to the concurrency.
    #[arg(long, value_name = "N", verbatim_doc_comment)]
    #[serde(default)]
    pub(crate) queue_capacity: Option<usize>,

    /// Never send two requests to the same host at the same time
    #[arg(long)]
    #[serde(default)]
    pub(crate) per_host: bool,

    /// TOML file mapping request indices to URLs which replace the URL template
    /// for those indices.
    ///
    /// Example:
    ///   0 = "https://example.com/warmup"
    ///   42 = "https://example.com/answer?i={i}"
    #[arg(long, value_name = "PATH", verbatim_doc_comment)]
    #[serde(default)]
    pub(crate) targets: Option<PathBuf>,

    /// Reload the targets file at this interval while the run is going on
    /// (e.g. `500ms`, `2s`)
    #[arg(long, value_parser = humantime::parse_duration, requires = "targets")]
    #[serde(default, with = "humantime_serde")]
    pub(crate) refresh_targets: Option<Duration>,

    /// Number of threads to utilize.
    /// Defaults to number of cores available to the system
    #[arg(short = 'T', long)]
    #[serde(default)]
    pub(crate) threads: Option<usize>,

    /// User agent
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    #[serde(default = "user_agent")]
    pub(crate) user_agent: String,

    /// Proceed for server connections considered insecure (invalid TLS)
    #[arg(long)]
    #[serde(default)]
    pub(crate) insecure: bool,

    /// Output format of the run summary
    #[arg(short, long, default_value = "compact", value_parser = PossibleValuesParser::new(StatsFormat::VARIANTS).map(|s| s.parse::<StatsFormat>().unwrap()))]
    #[serde(default)]
    pub(crate) format: StatsFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbose: verbosity(),
            concurrency: concurrency(),
            total: total(),
            timeout: timeout(),
            url: url(),
            mode: Mode::default(),
            queue_capacity: None,
            per_host: false,
            targets: None,
            refresh_targets: None,
            threads: None,
            user_agent: user_agent(),
            insecure: false,
            format: StatsFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        // Read configuration file
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    /// Merge the configuration from TOML into the CLI configuration
    pub(crate) fn merge(&mut self, toml: Config) {
        // NOTE: if you see an error within this macro call, check to make sure that
        // that the fields provided to fold_in! match all the fields of the Config struct.
        fold_in! {
            // Destination and source configs
            self, toml;

            Config {
                // Keys with defaults to assign
                verbose: Verbosity::default(),
                concurrency: DEFAULT_CONCURRENCY,
                total: DEFAULT_TOTAL,
                timeout: timeout(),
                url: DEFAULT_URL_TEMPLATE,
                mode: Mode::default(),
                queue_capacity: None,
                per_host: false,
                targets: None,
                refresh_targets: None,
                threads: None,
                user_agent: DEFAULT_USER_AGENT,
                insecure: false,
                format: StatsFormat::default(),
            }
        }
    }

    /// Reject values the run cannot start with
    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(self.concurrency > 0, "`concurrency` must be greater than zero");
        ensure!(self.total > 0, "`total` must be greater than zero");
        ensure!(
            Duration::try_from_secs_f64(self.timeout).is_ok_and(|t| !t.is_zero()),
            "`timeout` must be a positive number of seconds, got {}",
            self.timeout
        );
        ensure!(
            self.queue_capacity != Some(0),
            "`queue-capacity` must be greater than zero"
        );
        ensure!(
            self.threads != Some(0),
            "`threads` must be greater than zero"
        );
        ensure!(
            self.refresh_targets != Some(Duration::ZERO),
            "`refresh-targets` must be longer than zero"
        );
        ensure!(
            self.refresh_targets.is_none() || self.targets.is_some(),
            "`refresh-targets` needs a `targets` file"
        );
        Ok(())
    }

    /// The global deadline of the run.
    ///
    /// Timeouts rejected by [`Config::validate`] map to [`Duration::MAX`].
    pub(crate) fn deadline(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout).unwrap_or(Duration::MAX)
    }

    /// Bound of the pipeline queue
    pub(crate) fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.concurrency)
    }
}

/// Read a targets file, mapping request indices to URL templates
pub(crate) fn load_targets(path: &Path) -> Result<HashMap<usize, String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Cannot read targets file `{}`", path.display()))?;
    let raw: HashMap<String, String> =
        toml::from_str(&contents).context("Targets file must be a table of index = \"url\"")?;
    raw.into_iter()
        .map(|(index, url)| {
            let index = index
                .trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid request index `{index}` in targets file"))?;
            Ok((index, url))
        })
        .collect()
}
